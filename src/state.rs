//! Shared application state.
//!
//! One `AppState` lives for the whole process. The route table and user map
//! swap atomically on configuration change; the server-level settings are
//! fixed by the first successful configuration read.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::access_log::AccessLog;
use crate::config::{Expander, ServerConfig};
use crate::metrics::Metrics;
use crate::otasker::{DescriptorCache, WorkerRegistry};
use crate::routing::RouteTable;
use crate::users::UserRegistry;

/// Server parameters applied once at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub service_name: String,
    pub service_display_name: String,
    pub http_port: u16,
    pub http_debug_port: u16,
    pub http_read_timeout_ms: i64,
    pub http_write_timeout_ms: i64,
    pub http_ssl: bool,
    pub http_ssl_cert: String,
    pub http_ssl_key: String,
    pub http_log_dir: String,
}

impl ServerSettings {
    fn from_config(cfg: &ServerConfig) -> Self {
        Self {
            // the port participates in the service identity
            service_name: format!("{}_{}", cfg.service_name, cfg.http_port),
            service_display_name: cfg.service_display_name.clone(),
            http_port: cfg.http_port,
            http_debug_port: cfg.http_debug_port,
            http_read_timeout_ms: cfg.http_read_timeout_ms,
            http_write_timeout_ms: cfg.http_write_timeout_ms,
            http_ssl: cfg.http_ssl,
            http_ssl_cert: cfg.http_ssl_cert.clone(),
            http_ssl_key: cfg.http_ssl_key.clone(),
            http_log_dir: cfg.http_log_dir.clone(),
        }
    }
}

pub struct AppState {
    pub base_dir: PathBuf,
    pub metrics: Arc<Metrics>,
    pub descriptors: Arc<DescriptorCache>,
    pub workers: Arc<WorkerRegistry>,
    pub users: UserRegistry,
    pub access_log: AccessLog,
    routes: RwLock<Arc<RouteTable>>,
    settings: RwLock<Option<ServerSettings>>,
    live_config: RwLock<Option<ServerConfig>>,
    expander: RwLock<Option<Arc<Expander>>>,
}

impl AppState {
    pub fn new(base_dir: PathBuf) -> Arc<AppState> {
        let metrics = Arc::new(Metrics::new());
        let descriptors = Arc::new(DescriptorCache::new(metrics.clone()));
        Arc::new(AppState {
            base_dir,
            metrics: metrics.clone(),
            descriptors: descriptors.clone(),
            workers: Arc::new(WorkerRegistry::new(descriptors, metrics)),
            users: UserRegistry::new(),
            access_log: AccessLog::new(),
            routes: RwLock::new(Arc::new(RouteTable::default())),
            settings: RwLock::new(None),
            live_config: RwLock::new(None),
            expander: RwLock::new(None),
        })
    }

    /// Apply a freshly parsed configuration: rebuild the route table and the
    /// user map, and on the first call fix the server settings and start the
    /// access log.
    pub fn apply_config(&self, cfg: ServerConfig) {
        let table = Arc::new(RouteTable::build(&cfg));

        let first = {
            let mut settings = self.settings.write().expect("settings poisoned");
            if settings.is_none() {
                *settings = Some(ServerSettings::from_config(&cfg));
                true
            } else {
                false
            }
        };
        if first {
            let expander = Arc::new(Expander::new(
                self.base_dir.clone(),
                cfg.http_log_dir.clone(),
                format!("{}_{}", cfg.service_name, cfg.http_port),
            ));
            *self.expander.write().expect("expander poisoned") = Some(expander.clone());
            self.access_log.start(expander);
        }

        self.users.update(&cfg.users);
        *self.routes.write().expect("route table poisoned") = table;
        *self.live_config.write().expect("live config poisoned") = Some(cfg);
    }

    /// Snapshot of the live route table.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().expect("route table poisoned").clone()
    }

    pub fn settings(&self) -> Option<ServerSettings> {
        self.settings.read().expect("settings poisoned").clone()
    }

    pub fn expander(&self) -> Option<Arc<Expander>> {
        self.expander.read().expect("expander poisoned").clone()
    }

    /// Server-level fields of the live configuration, for the debug surface.
    pub fn config_echo(&self) -> serde_json::Value {
        self.live_config
            .read()
            .expect("live config poisoned")
            .as_ref()
            .map(|c| c.server_fields())
            .unwrap_or(serde_json::Value::Null)
    }

    /// Whether this gateway terminates TLS (drives the CGI `HTTPS` marker).
    pub fn is_tls(&self) -> bool {
        self.settings().map(|s| s.http_ssl).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(port: u16) -> ServerConfig {
        ServerConfig::parse(
            format!(
                r#"{{
                    "Service.Name": "gw",
                    "Http.Port": {},
                    "Http.Users": [{{"Name": "a", "IsSpecial": false, "GRP_ID": 1}}],
                    "Http.Handlers": [{{"Path": "/p", "Type": "Static", "RootDir": "."}}]
                }}"#,
                port
            )
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn first_apply_fixes_server_settings() {
        let state = AppState::new(PathBuf::from("."));
        assert!(state.settings().is_none());
        state.apply_config(blob(1111));
        let s = state.settings().unwrap();
        assert_eq!(s.http_port, 1111);
        assert_eq!(s.service_name, "gw_1111");

        // later reads keep the original server settings but swap the tables
        state.apply_config(blob(2222));
        assert_eq!(state.settings().unwrap().http_port, 1111);
    }

    #[test]
    fn apply_swaps_routes_and_users() {
        let state = AppState::new(PathBuf::from("."));
        assert!(state.routes().is_empty());
        state.apply_config(blob(1111));
        assert_eq!(state.routes().len(), 1);
        assert!(state.users.get("A").is_some());
    }

    #[test]
    fn config_echo_reports_server_fields() {
        let state = AppState::new(PathBuf::from("."));
        assert_eq!(state.config_echo(), serde_json::Value::Null);
        state.apply_config(blob(1111));
        assert_eq!(state.config_echo()["Http.Port"], 1111);
    }
}
