//! The hot-swappable route table.
//!
//! Built as a pure function of the configuration blob and swapped into the
//! live state atomically. Matching is case-insensitive, longest prefix wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{clamp_timeout, HandlerEntry, ServerConfig};
use crate::dispatch::templates::PageSet;
use crate::otasker::flavor::FlavorKind;

/// Everything one procedure-gateway route needs to serve a request.
#[derive(Debug)]
pub struct GatewayRoute {
    pub flavor: FlavorKind,
    pub idle_timeout: Duration,
    pub wait_timeout: Duration,
    pub request_user_info: bool,
    pub realm: String,
    pub def_user_name: String,
    pub def_user_pass: String,
    pub before_script: String,
    pub after_script: String,
    pub param_store_proc: String,
    pub document_table: String,
    pub templates: PageSet,
    /// group id → database connect string
    pub groups: HashMap<i32, String>,
}

#[derive(Debug)]
pub enum RouteHandler {
    Redirect(String),
    Static(PathBuf),
    Gateway(Arc<GatewayRoute>),
    Soap {
        user_name: String,
        user_pass: String,
        conn_str: String,
    },
}

#[derive(Debug)]
pub struct Route {
    /// Lower-cased, leading slash, no trailing slash (except the root `/`).
    pub prefix: String,
    pub handler: RouteHandler,
}

/// The live routing table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

fn normalize_prefix(path: &str) -> String {
    let mut p = path.trim().to_lowercase();
    if !p.starts_with('/') {
        p.insert(0, '/');
    }
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

impl RouteTable {
    /// Build a fresh table from a parsed configuration.
    pub fn build(cfg: &ServerConfig) -> RouteTable {
        let mut routes = Vec::with_capacity(cfg.handlers.len());
        for entry in &cfg.handlers {
            if entry.path.is_empty() {
                continue;
            }
            let prefix = normalize_prefix(&entry.path);
            let handler = match entry.kind.as_str() {
                "Redirect" => RouteHandler::Redirect(entry.redirect_path.clone()),
                "Static" => RouteHandler::Static(PathBuf::from(&entry.root_dir)),
                "owa_classic" | "owa_apex" | "owa_ekb" => {
                    RouteHandler::Gateway(Arc::new(gateway_route(entry)))
                }
                "SOAP" => RouteHandler::Soap {
                    user_name: entry.soap_user_name.clone(),
                    user_pass: entry.soap_user_pass.clone(),
                    conn_str: entry.soap_conn_str.clone(),
                },
                other => {
                    tracing::warn!("ignoring handler \"{}\" of unknown type \"{}\"", entry.path, other);
                    continue;
                }
            };
            routes.push(Route { prefix, handler });
        }
        RouteTable { routes }
    }

    /// Longest-prefix match over a lower-cased request path. Returns the
    /// route and the remainder after the prefix (no leading slash).
    pub fn matches<'a>(&'a self, path: &'a str) -> Option<(&'a Route, &'a str)> {
        let mut best: Option<(&Route, &str)> = None;
        for route in &self.routes {
            let remainder = if route.prefix == "/" {
                path.strip_prefix('/')
            } else if path == route.prefix {
                Some("")
            } else {
                path.strip_prefix(route.prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
            };
            if let Some(rest) = remainder {
                let better = match best {
                    Some((b, _)) => route.prefix.len() > b.prefix.len(),
                    None => true,
                };
                if better {
                    best = Some((route, rest));
                }
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn flavor_of(kind: &str) -> FlavorKind {
    match kind {
        "owa_apex" => FlavorKind::Apex,
        "owa_ekb" => FlavorKind::Ekb,
        _ => FlavorKind::Classic,
    }
}

fn gateway_route(entry: &HandlerEntry) -> GatewayRoute {
    GatewayRoute {
        flavor: flavor_of(&entry.kind),
        idle_timeout: clamp_timeout(entry.session_idle_timeout_ms),
        wait_timeout: clamp_timeout(entry.session_wait_timeout_ms),
        request_user_info: entry.request_user_info,
        realm: entry.request_user_realm.clone(),
        def_user_name: entry.def_user_name.clone(),
        def_user_pass: entry.def_user_pass.clone(),
        before_script: entry.before_script.clone(),
        after_script: entry.after_script.clone(),
        param_store_proc: entry.param_store_proc.clone(),
        document_table: entry.document_table.clone(),
        templates: PageSet::new(&entry.templates),
        groups: entry
            .user_groups
            .iter()
            .map(|g| (g.id, g.sid.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UNBOUNDED_TIMEOUT;

    fn table() -> RouteTable {
        let cfg = ServerConfig::parse(
            br#"{
            "Http.Handlers": [
                {"Path": "/", "Type": "Redirect", "RedirectPath": "/images"},
                {"Path": "/images", "Type": "Static", "RootDir": "./Images"},
                {"Path": "/TI8", "Type": "owa_classic",
                 "owa.SessionIdleTimeout": 240000, "owa.SessionWaitTimeout": -1,
                 "owa.UserGroups": [{"ID": 1, "SID": "db1"}]},
                {"Path": "/ti8/nested", "Type": "SOAP"}
            ]
        }"#,
        )
        .unwrap();
        RouteTable::build(&cfg)
    }

    #[test]
    fn builds_every_known_variant() {
        let t = table();
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn longest_prefix_wins_case_insensitively() {
        let t = table();
        let (route, rest) = t.matches("/ti8/test_p").unwrap();
        assert_eq!(route.prefix, "/ti8");
        assert_eq!(rest, "test_p");

        let (route, rest) = t.matches("/ti8/nested/fn").unwrap();
        assert_eq!(route.prefix, "/ti8/nested");
        assert_eq!(rest, "fn");

        let (route, rest) = t.matches("/images/dir/100.html").unwrap();
        assert!(matches!(route.handler, RouteHandler::Static(_)));
        assert_eq!(rest, "dir/100.html");
    }

    #[test]
    fn root_redirect_catches_everything_else() {
        let t = table();
        let (route, rest) = t.matches("/").unwrap();
        assert!(matches!(route.handler, RouteHandler::Redirect(_)));
        assert_eq!(rest, "");
        let (route, _) = t.matches("/elsewhere").unwrap();
        assert!(matches!(route.handler, RouteHandler::Redirect(_)));
    }

    #[test]
    fn gateway_timeouts_are_clamped() {
        let t = table();
        let (route, _) = t.matches("/ti8/x").unwrap();
        let RouteHandler::Gateway(gw) = &route.handler else {
            panic!("expected a gateway route");
        };
        assert_eq!(gw.idle_timeout, Duration::from_millis(240000));
        assert_eq!(gw.wait_timeout, UNBOUNDED_TIMEOUT);
        assert_eq!(gw.groups[&1], "db1");
    }

    #[test]
    fn prefix_must_end_on_a_segment_boundary() {
        let t = table();
        let (route, _) = t.matches("/ti8extra").unwrap();
        // not the gateway: `/ti8extra` only matches the root handler
        assert!(matches!(route.handler, RouteHandler::Redirect(_)));
    }

    #[test]
    fn unknown_types_and_empty_paths_are_skipped() {
        let cfg = ServerConfig::parse(
            br#"{"Http.Handlers": [
                {"Path": "", "Type": "Static"},
                {"Path": "/x", "Type": "Bogus"}
            ]}"#,
        )
        .unwrap();
        let t = RouteTable::build(&cfg);
        assert!(t.is_empty());
    }
}
