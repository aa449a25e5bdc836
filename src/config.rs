//! The database-provided JSON configuration.
//!
//! The whole configuration arrives as one JSON blob fetched from a stored
//! function (see `confreader`). Key names are part of the database contract,
//! including the historical `owa.ParamStroreProc` spelling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Timeouts configured negative mean "unbounded"; they clamp to a year,
/// safely below the async timer horizon.
pub const UNBOUNDED_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Convert a millisecond config value to a duration, clamping negatives.
pub fn clamp_timeout(millis: i64) -> Duration {
    if millis < 0 {
        UNBOUNDED_TIMEOUT
    } else {
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "Service.Name", default = "default_service_name")]
    pub service_name: String,

    #[serde(rename = "Service.DisplayName", default = "default_service_display_name")]
    pub service_display_name: String,

    #[serde(rename = "Http.Port", default = "default_http_port")]
    pub http_port: u16,

    /// Zero disables the debug listener.
    #[serde(rename = "Http.DebugPort", default)]
    pub http_debug_port: u16,

    #[serde(rename = "Http.ReadTimeout", default = "default_http_timeout")]
    pub http_read_timeout_ms: i64,

    #[serde(rename = "Http.WriteTimeout", default = "default_http_timeout")]
    pub http_write_timeout_ms: i64,

    #[serde(rename = "Http.SSL", default)]
    pub http_ssl: bool,

    /// PEM text, not a path.
    #[serde(rename = "Http.SSLCert", default)]
    pub http_ssl_cert: String,

    #[serde(rename = "Http.SSLKey", default)]
    pub http_ssl_key: String,

    #[serde(rename = "Http.LogDir", default = "default_log_dir")]
    pub http_log_dir: String,

    #[serde(rename = "Http.Users", default)]
    pub users: Vec<UserEntry>,

    #[serde(rename = "Http.Handlers", default)]
    pub handlers: Vec<HandlerEntry>,
}

fn default_service_name() -> String {
    "owagate".to_string()
}

fn default_service_display_name() -> String {
    "owagate server".to_string()
}

fn default_http_port() -> u16 {
    10111
}

fn default_http_timeout() -> i64 {
    15000
}

fn default_log_dir() -> String {
    "${APP_DIR}/log/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IsSpecial", default)]
    pub is_special: bool,
    #[serde(rename = "GRP_ID", default)]
    pub grp_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Body")]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    #[serde(rename = "ID")]
    pub id: i32,
    #[serde(rename = "SID")]
    pub sid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerEntry {
    #[serde(rename = "Path", default)]
    pub path: String,

    /// `Redirect`, `Static`, `owa_classic`, `owa_apex`, `owa_ekb` or `SOAP`.
    #[serde(rename = "Type", default)]
    pub kind: String,

    #[serde(rename = "RootDir", default)]
    pub root_dir: String,

    #[serde(rename = "RedirectPath", default)]
    pub redirect_path: String,

    /// Milliseconds; negative means unbounded.
    #[serde(rename = "owa.SessionIdleTimeout", default = "default_unbounded")]
    pub session_idle_timeout_ms: i64,

    #[serde(rename = "owa.SessionWaitTimeout", default = "default_unbounded")]
    pub session_wait_timeout_ms: i64,

    #[serde(rename = "owa.ReqUserInfo", default)]
    pub request_user_info: bool,

    #[serde(rename = "owa.ReqUserRealm", default)]
    pub request_user_realm: String,

    #[serde(rename = "owa.DBUserName", default)]
    pub def_user_name: String,

    #[serde(rename = "owa.DBUserPass", default)]
    pub def_user_pass: String,

    #[serde(rename = "owa.BeforeScript", default)]
    pub before_script: String,

    #[serde(rename = "owa.AfterScript", default)]
    pub after_script: String,

    #[serde(rename = "owa.ParamStroreProc", default)]
    pub param_store_proc: String,

    #[serde(rename = "owa.DocumentTable", default)]
    pub document_table: String,

    #[serde(rename = "owa.Templates", default)]
    pub templates: Vec<TemplateEntry>,

    #[serde(rename = "owa.UserGroups", default)]
    pub user_groups: Vec<GroupEntry>,

    #[serde(rename = "soap.DBUserName", default)]
    pub soap_user_name: String,

    #[serde(rename = "soap.DBUserPass", default)]
    pub soap_user_pass: String,

    #[serde(rename = "soap.DBConnStr", default)]
    pub soap_conn_str: String,
}

fn default_unbounded() -> i64 {
    -1
}

impl ServerConfig {
    pub fn parse(blob: &[u8]) -> Result<ServerConfig> {
        Ok(serde_json::from_slice(blob)?)
    }

    /// The server-level fields echoed at `/debug/conf/server`.
    pub fn server_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "Service.Name": self.service_name,
            "Service.DisplayName": self.service_display_name,
            "Http.Port": self.http_port,
            "Http.DebugPort": self.http_debug_port,
            "Http.ReadTimeout": self.http_read_timeout_ms,
            "Http.WriteTimeout": self.http_write_timeout_ms,
            "Http.SSL": self.http_ssl,
            "Http.SSLCert": self.http_ssl_cert,
            "Http.SSLKey": self.http_ssl_key,
            "Http.LogDir": self.http_log_dir,
        })
    }
}

/// File-name pattern expansion for log artifacts.
///
/// Supported variables (case-insensitive): `${APP_DIR}`, `${LOG_DIR}`,
/// `${SERVICE_NAME}`, `${DATE}`, `${TIME}`, `${DATETIME}`. `${LOG_DIR}`
/// expands recursively so the configured log dir may itself use variables.
#[derive(Debug, Clone)]
pub struct Expander {
    pub base_dir: PathBuf,
    pub log_dir: String,
    pub service_name: String,
}

impl Expander {
    pub fn new(base_dir: PathBuf, log_dir: String, service_name: String) -> Self {
        Self {
            base_dir,
            log_dir,
            service_name,
        }
    }

    pub fn expand(&self, pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len());
        let mut rest = pattern;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            match rest[start + 2..].find('}') {
                Some(end) => {
                    let key = &rest[start + 2..start + 2 + end];
                    out.push_str(&self.value_of(key));
                    rest = &rest[start + 2 + end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn expand_path(&self, pattern: &str) -> PathBuf {
        PathBuf::from(self.expand(pattern))
    }

    fn value_of(&self, key: &str) -> String {
        let now = Local::now();
        match key.to_uppercase().as_str() {
            "APP_DIR" => self.base_dir.to_string_lossy().into_owned(),
            "LOG_DIR" => self.expand(&self.log_dir),
            "SERVICE_NAME" => self.service_name.clone(),
            "DATE" => now.format("%Y_%m_%d").to_string(),
            "TIME" => now.format("T%H_%M_%S_%f").to_string(),
            "DATETIME" => now.format("%Y_%m_%d %H_%M_%S_%f").to_string(),
            _ => String::new(),
        }
    }
}

/// Directory part of a file name, created if missing.
pub fn ensure_parent_dir(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::warn!("unable to create directory {}: {}", dir.display(), err);
        }
    }
}
