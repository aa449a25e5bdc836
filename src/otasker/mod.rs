//! The procedure-call engine: per-session workers, each owning one database
//! connection, executing generated PL/SQL wrapper blocks on behalf of HTTP
//! requests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub mod bind;
pub mod describe;
pub mod dump;
pub mod flavor;
pub mod multipart;
pub mod oracle_tasker;
pub mod stat;
pub mod textutil;
pub mod worker;

pub use describe::DescriptorCache;
pub use flavor::Flavor;
pub use multipart::{FilePart, ParsedForm};
pub use oracle_tasker::OracleTasker;
pub use stat::TaskerStat;
pub use worker::WorkerRegistry;

/// Reserved status codes layered on top of HTTP, used between the tasker and
/// the dispatcher. Part of the interstitial-page contract.
pub const STATUS_ERROR_PAGE: u16 = 561;
pub const STATUS_WAIT_PAGE: u16 = 562;
pub const STATUS_BREAK_PAGE: u16 = 563;
pub const STATUS_INTERRUPTED: u16 = 564;
pub const STATUS_INVALID_CREDENTIALS: u16 = 565;
pub const STATUS_INSUFFICIENT_PRIVILEGES: u16 = 566;
pub const STATUS_ACCOUNT_LOCKED: u16 = 567;

/// One unit of work submitted to a worker: everything the tasker needs to
/// execute a single request.
#[derive(Debug, Clone)]
pub struct Work {
    pub session_key: String,
    pub task_id: String,
    pub user_name: String,
    pub user_pass: String,
    pub conn_str: String,
    pub param_store_proc: String,
    pub before_script: String,
    pub after_script: String,
    pub document_table: String,
    pub cgi_env: BTreeMap<String, String>,
    pub proc_name: String,
    pub params: Vec<(String, Vec<String>)>,
    pub form: ParsedForm,
    pub dump_file_name: PathBuf,
}

/// The outcome of one tasker run.
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub content: Vec<u8>,
    /// Wall-clock seconds the run (or, for wait/break pages, the in-flight
    /// call) has consumed so far.
    pub duration_secs: i64,
}

impl TaskResult {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn wait_page(duration_secs: i64) -> Self {
        Self {
            status: STATUS_WAIT_PAGE,
            duration_secs,
            ..Self::default()
        }
    }

    pub fn break_page(duration_secs: i64) -> Self {
        Self {
            status: STATUS_BREAK_PAGE,
            duration_secs,
            ..Self::default()
        }
    }
}

/// A single-threaded executor of work items. Exactly one worker thread calls
/// `run`; `control` hands out the thread-safe view used for cancellation and
/// introspection.
pub trait Tasker: Send + 'static {
    fn run(&mut self, work: &Work) -> TaskResult;

    /// Release the connection and reset the step log.
    fn close_and_free(&mut self);

    /// Shared handle for `Break` and the sessions page.
    fn control(&self) -> Arc<dyn TaskerControl>;
}

/// The cross-thread face of a tasker.
pub trait TaskerControl: Send + Sync {
    /// Cancel the in-flight call, if any, by killing its database session
    /// from a separate connection. A no-op when the tasker is idle.
    fn interrupt(&self) -> crate::error::Result<()>;

    /// Snapshot for the sessions introspection page.
    fn stat(&self, sort_key: &str) -> TaskerStat;
}

/// Map an error to the `(status, body)` pair the dispatcher understands, plus
/// a flag telling the caller to drop the connection.
pub fn pack_error(err: &crate::error::Error) -> (u16, Vec<u8>, bool) {
    match err.ora_code() {
        Some(28) | Some(31) => (STATUS_INTERRUPTED, Vec::new(), true),
        Some(1017) => (STATUS_INVALID_CREDENTIALS, Vec::new(), true),
        Some(1031) => (STATUS_INSUFFICIENT_PRIVILEGES, Vec::new(), true),
        Some(28000) => (STATUS_ACCOUNT_LOCKED, Vec::new(), true),
        Some(6564) => (http::StatusCode::NOT_FOUND.as_u16(), Vec::new(), false),
        Some(3113) | Some(3114) => (STATUS_ERROR_PAGE, err.to_string().into_bytes(), true),
        _ => (STATUS_ERROR_PAGE, err.to_string().into_bytes(), false),
    }
}
