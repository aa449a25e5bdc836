//! # owagate
//!
//! An HTTP gateway for Oracle stored-procedure web APIs (an OWA / mod_plsql
//! replacement). Clients issue ordinary HTTP requests whose URL path names a
//! stored procedure; the gateway binds form/query/multipart parameters to
//! typed PL/SQL arguments, runs the procedure inside a per-client pinned
//! database session, streams the response back, and upgrades slow calls into
//! a wait/break interstitial workflow backed by server-side session kill.
//!
//! Subsystems:
//!
//! - [`otasker`] — the procedure-call engine: per-session worker threads,
//!   the parameter binder, the descriptor cache, and the wait/break protocol.
//! - [`routing`] / [`dispatch`] — the config-driven route table and the
//!   front HTTP handler.
//! - [`confreader`] — the hot-reload loop fetching configuration from the
//!   database and swapping the live tables.

pub mod access_log;
pub mod config;
pub mod confreader;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod otasker;
pub mod routing;
pub mod server;
pub mod state;
pub mod users;

pub use error::{Error, Result};
pub use state::AppState;
