//! The configuration reader.
//!
//! A dedicated thread polls a stored function for the JSON configuration
//! blob, keeping one connection alive between polls (ping, reconnect on
//! failure). Only a byte-for-byte different blob is re-parsed and applied.
//! The first read runs synchronously at startup; a failure there aborts the
//! service, later failures keep the live tables untouched.

use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::state::AppState;

const STM_READ_CONFIG: &str = "select c.config(:1, :2) from dual";

/// Split a `user/password@sid` DSN.
pub fn split_dsn(dsn: &str) -> Result<(String, String, String)> {
    let (creds, sid) = dsn
        .rsplit_once('@')
        .ok_or_else(|| Error::Config(format!("DSN \"{}\" is missing \"@sid\"", dsn)))?;
    let (user, pass) = creds
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("DSN \"{}\" is missing \"user/password\"", dsn)))?;
    if user.is_empty() || sid.is_empty() {
        return Err(Error::Config(format!("DSN \"{}\" is incomplete", dsn)));
    }
    Ok((user.to_string(), pass.to_string(), sid.to_string()))
}

pub struct ConfReader {
    user: String,
    pass: String,
    sid: String,
    config_name: String,
    hostname: String,
    state: Arc<AppState>,
    conn: Option<oracle::Connection>,
    prev_blob: Vec<u8>,
}

impl ConfReader {
    pub fn new(
        dsn: &str,
        config_name: &str,
        hostname: String,
        state: Arc<AppState>,
    ) -> Result<Self> {
        let (user, pass, sid) = split_dsn(dsn)?;
        Ok(Self {
            user,
            pass,
            sid,
            config_name: config_name.to_string(),
            hostname,
            state,
            conn: None,
            prev_blob: Vec::new(),
        })
    }

    /// One poll: fetch the blob, and when it changed, parse it and swap the
    /// live tables.
    pub fn read_and_apply(&mut self) -> Result<()> {
        let blob = self.read_config()?;
        if blob == self.prev_blob {
            return Ok(());
        }
        let cfg = ServerConfig::parse(&blob)
            .map_err(|e| Error::Config(format!("error parsing configuration: {}", e)))?;
        self.state.apply_config(cfg);
        self.prev_blob = blob;
        Ok(())
    }

    fn read_config(&mut self) -> Result<Vec<u8>> {
        if let Some(conn) = self.conn.as_ref() {
            if conn.ping().is_err() {
                if let Some(old) = self.conn.take() {
                    let _ = old.close();
                }
            }
        }
        if self.conn.is_none() {
            tracing::info!("configuration reader connecting as {}@{}", self.user, self.sid);
            self.conn = Some(oracle::Connection::connect(
                &self.user,
                &self.pass,
                &self.sid,
            )?);
        }
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Error::Internal("configuration connection unavailable".into()))?;

        let blob: String = conn.query_row_as(
            STM_READ_CONFIG,
            &[&self.config_name, &self.hostname],
        )?;
        if blob.is_empty() {
            return Err(Error::Config("configuration data size is 0".into()));
        }
        if blob == "{}" {
            return Err(Error::Config(format!(
                "configuration \"{}\" does not exist",
                self.config_name
            )));
        }
        Ok(blob.into_bytes())
    }

    /// Start the poll loop. The returned handle stops it.
    pub fn spawn(mut self, period: Duration) -> ReaderHandle {
        let (stop_tx, stop_rx) = sync_channel::<()>(1);
        let metrics = self.state.metrics.clone();
        let join = std::thread::Builder::new()
            .name("owagate-confreader".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        if let Some(conn) = self.conn.take() {
                            let _ = conn.close();
                        }
                        return;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let bg = Instant::now();
                        match self.read_and_apply() {
                            Ok(()) => tracing::info!(
                                "configuration was read in {:.4} seconds",
                                bg.elapsed().as_secs_f64()
                            ),
                            Err(err) => tracing::warn!(
                                "configuration was read in {:.4} seconds with error: {}",
                                bg.elapsed().as_secs_f64(),
                                err
                            ),
                        }
                        metrics.set_config_read_duration(bg.elapsed());
                    }
                }
            })
            .expect("unable to spawn configuration reader thread");
        ReaderHandle {
            stop_tx,
            join: Some(join),
        }
    }
}

/// Stops the reader thread when shut down (or dropped).
pub struct ReaderHandle {
    stop_tx: SyncSender<()>,
    join: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_dsn_accepts_the_usual_form() {
        let (u, p, s) = split_dsn("scott/tiger@db1").unwrap();
        assert_eq!((u.as_str(), p.as_str(), s.as_str()), ("scott", "tiger", "db1"));
    }

    #[test]
    fn split_dsn_keeps_at_signs_in_the_sid() {
        // the sid may be a full descriptor; only the last @ splits
        let (u, _, s) = split_dsn("a/b@//host:1521/svc").unwrap();
        assert_eq!(u, "a");
        assert_eq!(s, "//host:1521/svc");
    }

    #[test]
    fn split_dsn_rejects_malformed_input() {
        assert!(split_dsn("no-sid").is_err());
        assert!(split_dsn("nopass@sid").is_err());
        assert!(split_dsn("/p@sid").is_err());
        assert!(split_dsn("u/p@").is_err());
    }
}
