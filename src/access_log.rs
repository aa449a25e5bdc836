//! The per-request access log.
//!
//! One CSV line per request, appended to `${LOG_DIR}/ex${DATE}.log` by a
//! dedicated writer thread; the file is reopened when the date changes.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};

use chrono::Local;

use crate::config::{ensure_parent_dir, Expander};

const FILE_PATTERN: &str = "${LOG_DIR}/ex${DATE}.log";

/// Handle to the writer thread. Lines logged before `start` are dropped,
/// matching a gateway that has not finished its first configuration read.
#[derive(Default)]
pub struct AccessLog {
    tx: Mutex<Option<SyncSender<String>>>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the writer thread once the log directory is known.
    pub fn start(&self, expander: Arc<Expander>) {
        let (tx, rx) = sync_channel::<String>(10_000);
        {
            let mut guard = self.tx.lock().expect("access log poisoned");
            if guard.is_some() {
                return;
            }
            *guard = Some(tx);
        }
        let writer = move || {
            let mut current_date = String::new();
            let mut file: Option<std::fs::File> = None;
            while let Ok(line) = rx.recv() {
                let today = Local::now().format("%Y_%m_%d").to_string();
                if today != current_date || file.is_none() {
                    let path = expander.expand_path(FILE_PATTERN);
                    ensure_parent_dir(&path);
                    match OpenOptions::new().create(true).append(true).open(&path) {
                        Ok(f) => {
                            file = Some(f);
                            current_date = today;
                        }
                        Err(err) => {
                            tracing::error!(
                                "unable to open access log {}: {}",
                                path.display(),
                                err
                            );
                            continue;
                        }
                    }
                }
                if let Some(f) = file.as_mut() {
                    if let Err(err) = f.write_all(line.as_bytes()) {
                        tracing::error!("access log write failed: {}", err);
                    }
                }
            }
        };
        if let Err(err) = std::thread::Builder::new()
            .name("owagate-access-log".into())
            .spawn(writer)
        {
            tracing::error!("unable to spawn access log writer: {}", err);
        }
    }

    /// Queue one formatted line. Never blocks the request path: a full queue
    /// drops the line.
    pub fn log(&self, line: String) {
        if let Some(tx) = self.tx.lock().expect("access log poisoned").as_ref() {
            let _ = tx.try_send(line);
        }
    }
}

/// Format one access log record.
#[allow(clippy::too_many_arguments)]
pub fn format_line(
    remote_addr: &str,
    user: &str,
    proto: &str,
    host: &str,
    response_len: usize,
    request_len: i64,
    elapsed: std::time::Duration,
    status: u16,
    method: &str,
    url: &str,
) -> String {
    let now = Local::now();
    format!(
        "{}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {:?}\r\n",
        remote_addr,
        if user.is_empty() { "-" } else { user },
        now.format("%Y.%m.%d"),
        now.format("%H:%M:%S.%f"),
        proto,
        host,
        response_len,
        request_len,
        elapsed.as_millis(),
        status,
        method,
        url,
        elapsed,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn format_line_is_csv_with_crlf() {
        let line = format_line(
            "10.0.0.1:5000",
            "scott",
            "HTTP/1.1",
            "gw:10111",
            42,
            7,
            Duration::from_millis(12),
            200,
            "GET",
            "/ti8/test_p?ap=1",
        );
        assert!(line.ends_with("\r\n"));
        assert!(line.starts_with("10.0.0.1:5000, scott, "));
        assert!(line.contains(", 42, 7, 12, 200, GET, /ti8/test_p?ap=1, "));
    }

    #[test]
    fn anonymous_user_renders_as_dash() {
        let line = format_line(
            "a",
            "",
            "HTTP/1.1",
            "h",
            0,
            0,
            Duration::ZERO,
            401,
            "GET",
            "/",
        );
        assert!(line.contains("a, -, "));
    }

    #[test]
    fn writer_appends_to_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new();
        log.start(Arc::new(Expander::new(
            PathBuf::from(dir.path()),
            "${APP_DIR}/log/".into(),
            "svc".into(),
        )));
        log.log("one\r\n".into());
        log.log("two\r\n".into());
        // the writer thread needs a moment
        let expected = dir
            .path()
            .join("log")
            .join(format!("ex{}.log", Local::now().format("%Y_%m_%d")));
        for _ in 0..100 {
            if expected.exists()
                && std::fs::read_to_string(&expected)
                    .map(|s| s.contains("two"))
                    .unwrap_or(false)
            {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("access log lines never hit the file");
    }
}
