//! Error-dump artifact.
//!
//! Written before the tasker drops its connection, so the dump always carries
//! the last executed statement and its echo form with literal values.

use std::path::Path;

use chrono::Local;

/// Write one dump file. Failures are logged and swallowed: the dump is a
/// diagnostic aid, never a reason to fail the request further.
pub fn write_dump(
    path: &Path,
    user_name: &str,
    conn_str: &str,
    statement: &str,
    error_text: &str,
    echo_statement: &str,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    // UTF-8 BOM, CRLF line endings: the file opens cleanly in legacy viewers
    buf.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    let mut line = |s: &str| {
        buf.extend_from_slice(s.replace('\n', "\r\n").as_bytes());
        buf.extend_from_slice(b"\r\n");
    };
    line(&format!("User name : {}", user_name));
    line(&format!("Connect string : {}", conn_str));
    line(&format!("Occurred at : {}", Local::now().to_rfc2822()));
    line("******* SQL text ***********************************");
    line(statement);
    line("******* SQL text end *******************************");
    line("");
    line("******* Error text *********************************");
    line(error_text);
    line("******* Error text end *****************************");
    line("");
    line("******* SQL text with parameters *******************");
    line(echo_statement);
    line("******* SQL text with parameters end ***************");

    if let Some(dir) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::warn!("unable to create dump directory {}: {}", dir.display(), err);
            return;
        }
    }
    if let Err(err) = std::fs::write(path, &buf) {
        tracing::warn!("unable to write error dump {}: {}", path.display(), err);
    }
}
