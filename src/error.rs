//! Gateway error types.

use thiserror::Error;

/// Result type alias using the gateway error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by the database driver.
    #[error("database error: {0}")]
    Driver(#[from] oracle::Error),

    /// PL/SQL exception captured by a wrapper block into its output binds.
    /// Carries the backtrace the wrapper collected; the trace goes to the
    /// error-dump artifact, never to the client.
    #[error("ORA-{:05}: {}", .code.abs(), .message)]
    Ora {
        code: i32,
        message: String,
        trace: String,
    },

    /// A procedure (or one of its arguments) has no cached descriptor.
    #[error("no description for procedure \"{0}\"")]
    DescriptorMissing(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// The Oracle error code behind this error, if there is one.
    ///
    /// Driver errors and wrapper-captured PL/SQL exceptions both carry a
    /// numeric code; everything else does not. PL/SQL reports negative codes
    /// (`SQLCODE`), the driver positive ones; both are normalized to the
    /// positive form here.
    pub fn ora_code(&self) -> Option<i32> {
        match self {
            Error::Driver(err) => match err {
                oracle::Error::OciError(db) | oracle::Error::DpiError(db) => Some(db.code().abs()),
                _ => None,
            },
            Error::Ora { code, .. } => Some(code.abs()),
            _ => None,
        }
    }

    /// The PL/SQL backtrace, when one was captured.
    pub fn ora_trace(&self) -> Option<&str> {
        match self {
            Error::Ora { trace, .. } if !trace.is_empty() => Some(trace),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ora_code_normalizes_sign() {
        let err = Error::Ora {
            code: -20000,
            message: "boom".into(),
            trace: String::new(),
        };
        assert_eq!(err.ora_code(), Some(20000));
    }

    #[test]
    fn non_database_errors_have_no_code() {
        assert_eq!(Error::Config("x".into()).ora_code(), None);
        assert_eq!(Error::Internal("x".into()).ora_code(), None);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = Error::Ora {
            code: -6564,
            message: "name not resolved".into(),
            trace: String::new(),
        };
        assert_eq!(err.to_string(), "ORA-06564: name not resolved");
    }
}
