//! SOAP relay: POST bodies are handed to a stored function taking and
//! returning a CLOB, on a per-request connection.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};
use oracle::sql_type::OracleType;

use crate::error::{Error, Result};

fn error_response(status: StatusCode, msg: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        msg,
    )
        .into_response()
}

fn valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '#'))
}

/// Handle one relay request.
pub async fn handle(
    user_name: &str,
    user_pass: &str,
    conn_str: &str,
    function: &str,
    method: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    if method != "POST" {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("soap: POST method required, received {}", method),
        );
    }
    if headers.get("soapaction").is_none() {
        return error_response(StatusCode::BAD_REQUEST, "soap: SOAPAction required".into());
    }
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "soap: Body required".into());
    }
    if !valid_function_name(function) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("soap: invalid function name \"{}\"", function),
        );
    }
    let request = match String::from_utf8(body.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "soap: Body must be UTF-8".into())
        }
    };

    let user = user_name.to_string();
    let pass = user_pass.to_string();
    let conn = conn_str.to_string();
    let function = function.to_string();
    let relayed = tokio::task::spawn_blocking(move || relay(&user, &pass, &conn, &function, &request))
        .await
        .map_err(|e| Error::Internal(e.to_string()));

    match relayed {
        Ok(Ok(out)) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/soap+xml; charset=utf-8",
            )],
            out,
        )
            .into_response(),
        Ok(Err(err)) | Err(err) => {
            error_response(StatusCode::BAD_REQUEST, format!("soap: {}", err))
        }
    }
}

fn relay(user: &str, pass: &str, conn_str: &str, function: &str, request: &str) -> Result<String> {
    let sql = format!(
        "DECLARE t CLOB := EMPTY_CLOB(); BEGIN t := {}(:1); :2 := t; \
         dbms_session.modify_package_state(dbms_session.reinitialize); END;",
        function
    );
    let conn = oracle::Connection::connect(user, pass, conn_str)?;
    let result = (|| -> Result<String> {
        let mut stmt = conn.statement(&sql).build()?;
        stmt.bind(1, &request)?;
        stmt.bind(2, &OracleType::CLOB)?;
        stmt.execute(&[])?;
        Ok(stmt
            .bind_value::<_, Option<String>>(2)?
            .unwrap_or_default())
    })();
    if let Err(err) = conn.close() {
        tracing::debug!("soap connection close reported: {}", err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_post() {
        let res = handle("u", "p", "db", "fn", "GET", &HeaderMap::new(), Bytes::new()).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn requires_soapaction_and_body() {
        let res = handle(
            "u",
            "p",
            "db",
            "fn",
            "POST",
            &HeaderMap::new(),
            Bytes::from_static(b"<e/>"),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let mut headers = HeaderMap::new();
        headers.insert("soapaction", "x".parse().unwrap());
        let res = handle("u", "p", "db", "fn", "POST", &headers, Bytes::new()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejects_hostile_function_names() {
        let mut headers = HeaderMap::new();
        headers.insert("soapaction", "x".parse().unwrap());
        let res = handle(
            "u",
            "p",
            "db",
            "f(); drop table t; --",
            "POST",
            &headers,
            Bytes::from_static(b"<e/>"),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn function_name_validation() {
        assert!(valid_function_name("pkg.do_soap$1"));
        assert!(!valid_function_name(""));
        assert!(!valid_function_name("a b"));
        assert!(!valid_function_name("a;b"));
    }
}
