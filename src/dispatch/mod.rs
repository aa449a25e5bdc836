//! Request dispatch: the front handler that matches the hot-swapped route
//! table and fans out to the per-variant handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use http::{header, StatusCode, Version};

use crate::routing::RouteHandler;
use crate::state::AppState;

pub mod cgi;
pub mod encoding;
pub mod gateway;
pub mod soap;
pub mod statics;
pub mod templates;

/// Collapse `.`/`..` segments and duplicate slashes out of the procedure
/// part of the URL.
fn clean_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out.join("/")
}

fn proto_of(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        _ => "HTTP/1.1",
    }
}

/// The fallback handler every non-debug request lands in.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    let path = parts.uri.path().to_lowercase();
    let query = encoding::fix_non_standard_percent_encoding(parts.uri.query().unwrap_or(""));
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let method = parts.method.as_str().to_string();
    let proto = proto_of(parts.version);
    let remote_addr = remote.to_string();

    let table = state.routes();
    let Some((route, rest)) = table.matches(&path) else {
        return (StatusCode::NOT_FOUND, "404 page not found").into_response();
    };

    match &route.handler {
        RouteHandler::Redirect(target) => statics::redirect(target),
        RouteHandler::Static(root) => statics::serve(root, rest).await,
        RouteHandler::Soap {
            user_name,
            user_pass,
            conn_str,
        } => {
            let function = clean_path(rest);
            soap::handle(
                user_name,
                user_pass,
                conn_str,
                function.rsplit('/').next().unwrap_or_default(),
                &method,
                &parts.headers,
                body,
            )
            .await
        }
        RouteHandler::Gateway(gw) => {
            let proc_name = clean_path(rest);
            if proc_name.is_empty() {
                return (StatusCode::NOT_FOUND, "404 page not found").into_response();
            }
            gateway::handle(
                &state,
                gw,
                &route.prefix,
                &proc_name,
                gateway::GatewayRequest {
                    method: &method,
                    proto,
                    host: &host,
                    path: &path,
                    query: &query,
                    headers: &parts.headers,
                    remote_addr: &remote_addr,
                    body,
                },
            )
            .await
        }
    }
}

/// Wrap a handler response so the access log sees status and body length.
pub async fn log_access(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();
    state.metrics.request_started();

    let method = req.method().to_string();
    let proto = proto_of(req.version());
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mut url = req.uri().path().to_string();
    if let Some(q) = req.uri().query() {
        url.push('?');
        url.push_str(q);
    }
    let request_len = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    let user = gateway::basic_auth(req.headers())
        .map(|(u, _)| u)
        .unwrap_or_default();

    let res = next.run(req).await;

    // buffer the body to learn its length; every handler already produces
    // complete responses
    let (parts, body) = res.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => bytes::Bytes::new(),
    };

    state.access_log.log(crate::access_log::format_line(
        &remote.to_string(),
        &user,
        proto,
        &host,
        bytes.len(),
        request_len,
        start.elapsed(),
        parts.status.as_u16(),
        &method,
        &url,
    ));
    state.metrics.request_finished();

    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_collapses_dots_and_slashes() {
        assert_eq!(clean_path("a/b/c"), "a/b/c");
        assert_eq!(clean_path("a//b/./c"), "a/b/c");
        assert_eq!(clean_path("a/../b"), "b");
        assert_eq!(clean_path("../../x"), "x");
        assert_eq!(clean_path(""), "");
    }
}
