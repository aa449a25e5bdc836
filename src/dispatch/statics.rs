//! Static-file and redirect handlers.

use std::path::Path;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{header, Request, StatusCode};
use tower::util::ServiceExt;
use tower_http::services::ServeDir;

/// Permanent redirect to a fixed target.
pub fn redirect(target: &str) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, target.to_string())],
        "",
    )
        .into_response()
}

/// Serve a file from the handler's root; `rest` is the path remainder after
/// the route prefix.
pub async fn serve(root: &Path, rest: &str) -> Response {
    let req = match Request::builder()
        .uri(format!("/{}", rest))
        .body(Body::empty())
    {
        Ok(req) => req,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match ServeDir::new(root).oneshot(req).await {
        Ok(res) => res.map(Body::new).into_response(),
        Err(err) => {
            tracing::error!("static file serving failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_carries_location() {
        let res = redirect("/images");
        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[header::LOCATION], "/images");
    }

    #[tokio::test]
    async fn serves_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("100.html"), "100").unwrap();
        let res = serve(dir.path(), "sub/100.html").await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"100");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let res = serve(dir.path(), "nope.txt").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
