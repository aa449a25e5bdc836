//! End-to-end dispatch tests: route matching, static and redirect handlers,
//! the debug surface, and the gateway paths that do not require a database.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use http::{header, Request, StatusCode};
use tower::util::ServiceExt;

use owagate::config::ServerConfig;
use owagate::state::AppState;

fn config_blob(static_root: &str) -> String {
    format!(
        r#"{{
        "Service.Name": "gw",
        "Service.DisplayName": "Gateway",
        "Http.Port": 10111,
        "Http.LogDir": "${{APP_DIR}}/log/",
        "Http.Users": [
            {{"Name": "a", "IsSpecial": false, "GRP_ID": 1}},
            {{"Name": "nogroup", "IsSpecial": false, "GRP_ID": 99}}
        ],
        "Http.Handlers": [
            {{"Path": "/", "Type": "Redirect", "RedirectPath": "/images"}},
            {{"Path": "/images", "Type": "Static", "RootDir": "{root}"}},
            {{
                "Path": "/ti8",
                "Type": "owa_classic",
                "owa.SessionIdleTimeout": 1000,
                "owa.SessionWaitTimeout": 1000,
                "owa.ReqUserInfo": true,
                "owa.ReqUserRealm": "ti8",
                "owa.Templates": [
                    {{"Code": "error", "Body": "<p>err: {{{{ ErrMsg }}}}</p>"}},
                    {{"Code": "rbreakr", "Body": "<p>break sent</p>"}}
                ],
                "owa.UserGroups": [{{"ID": 1, "SID": "db1"}}]
            }}
        ]
    }}"#,
        root = static_root
    )
}

fn state_with_config(static_root: &str, base: &std::path::Path) -> Arc<AppState> {
    let state = AppState::new(base.to_path_buf());
    let cfg = ServerConfig::parse(config_blob(static_root).as_bytes()).unwrap();
    state.apply_config(cfg);
    state
}

fn request(method: &str, uri: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "gw.test:10111")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    req
}

fn request_as(method: &str, uri: &str, user: &str, pass: &str) -> Request<Body> {
    use base64::Engine;
    let mut req = request(method, uri);
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Basic {}", token).parse().unwrap(),
    );
    req
}

async fn body_string(res: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn static_handler_serves_file_contents() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("files").join("dir")).unwrap();
    std::fs::write(dir.path().join("files").join("dir").join("100.html"), "100").unwrap();

    let root = dir.path().join("files");
    let state = state_with_config(&root.to_string_lossy(), dir.path());
    let app = owagate::server::router(state);

    let res = app
        .oneshot(request("GET", "/images/dir/100.html"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "100");
}

#[tokio::test]
async fn root_redirect_points_at_images() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_config(".", dir.path());
    let app = owagate::server::router(state);

    let res = app.oneshot(request("GET", "/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(res.headers()[header::LOCATION], "/images");
}

#[tokio::test]
async fn debug_surface_echoes_config_and_users() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_config(".", dir.path());
    let app = owagate::server::router(state);

    let res = app
        .clone()
        .oneshot(request("GET", "/debug/conf/server"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(v["Http.Port"], 10111);
    assert_eq!(v["Service.Name"], "gw");

    let res = app
        .clone()
        .oneshot(request("GET", "/debug/conf/users"))
        .await
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert_eq!(v[0]["Name"], "a");
    assert_eq!(v[1]["GRP_ID"], 99);

    let res = app
        .oneshot(request("GET", "/debug/metrics/vars"))
        .await
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
    assert!(v.get("number_of_sessions").is_some());
}

#[tokio::test]
async fn unrouted_path_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(dir.path().to_path_buf());
    // no configuration applied: nothing routes
    let app = owagate::server::router(state);
    let res = app.oneshot(request("GET", "/anything")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_requires_basic_auth() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_config(".", dir.path());
    let app = owagate::server::router(state);

    let res = app.oneshot(request("GET", "/ti8/test_p")).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let challenge = res.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert_eq!(challenge, "Basic realm=\"gw.test:10111ti8\"");
}

#[tokio::test]
async fn unknown_user_or_group_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_config(".", dir.path());
    let app = owagate::server::router(state);

    let res = app
        .clone()
        .oneshot(request_as("GET", "/ti8/test_p", "stranger", "x"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // configured user whose group has no connect string
    let res = app
        .oneshot(request_as("GET", "/ti8/test_p", "nogroup", "x"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sessions_page_renders_without_auth() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_config(".", dir.path());
    let app = owagate::server::router(state);

    let res = app
        .oneshot(request("GET", "/ti8/!?Sort=UserName"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_string(res).await;
    assert!(body.contains("Virtual path sessions"));
}

#[tokio::test]
async fn break_session_on_idle_session_renders_the_interstitial() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_config(".", dir.path());
    let app = owagate::server::router(state);

    let res = app
        .oneshot(request_as("GET", "/ti8/break_session", "a", "secret"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "<p>break sent</p>");
}

#[tokio::test]
async fn gateway_route_matching_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_config(".", dir.path());
    let app = owagate::server::router(state);

    let res = app
        .oneshot(request("GET", "/TI8/!"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
