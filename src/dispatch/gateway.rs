//! The procedure-gateway request handler: authentication, session-key and
//! task-id derivation, the submit/await protocol, and mapping of tasker
//! results onto HTTP responses and interstitial pages.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};
use uuid::Uuid;

use crate::dispatch::cgi::{make_env_params, CgiRequest};
use crate::otasker::textutil::extract_file_name;
use crate::otasker::{
    multipart, ParsedForm, TaskResult, Work, STATUS_ACCOUNT_LOCKED, STATUS_BREAK_PAGE,
    STATUS_ERROR_PAGE, STATUS_INSUFFICIENT_PRIVILEGES, STATUS_INTERRUPTED,
    STATUS_INVALID_CREDENTIALS, STATUS_WAIT_PAGE,
};
use crate::routing::GatewayRoute;
use crate::state::AppState;

/// Request facts the gateway handler works from, extracted once by the
/// dispatcher.
pub struct GatewayRequest<'a> {
    pub method: &'a str,
    pub proto: &'a str,
    pub host: &'a str,
    /// Lower-cased request path.
    pub path: &'a str,
    /// Query string after `%uXXXX` normalization.
    pub query: &'a str,
    pub headers: &'a HeaderMap,
    pub remote_addr: &'a str,
    pub body: Bytes,
}

/// Parse a Basic `Authorization` header.
pub fn basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ").or_else(|| value.strip_prefix("basic "))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// The client host used in special users' session keys: `X-Real-IP`, then
/// `X-Forwarded-For`, then the remote address; the port is stripped.
fn client_host(headers: &HeaderMap, remote_addr: &str) -> String {
    let addr = headers
        .get("x-real-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or(remote_addr);
    match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
        _ => addr.to_string(),
    }
}

/// Derive the session key coalescing requests onto one worker.
///
/// Normal users share one session per credential pair; special users get one
/// per originating host.
pub fn make_session_key(
    is_special: bool,
    user_name: &str,
    user_pass: &str,
    debug_ip: &str,
    headers: &HeaderMap,
    remote_addr: &str,
) -> String {
    let host = if is_special {
        client_host(headers, remote_addr)
    } else {
        String::new()
    };
    format!("{}|{}|{}|{}", user_name, user_pass, host, debug_ip).to_uppercase()
}

/// The task id correlating a submission with its result across interstitial
/// retries: the `MessageId` form field, or a fresh UUID.
pub fn make_task_id(form: &ParsedForm) -> String {
    match form.value("MessageId") {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// The hidden resubmission form embedded in wait/break pages. Carries every
/// body field (file fields by name only) plus the task id as `MessageId`.
pub fn make_wait_form(path: &str, query: &str, form: &ParsedForm, task_id: &str) -> String {
    let mut action = path.to_string();
    if !query.is_empty() {
        action.push('?');
        action.push_str(query);
    }
    let mut s = format!("<form id=\"__gmrf__\" action=\"{}\" method=\"post\" >\n", action);
    for (key, vals) in &form.post_params {
        for val in vals {
            s.push_str(&format!(
                "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                key,
                val.replace('"', "&quot;")
            ));
        }
    }
    for (key, parts) in &form.files {
        for part in parts {
            s.push_str(&format!(
                "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                key,
                extract_file_name(&part.content_disposition)
            ));
        }
    }
    if form.value("MessageId").is_none() {
        s.push_str(&format!(
            "<input type=\"hidden\" name=\"MessageId\" value=\"{}\">\n",
            task_id
        ));
    }
    s.push_str("</form>");
    s
}

fn html(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

fn plain(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

fn unauthorized(host: &str, realm: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}{}\"", host, realm),
        )],
        "Unauthorized",
    )
        .into_response()
}

/// Render a named interstitial page; failures fall back to the `error`
/// template, then to plain text.
fn render_page(route: &GatewayRoute, name: &str, ctx: &tera::Context) -> Response {
    match route.templates.render(name, ctx) {
        Ok(body) => html(body),
        Err(err) => render_error(route, &err.to_string()),
    }
}

fn render_error(route: &GatewayRoute, message: &str) -> Response {
    let mut ctx = tera::Context::new();
    ctx.insert("ErrMsg", message);
    match route.templates.render("error", &ctx) {
        Ok(body) => html(body),
        Err(_) => plain(
            StatusCode::OK,
            format!("Unable to find template for page \"error\": {}", message),
        ),
    }
}

/// Serve one request routed to a procedure gateway.
pub async fn handle(
    state: &Arc<AppState>,
    route: &Arc<GatewayRoute>,
    vpath: &str,
    proc_name: &str,
    req: GatewayRequest<'_>,
) -> Response {
    let form = match multipart::parse_request(
        req.query,
        req.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        req.body.clone(),
    )
    .await
    {
        Ok(form) => form,
        Err(err) => return plain(StatusCode::BAD_REQUEST, err.to_string()),
    };

    if proc_name == "!" {
        let sort = form.value("Sort").unwrap_or_default();
        let sessions = state.workers.collect(vpath, sort, false);
        let mut ctx = tera::Context::new();
        ctx.insert("Sessions", &sessions);
        return render_page(route, "sessions", &ctx);
    }

    let auth = basic_auth(req.headers);
    let remote_user = auth
        .as_ref()
        .map(|(u, _)| u.clone())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "-".to_string());

    let (user_name, user_pass) = if route.request_user_info {
        match auth {
            Some(creds) => creds,
            None => return unauthorized(req.host, &route.realm),
        }
    } else {
        (route.def_user_name.clone(), route.def_user_pass.clone())
    };

    let user = state.users.get(&user_name);
    let conn_str = user
        .and_then(|u| route.groups.get(&u.grp_id))
        .cloned()
        .unwrap_or_default();
    if conn_str.is_empty() {
        return unauthorized(req.host, &route.realm);
    }
    let is_special = user.map(|u| u.is_special).unwrap_or(false);

    let debug_ip = req
        .headers
        .get("debugip")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let session_key = make_session_key(
        is_special,
        &user_name,
        &user_pass,
        debug_ip,
        req.headers,
        req.remote_addr,
    );
    let task_id = make_task_id(&form);

    if proc_name == "break_session" {
        return match state.workers.break_session(vpath, &session_key).await {
            Ok(()) => render_page(route, "rbreakr", &tera::Context::new()),
            Err(err) => render_error(route, &err.to_string()),
        };
    }

    let cgi_env: BTreeMap<String, String> = make_env_params(
        &CgiRequest {
            method: req.method,
            proto: req.proto,
            host: req.host,
            path: req.path,
            query: req.query,
            remote_addr: req.remote_addr,
            headers: req.headers,
            tls: state.is_tls(),
        },
        &route.document_table,
        &remote_user,
        &format!("{}/", route.realm),
    );

    let dump_file_name = match state.expander() {
        Some(exp) => exp.expand_path(&format!("${{LOG_DIR}}/err_{}_${{DATETIME}}.log", user_name)),
        None => std::path::PathBuf::from(format!("err_{}.log", user_name)),
    };

    let work = Work {
        session_key: session_key.clone(),
        task_id: task_id.clone(),
        user_name: user_name.clone(),
        user_pass,
        conn_str,
        param_store_proc: route.param_store_proc.clone(),
        before_script: route.before_script.clone(),
        after_script: route.after_script.clone(),
        document_table: route.document_table.clone(),
        cgi_env,
        proc_name: proc_name.to_string(),
        params: form.params.clone(),
        form: form.clone(),
        dump_file_name,
    };

    let res = state
        .workers
        .run(vpath, route.flavor, work, route.wait_timeout, route.idle_timeout)
        .await;

    render_result(route, &req, &form, &user_name, &task_id, res)
}

fn render_result(
    route: &GatewayRoute,
    req: &GatewayRequest<'_>,
    form: &ParsedForm,
    user_name: &str,
    task_id: &str,
    mut res: TaskResult,
) -> Response {
    match res.status {
        STATUS_ERROR_PAGE => {
            render_error(route, &String::from_utf8_lossy(&res.content))
        }
        STATUS_WAIT_PAGE | STATUS_BREAK_PAGE => {
            let gmrf = make_wait_form(req.path, req.query, form, task_id);
            let mut ctx = tera::Context::new();
            ctx.insert("UserName", user_name);
            ctx.insert("Gmrf", &gmrf);
            ctx.insert("Duration", &res.duration_secs);
            let page = if res.status == STATUS_WAIT_PAGE {
                "rwait"
            } else {
                "rbreak"
            };
            render_page(route, page, &ctx)
        }
        STATUS_INTERRUPTED => render_page(route, "rwi", &tera::Context::new()),
        STATUS_INVALID_CREDENTIALS => unauthorized(req.host, ""),
        STATUS_INSUFFICIENT_PRIVILEGES => {
            render_page(route, "InsufficientPrivileges", &tera::Context::new())
        }
        STATUS_ACCOUNT_LOCKED => render_page(route, "AccountIsLocked", &tera::Context::new()),
        _ => {
            let mut location = String::new();
            let mut builder = Response::builder();
            for (name, value) in &res.headers {
                match name.to_lowercase().as_str() {
                    "status" => {
                        if let Ok(code) = value.trim().parse::<u16>() {
                            res.status = code;
                        }
                    }
                    "location" => {
                        // APEX emits an absolute form of its own base path
                        location = if value.starts_with("/f?p") {
                            value[1..].to_string()
                        } else {
                            value.clone()
                        };
                    }
                    _ => {
                        builder = builder.header(name.as_str(), value.as_str());
                    }
                }
            }
            let status =
                StatusCode::from_u16(res.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                return builder
                    .status(status)
                    .header(header::LOCATION, location)
                    .body(Body::empty())
                    .map(IntoResponse::into_response)
                    .unwrap_or_else(|e| plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
            }
            builder
                .status(status)
                .header(header::CONTENT_TYPE, &res.content_type)
                .body(Body::from(res.content))
                .map(IntoResponse::into_response)
                .unwrap_or_else(|e| plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
