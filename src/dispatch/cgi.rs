//! CGI environment construction: the variables a stored procedure sees via
//! `owa_util.get_cgi_env`.

use std::collections::BTreeMap;

use http::HeaderMap;

/// Request facts the environment is derived from.
pub struct CgiRequest<'a> {
    pub method: &'a str,
    /// e.g. `HTTP/1.1`
    pub proto: &'a str,
    /// The `Host` header as received (may carry a port).
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub remote_addr: &'a str,
    pub headers: &'a HeaderMap,
    pub tls: bool,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Build the environment map for one request.
pub fn make_env_params(
    req: &CgiRequest<'_>,
    document_table: &str,
    remote_user: &str,
    mirror_path: &str,
) -> BTreeMap<String, String> {
    let (https, port_secure) = if req.tls { ("Y", "1") } else { ("N", "0") };

    let mut host_parts = req.host.splitn(2, ':');
    let host = host_parts.next().unwrap_or_default();
    let port = host_parts.next().unwrap_or_default();

    let mut env = BTreeMap::new();
    let mut put = |k: &str, v: &str| {
        env.insert(k.to_string(), v.to_string());
    };

    put("SERVER_SOFTWARE", "owagate");
    put("SERVER_NAME", host);
    put("GATEWAY_INTERFACE", "CGI/1.1");
    put("REMOTE_HOST", req.remote_addr);
    put("REMOTE_ADDR", req.remote_addr);
    put("AUTH_TYPE", header(req.headers, "authorization"));
    put("REMOTE_USER", remote_user);
    put("REMOTE_IDENT", remote_user);
    put("HTTP_ACCEPT", header(req.headers, "accept"));
    put("HTTP_USER_AGENT", header(req.headers, "user-agent"));
    put("SERVER_PROTOCOL", req.proto);
    put("SERVER_PORT", port);
    put("SCRIPT_NAME", "");
    put("PATH_INFO", req.path);
    put("PATH_TRANSLATED", "");
    put("HTTP_REFERER", header(req.headers, "referer"));
    put("HTTP_COOKIE", header(req.headers, "cookie"));
    put("HTTP_ACCEPT_ENCODING", header(req.headers, "accept-encoding"));
    put("HTTP_ACCEPT_CHARSET", header(req.headers, "accept-charset"));
    put("HTTP_ACCEPT_LANGUAGE", header(req.headers, "accept-language"));
    put("PLSQL_GATEWAY", "WebDb");
    put("GATEWAY_IVERSION", "3");
    put("DOCUMENT_TABLE", document_table);
    put("QUERY_STRING", req.query);
    put("HTTPS", https);
    put("SERVER_PORT_SECURE", port_secure);
    put("HTTPS_SESSIONID", header(req.headers, "HTTPS_SESSIONID"));
    put("HTTPS_KEYSIZE", header(req.headers, "HTTPS_KEYSIZE"));
    put("HTTPS_SERVER_ISSUER", header(req.headers, "HTTPS_SERVER_ISSUER"));
    put(
        "HTTPS_SERVER_SUBJECT",
        header(req.headers, "HTTPS_SERVER_SUBJECT"),
    );
    // lower-case duplicates of the common HTTP_* entries
    put("cookie", header(req.headers, "cookie"));
    put("user-agent", header(req.headers, "user-agent"));
    put("referer", header(req.headers, "referer"));
    put("accept", header(req.headers, "accept"));
    put("accept-encoding", header(req.headers, "accept-encoding"));
    put("accept-language", header(req.headers, "accept-language"));
    put("pragma", header(req.headers, "pragma"));
    put("REQUEST_CHARSET", "AL32UTF8");
    put("REQUEST_IANA_CHARSET", "");
    put("REQUEST_METHOD", req.method);
    put("REQUEST_PROTOCOL", req.proto);
    put("REQUEST_SCHEME", req.proto);
    put("AUTHORIZATION", header(req.headers, "authorization"));
    put("MIRROR_PATH", mirror_path);
    env
}
