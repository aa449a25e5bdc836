//! Listener bring-up: the main HTTP(S) listener, the optional debug
//! listener, and graceful shutdown.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::serve::ListenerExt;
use axum::Json;
use axum::Router;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tower_http::limit::RequestBodyLimitLayer;

use crate::dispatch;
use crate::error::{Error, Result};
use crate::otasker::multipart::MAX_FORM_BYTES;
use crate::state::AppState;

/// Run the gateway until a shutdown signal arrives. Requires the first
/// configuration read to have fixed the server settings.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let settings = state
        .settings()
        .ok_or_else(|| Error::Config("server settings not initialized".into()))?;

    if settings.http_debug_port != 0 {
        let debug_app = debug_router(state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_debug_port));
        tracing::info!("debug listener starting on port \"{}\"", settings.http_debug_port);
        tokio::spawn(async move {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(err) = axum::serve(listener, debug_app).await {
                        tracing::error!("debug listener failed: {}", err);
                    }
                }
                Err(err) => tracing::error!("unable to bind debug listener: {}", err),
            }
        });
    }

    let app = router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let listener = TcpListener::bind(addr).await?;

    if settings.http_ssl {
        tracing::info!(
            "main listener starting on port \"{}\" with SSL support",
            settings.http_port
        );
        let tls = tls_config_from_pem(&settings.http_ssl_cert, &settings.http_ssl_key)?;
        axum::serve(
            TlsListener::new(listener, tls).tap_io(|_| {}),
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    } else {
        tracing::info!("main listener starting on port \"{}\"", settings.http_port);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    }

    tracing::info!("server shutdown complete");
    Ok(())
}

/// The main application: the debug surface plus the dynamic dispatcher as
/// the fallback for everything else.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/debug/conf/server", get(debug_conf_server))
        .route("/debug/conf/users", get(debug_conf_users))
        .route("/debug/metrics/vars", get(debug_metrics))
        .fallback(dispatch::handle)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            dispatch::log_access,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_FORM_BYTES + 1024))
        .with_state(state)
}

fn debug_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/debug/conf/server", get(debug_conf_server))
        .route("/debug/conf/users", get(debug_conf_users))
        .route("/debug/metrics/vars", get(debug_metrics))
        .with_state(state)
}

async fn debug_conf_server(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.config_echo())
}

async fn debug_conf_users(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.users.as_json())
}

async fn debug_metrics(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Build a rustls server config from PEM text (the certificate and key
/// arrive inside the database configuration, not as files).
fn tls_config_from_pem(cert_pem: &str, key_pem: &str) -> Result<Arc<RustlsConfig>> {
    use rustls_pemfile::{certs, private_key};
    use tokio_rustls::rustls;

    let mut cert_reader = io::BufReader::new(io::Cursor::new(cert_pem.as_bytes()));
    let cert_chain: Vec<rustls::pki_types::CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse TLS certificates: {}", e)))?;
    if cert_chain.is_empty() {
        return Err(Error::Config(
            "Http.SSLCert contains no certificates".into(),
        ));
    }

    let mut key_reader = io::BufReader::new(io::Cursor::new(key_pem.as_bytes()));
    let key = private_key(&mut key_reader)
        .map_err(|e| Error::Config(format!("failed to parse TLS private key: {}", e)))?
        .ok_or_else(|| Error::Config("Http.SSLKey contains no private key".into()))?;

    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::Config(format!("failed to build TLS server config: {}", e)))?;
    Ok(Arc::new(config))
}

/// TLS-terminating listener usable with `axum::serve`.
pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub fn new(tcp: TcpListener, server_config: Arc<RustlsConfig>) -> Self {
        Self {
            tcp,
            acceptor: TlsAcceptor::from(server_config),
        }
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    fn accept(&mut self) -> impl std::future::Future<Output = (Self::Io, Self::Addr)> + Send {
        let acceptor = self.acceptor.clone();
        let tcp = &mut self.tcp;

        async move {
            loop {
                let (stream, addr) = match TcpListener::accept(tcp).await {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::error!("TCP accept error: {}", err);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => return (tls_stream, addr),
                    Err(err) => {
                        tracing::warn!("TLS handshake failed from {}: {}", addr, err);
                        continue;
                    }
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.tcp.local_addr()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("unable to install ctrl-c handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => tracing::error!("unable to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
