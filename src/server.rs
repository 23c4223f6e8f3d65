use axum::{
    extract::{DefaultBodyLimit, Request},
    routing::{get, post},
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto::Builder,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tower::Service;
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::handlers::{upload_files, upload_page};
use crate::middleware::add_security_headers;
use crate::models::ServerStatus;
use crate::net::discover_lan_address;
use crate::spool::MAX_UPLOAD_SIZE;
use crate::state::AppState;

/// how long a client may take to send request headers
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// how long in-flight requests get to finish on stop
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// build the router for the upload page and the upload api
pub fn build_router(state: Arc<AppState>) -> Router {
    tracing::debug!("Building router with max upload size: {} bytes", MAX_UPLOAD_SIZE);
    Router::new()
        .route("/upload", get(upload_page))
        .route("/api/upload", post(upload_files))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE as usize))
        .layer(axum::middleware::from_fn(add_security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct Running {
    address: Ipv4Addr,
    port: u16,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum Lifecycle {
    Stopped,
    Starting,
    Running(Running),
    Stopping,
}

/// owns the listener; start and stop are serialised through one lifecycle value
pub struct IngestServer {
    state: Arc<AppState>,
    /// advertised address; discovered on every start when unset
    fixed_address: Option<Ipv4Addr>,
    bind_host: IpAddr,
    lifecycle: Mutex<Lifecycle>,
}

impl IngestServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            fixed_address: None,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            lifecycle: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// skip interface discovery and advertise `address`, listening only on it
    pub fn with_address(state: Arc<AppState>, address: Ipv4Addr) -> Self {
        Self {
            fixed_address: Some(address),
            bind_host: IpAddr::V4(address),
            ..Self::new(state)
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// pick an address, bind an ephemeral port and start serving in the background
    pub async fn start(&self) -> Result<ServerStatus, ServerError> {
        {
            let mut lifecycle = self.lifecycle();
            match *lifecycle {
                Lifecycle::Stopped => *lifecycle = Lifecycle::Starting,
                Lifecycle::Stopping => return Err(ServerError::Busy),
                Lifecycle::Starting | Lifecycle::Running(_) => {
                    return Err(ServerError::AlreadyRunning)
                }
            }
        }

        let reset = ResetOnDrop::new(self);
        match self.launch().await {
            Ok(running) => {
                reset.disarm();
                let status = self.status_of(&running);
                *self.lifecycle() = Lifecycle::Running(running);
                tracing::info!("Upload URL: {}", status.url);
                Ok(status)
            }
            Err(e) => {
                drop(reset);
                tracing::error!("Failed to start HTTP server: {}", e);
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<Running, ServerError> {
        let address = match self.fixed_address {
            Some(address) => address,
            None => discover_lan_address()?,
        };

        // port 0 lets the OS pick; the bound listener is the one we serve on
        let listener = TcpListener::bind(SocketAddr::new(self.bind_host, 0))
            .await
            .map_err(ServerError::Bind)?;
        let port = listener.local_addr().map_err(ServerError::Bind)?.port();
        tracing::info!("HTTP server starting on {}:{}", self.bind_host, port);

        let (shutdown, rx) = watch::channel(false);
        let router = build_router(self.state.clone());
        let task = tokio::spawn(serve(listener, router, rx));

        Ok(Running {
            address,
            port,
            shutdown,
            task,
        })
    }

    /// stop accepting, give in-flight requests a grace period, then close everything
    pub async fn stop(&self) -> Result<(), ServerError> {
        let running = {
            let mut lifecycle = self.lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping) {
                Lifecycle::Running(running) => running,
                other => {
                    let err = match other {
                        Lifecycle::Stopped => ServerError::NotRunning,
                        _ => ServerError::Busy,
                    };
                    *lifecycle = other;
                    return Err(err);
                }
            }
        };

        // a cancelled stop still ends up Stopped; the task drains on its own
        let _reset = ResetOnDrop::new(self);
        let _ = running.shutdown.send(true);
        let joined = running.task.await;

        if let Err(e) = joined {
            tracing::warn!("Server task ended abnormally: {}", e);
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }

    pub fn status(&self) -> ServerStatus {
        match &*self.lifecycle() {
            Lifecycle::Running(running) => self.status_of(running),
            _ => ServerStatus::default(),
        }
    }

    /// `http://<lan ip>:<port>/upload?lang=<lang>`, empty when not running
    pub fn upload_url(&self) -> String {
        self.status().url
    }

    fn status_of(&self, running: &Running) -> ServerStatus {
        ServerStatus {
            running: true,
            address: running.address.to_string(),
            port: running.port,
            url: format!(
                "http://{}:{}/upload?lang={}",
                running.address,
                running.port,
                self.state.lang().as_str()
            ),
        }
    }
}

/// puts the lifecycle back to `Stopped` when a transition ends early or is cancelled
struct ResetOnDrop<'a> {
    server: &'a IngestServer,
    armed: bool,
}

impl<'a> ResetOnDrop<'a> {
    fn new(server: &'a IngestServer) -> Self {
        Self {
            server,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.server.lifecycle() = Lifecycle::Stopped;
        }
    }
}

async fn serve(listener: TcpListener, router: Router, mut shutdown: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!("Accepted connection from {}", peer);
                    connections.spawn(serve_connection(stream, router.clone(), shutdown.clone()));
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.changed() => break,
        }

        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    if !connections.is_empty() {
        tracing::info!("Waiting for {} in-flight connection(s)", connections.len());
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            "Graceful shutdown timed out, closing {} connection(s)",
            connections.len()
        );
        connections.shutdown().await;
    }
}

async fn serve_connection(
    stream: TcpStream,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let io = TokioIo::new(stream);
    let service = hyper::service::service_fn(move |request: Request<Incoming>| {
        router.clone().call(request)
    });

    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT);

    let conn = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!("Connection closed with error: {}", e);
                }
                break;
            }
            _ = shutdown.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// print startup banner with server info
pub fn print_startup_banner(status: &ServerStatus, save_dir: Option<&Path>) {
    tracing::info!("FileBridge starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📱 UPLOAD PAGE: {}", status.url);
    match save_dir {
        Some(dir) => tracing::info!(
            "📁 Saving files to: {:?}",
            dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
        ),
        None => tracing::warn!("📁 No save directory configured"),
    }
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
