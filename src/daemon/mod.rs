//! Daemon lifecycle
//!
//! A [`Daemon`] owns the HTTPS listener, the auto-delete sweeper and the
//! optional control surface, and moves through
//! `Created → Starting → Running → Stopping → Stopped` exactly once.
//! Shutdown can be requested any number of times from any number of places
//! (OS signal, control surface, [`Daemon::stop`], a [`DaemonHandle`]); only
//! the first request has an effect.

pub mod hooks;
mod listener;
pub mod signal;
pub mod tls;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::config::{DaemonConfig, APP_NAME};
use crate::executor::Executor;
use crate::menu::{self, ControlSurface};
use crate::server::{build_router, AppState};
use crate::sweeper::{self, AutoDeleteRegistry};
use listener::ListenerContext;
pub use signal::Signal;
pub use tls::TlsError;

/// Crate version, shown in the startup log and the menu title
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that can occur starting the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon already started")]
    AlreadyStarted,

    #[error("listener exited before becoming ready")]
    ListenerExited,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Where a daemon is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Shared, atomically updated lifecycle state
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(LifecycleState::Created as u8)))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `from` to `to`; false if the state was not `from`.
    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Cloneable handle for requesting and observing shutdown
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    started: Signal,
    shutdown: Signal,
    complete: Signal,
}

impl DaemonHandle {
    /// Request shutdown. Returns `true` if this was the first request.
    pub fn request_shutdown(&self) -> bool {
        let first = self.shutdown.fire();
        if first {
            info!("Shutdown requested");
        } else {
            debug!("Ignoring repeated shutdown request");
        }
        first
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_fired()
    }

    pub fn is_started(&self) -> bool {
        self.started.is_fired()
    }

    pub fn is_complete(&self) -> bool {
        self.complete.is_fired()
    }

    /// Wait until shutdown has been requested.
    pub async fn wait_shutdown_requested(&self) {
        self.shutdown.wait().await
    }

    /// Wait until teardown has finished.
    pub async fn wait_complete(&self) {
        self.complete.wait().await
    }
}

/// The remote-execution daemon
pub struct Daemon {
    config: DaemonConfig,
    registry: AutoDeleteRegistry,
    executor: Executor,
    state: StateCell,
    started: Signal,
    shutdown: Signal,
    complete: Signal,
    shutdown_hook_ran: Arc<AtomicBool>,
    local_addr: OnceLock<SocketAddr>,
    surface: Box<dyn ControlSurface>,
}

impl Daemon {
    /// Create a daemon; the control surface is chosen from `enable_menu`.
    pub fn new(config: DaemonConfig) -> Self {
        let surface = menu::for_config(config.enable_menu);
        Self {
            executor: Executor::new(config.debug),
            config,
            registry: AutoDeleteRegistry::new(),
            state: StateCell::new(),
            started: Signal::new(),
            shutdown: Signal::new(),
            complete: Signal::new(),
            shutdown_hook_ran: Arc::new(AtomicBool::new(false)),
            local_addr: OnceLock::new(),
            surface,
        }
    }

    /// Replace the control surface.
    pub fn with_surface(mut self, surface: Box<dyn ControlSurface>) -> Self {
        self.surface = surface;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            started: self.started.clone(),
            shutdown: self.shutdown.clone(),
            complete: self.complete.clone(),
        }
    }

    /// The auto-delete registry shared with the request handlers
    pub fn registry(&self) -> &AutoDeleteRegistry {
        &self.registry
    }

    /// The bound listen address, once running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Start the sweeper and the listener, returning once the listener is
    /// bound and serving.
    ///
    /// TLS or bind failures are returned here and leave the daemon
    /// `Stopped`.
    pub async fn start(&self) -> DaemonResult<SocketAddr> {
        if !self
            .state
            .transition(LifecycleState::Created, LifecycleState::Starting)
        {
            return Err(DaemonError::AlreadyStarted);
        }
        info!("Starting {} v{}", APP_NAME, VERSION);

        if let Some(hook) = &self.config.startup_hook {
            hooks::run_hook("startup", hook, &self.executor).await;
        }

        let sweeper = sweeper::spawn(self.registry.clone(), self.config.sweep_interval);
        let router = build_router(Arc::new(AppState::new(
            self.registry.clone(),
            self.executor,
            self.config.verbose,
        )));

        let ctx = ListenerContext {
            config: self.config.clone(),
            router,
            executor: self.executor,
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
            complete: self.complete.clone(),
            shutdown_hook_ran: self.shutdown_hook_ran.clone(),
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(listener::run(ctx, sweeper, ready_tx));

        let addr = match ready_rx.await {
            Ok(result) => result?,
            Err(_) => {
                self.state.set(LifecycleState::Stopped);
                self.complete.fire();
                return Err(DaemonError::ListenerExited);
            }
        };

        let _ = self.local_addr.set(addr);
        // A shutdown racing with startup may already have moved us on
        self.state
            .transition(LifecycleState::Starting, LifecycleState::Running);
        self.started.fire();
        info!("Listening on https://{}", addr);
        Ok(addr)
    }

    /// Request shutdown and wait for teardown to finish.
    ///
    /// Safe to call repeatedly and concurrently with other shutdown
    /// triggers. A daemon that was never started goes straight to
    /// `Stopped`.
    pub async fn stop(&self) {
        if self
            .state
            .transition(LifecycleState::Created, LifecycleState::Stopped)
        {
            self.shutdown.fire();
            self.complete.fire();
            return;
        }
        self.handle().request_shutdown();
        self.complete.wait().await;
    }

    /// Start, show the control surface, then run until the first shutdown
    /// trigger and tear down.
    pub async fn run(&mut self) -> DaemonResult<()> {
        self.start().await?;

        let handle = self.handle();
        self.surface.attach(handle.clone());
        self.surface.show(&format!("{} v{}", APP_NAME, VERSION));
        debug!("Control surface: {}", self.surface.name());

        tokio::select! {
            _ = shutdown_signal() => info!("Received OS signal, stopping daemon"),
            _ = handle.wait_shutdown_requested() => {}
            _ = handle.wait_complete() => {}
        }

        self.surface.close();
        self.stop().await;
        Ok(())
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// A signal that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
