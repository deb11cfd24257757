//! HTTPS accept loop and ordered teardown.

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use super::hooks::run_hook;
use super::signal::Signal;
use super::tls::load_server_config;
use super::{DaemonError, DaemonResult, LifecycleState, StateCell};
use crate::config::DaemonConfig;
use crate::executor::Executor;
use crate::sweeper::SweeperHandle;

/// Everything the listener task needs from its daemon
pub(crate) struct ListenerContext {
    pub config: DaemonConfig,
    pub router: Router,
    pub executor: Executor,
    pub state: StateCell,
    pub shutdown: Signal,
    pub complete: Signal,
    pub shutdown_hook_ran: Arc<AtomicBool>,
}

/// Run the listener until shutdown is requested, then tear down.
///
/// Readiness (the bound address) or the startup error is reported exactly
/// once through `ready`. On a startup error the sweeper is stopped and the
/// daemon goes straight to `Stopped`.
pub(crate) async fn run(
    ctx: ListenerContext,
    sweeper: SweeperHandle,
    ready: oneshot::Sender<DaemonResult<SocketAddr>>,
) {
    let (tcp, acceptor, addr) = match bind(&ctx.config).await {
        Ok(bound) => bound,
        Err(e) => {
            error!("Listener failed to start: {}", e);
            sweeper.stop().await;
            ctx.state.set(LifecycleState::Stopped);
            ctx.complete.fire();
            // Stopped must be observable by the time start() returns
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(addr));

    let closing = Signal::new();
    let mut connections = JoinSet::new();

    let shutdown_requested = ctx.shutdown.wait();
    tokio::pin!(shutdown_requested);

    loop {
        tokio::select! {
            _ = &mut shutdown_requested => break,
            accepted = tcp.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        acceptor.clone(),
                        ctx.router.clone(),
                        closing.clone(),
                    ));
                }
                Err(e) => {
                    // Typically descriptor exhaustion; back off instead of spinning
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Refuse new connections from here on
    drop(tcp);
    ctx.state.set(LifecycleState::Stopping);
    info!("Shutting down");

    if let Some(hook) = &ctx.config.shutdown_hook {
        if !ctx.shutdown_hook_ran.swap(true, Ordering::SeqCst) {
            run_hook("shutdown", hook, &ctx.executor).await;
        }
    }

    closing.fire();
    let open = connections.len();
    let drained = tokio::time::timeout(ctx.config.shutdown_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    match drained {
        Ok(()) => debug!("Closed {} open connection(s)", open),
        Err(_) => {
            error!(
                "Graceful shutdown timed out after {:?}; abandoning {} connection(s)",
                ctx.config.shutdown_timeout,
                connections.len()
            );
            connections.abort_all();
        }
    }

    sweeper.stop().await;

    ctx.state.set(LifecycleState::Stopped);
    ctx.complete.fire();
    info!("Shutdown complete");
}

async fn bind(config: &DaemonConfig) -> DaemonResult<(TcpListener, TlsAcceptor, SocketAddr)> {
    let tls = load_server_config(&config.tls)?;
    let requested = config.listen_address();
    let tcp = TcpListener::bind(requested)
        .await
        .map_err(|source| DaemonError::Bind {
            addr: requested,
            source,
        })?;
    let addr = tcp.local_addr()?;
    Ok((tcp, TlsAcceptor::from(tls), addr))
}

/// Serve one client connection until it ends or the daemon starts closing.
///
/// Once `closing` fires, the connection finishes in-flight requests and
/// then closes.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    closing: Signal,
) {
    let tls_stream = tokio::select! {
        accepted = acceptor.accept(stream) => match accepted {
            Ok(tls_stream) => tls_stream,
            Err(e) => {
                debug!("TLS handshake with {} failed: {}", peer, e);
                return;
            }
        },
        _ = closing.wait() => return,
    };

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(
        TokioIo::new(tls_stream),
        TowerToHyperService::new(router),
    );
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
            return;
        }
        _ = closing.wait() => {}
    }

    conn.as_mut().graceful_shutdown();
    if let Err(e) = conn.await {
        debug!("Connection from {} closed with error: {}", peer, e);
    }
}
