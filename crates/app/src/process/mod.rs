pub mod utils;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::agent::{AgentConfig, TrustedAgent};
use common::prelude::PersistentState;
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::ledger::{HttpLedger, HttpLedgerError};
use crate::state::{AppState, StateError};
use crate::{console, transport};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub type Agent = TrustedAgent<HttpLedger>;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub app: AppState,
    /// Address the message transport binds
    pub listen_addr: SocketAddr,
    pub log_level: tracing::Level,
    /// Directory for daily rolling log files
    pub log_dir: Option<PathBuf>,
    /// Prompt on this terminal's stdin
    pub console: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("ledger error: {0}")]
    Ledger(#[from] HttpLedgerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle for gracefully shutting down the agent service.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    /// Trigger shutdown programmatically.
    #[allow(dead_code)]
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
fn init_logging(
    service_config: &ServiceConfig,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(service_config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    if let Some(log_dir) = &service_config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "keyward.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(service_config.log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Build the agent from the on-disk state.
///
/// A request left pending by a previous run has nobody waiting on it any
/// more and would hold the slot forever, so it is dropped.
pub fn create_agent(app: &AppState) -> Result<Arc<Agent>, ServiceError> {
    let keypair = app.load_key()?;
    let mut snapshot = app.load_snapshot()?;
    if let Some(stale) = snapshot.request.take() {
        tracing::warn!(identity = stale.identity(), "dropping request left pending by a previous run");
    }

    let state = PersistentState::restore(snapshot, keypair);
    let ledger = HttpLedger::new(&app.config.ledger_url)?;
    let config = AgentConfig {
        network: app.config.network.clone(),
        popup_base: app.config.popup_base.clone(),
    };

    tracing::info!(
        network = %config.network,
        ledger = %ledger.base_url(),
        logged_in = state.has_keypair(),
        "agent loaded"
    );
    Ok(Arc::new(TrustedAgent::new(state, ledger, config)))
}

/// Write the state file after every mutation, and once more on shutdown.
/// The key file follows the keypair: rewritten when it changes, removed on
/// log-out.
pub async fn persist(state: PersistentState, app: AppState, mut shutdown_rx: watch::Receiver<()>) {
    let mut changes = state.subscribe();
    let mut saved_key = app.load_key().ok().flatten().map(|key| key.public());
    loop {
        let stop = tokio::select! {
            _ = shutdown_rx.changed() => true,
            changed = changes.changed() => changed.is_err(),
        };

        let snapshot = state.snapshot();
        if snapshot.public_key != saved_key {
            match app.save_key(state.keypair_pem().as_deref()) {
                Ok(()) => saved_key = snapshot.public_key,
                Err(e) => {
                    tracing::error!(error = %e, path = ?app.key_path, "failed to save key file")
                }
            }
        }
        if let Err(e) = app.save_snapshot(&snapshot) {
            tracing::error!(error = %e, path = ?app.state_path, "failed to save agent state");
        }
        if stop {
            break;
        }
    }
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Create the agent and spawn the transport, persistence and prompt tasks.
pub async fn start_service(
    service_config: &ServiceConfig,
) -> Result<(Arc<Agent>, ShutdownHandle), ServiceError> {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let agent = create_agent(&service_config.app)?;
    let listener = TcpListener::bind(service_config.listen_addr).await?;

    let mut handles = Vec::new();

    let transport_agent = agent.clone();
    let transport_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = transport::run(listener, transport_agent, transport_rx).await {
            tracing::error!("Transport error: {}", e);
        }
    }));

    handles.push(tokio::spawn(persist(
        agent.state().clone(),
        service_config.app.clone(),
        shutdown_rx.clone(),
    )));

    if service_config.console {
        handles.push(tokio::spawn(console::run(agent.clone(), shutdown_rx.clone())));
    }

    tracing::info!(
        "Running: transport on {}, prompt {}",
        service_config.listen_addr,
        if service_config.console { "on stdin" } else { "disabled" }
    );

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
    };

    Ok((agent, handle))
}

/// Runs the agent service until a shutdown signal is received.
pub async fn spawn_service(service_config: &ServiceConfig) -> Result<(), ServiceError> {
    let _guards = init_logging(service_config);
    let (_, handle) = start_service(service_config).await?;
    handle.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::prelude::PermissionSet;

    #[tokio::test]
    async fn test_persist_writes_every_change() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppState::init(Some(dir.path().join("keyward")), None).unwrap();
        let state = PersistentState::restore(app.load_snapshot().unwrap(), app.load_key().unwrap());

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(persist(state.clone(), app.clone(), shutdown_rx));

        state.grant_permission("app.example", &PermissionSet::new().with_public_key());
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        let saved = app.load_snapshot().unwrap();
        assert_eq!(
            saved.permissions["app.example"],
            PermissionSet::new().with_public_key()
        );
    }

    async fn run_persist_until_shutdown(state: PersistentState, app: &AppState, change: impl FnOnce()) {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(persist(state, app.clone(), shutdown_rx));
        change();
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_log_out_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppState::init(Some(dir.path().join("keyward")), None).unwrap();

        let agent = create_agent(&app).unwrap();
        assert!(agent.public_key().is_some());
        run_persist_until_shutdown(agent.state().clone(), &app, || agent.log_out()).await;

        assert!(!app.key_path.exists());
        let restarted = create_agent(&app).unwrap();
        assert!(restarted.public_key().is_none());
    }

    #[tokio::test]
    async fn test_new_keypair_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppState::init(Some(dir.path().join("keyward")), None).unwrap();

        let agent = create_agent(&app).unwrap();
        let before = agent.public_key();
        let mut generated = None;
        run_persist_until_shutdown(agent.state().clone(), &app, || {
            generated = Some(agent.generate_keypair().unwrap());
        })
        .await;

        assert_ne!(generated, before);
        let restarted = create_agent(&app).unwrap();
        assert_eq!(restarted.public_key(), generated);
    }

    #[tokio::test]
    async fn test_service_starts_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppState::init(Some(dir.path().join("keyward")), None).unwrap();
        let config = ServiceConfig {
            app: app.clone(),
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: tracing::Level::INFO,
            log_dir: None,
            console: false,
        };

        let (agent, handle) = start_service(&config).await.unwrap();
        agent
            .state()
            .grant_permission("app.example", &PermissionSet::update_bucket("photos"));
        handle.shutdown();
        handle.wait().await;

        assert!(app.load_snapshot().unwrap().permissions.contains_key("app.example"));
    }

    #[tokio::test]
    async fn test_create_agent_drops_stale_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppState::init(Some(dir.path().join("keyward")), None).unwrap();

        let mut snapshot = app.load_snapshot().unwrap();
        snapshot.request = Some(common::state::PendingRequest::Permission {
            identity: "app.example".into(),
            permissions: PermissionSet::update_bucket("photos"),
        });
        app.save_snapshot(&snapshot).unwrap();

        let agent = create_agent(&app).unwrap();
        assert!(agent.pending().is_none());
        assert!(agent.public_key().is_some());
    }
}
