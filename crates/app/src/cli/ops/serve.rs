use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;

use crate::process::{spawn_service, ServiceConfig, ServiceError};
use crate::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Override the configured listen port
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Directory for log files (daily rotation)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Do not prompt on stdin; requests can only expire
    #[arg(long)]
    pub no_console: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to load state: {0}")]
    State(#[from] StateError),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("service failed: {0}")]
    Service(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let app = AppState::load(ctx.config_path.clone())?;

        let log_level = tracing::Level::from_str(&app.config.log_level)
            .map_err(|_| ServeError::InvalidLogLevel(app.config.log_level.clone()))?;
        let port = self.listen_port.unwrap_or(app.config.listen_port);

        let config = ServiceConfig {
            app,
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            log_level,
            log_dir: self.log_dir.clone(),
            console: !self.no_console,
        };

        spawn_service(&config).await?;
        Ok("keyward stopped".to_string())
    }
}
