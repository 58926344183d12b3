use clap::Args;
use url::Url;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Port the message transport listens on (localhost only)
    #[arg(long, default_value_t = 5150)]
    pub listen_port: u16,

    /// Ledger network name
    #[arg(long, default_value = "local")]
    pub network: String,

    /// Base URL of the ledger endpoint
    #[arg(long, default_value = "http://localhost:3000")]
    pub ledger_url: Url,

    /// Page callers are pointed at while a prompt is open
    #[arg(long, default_value = "popup.html")]
    pub popup_base: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            listen_port: self.listen_port,
            network: self.network.clone(),
            ledger_url: self.ledger_url.clone(),
            popup_base: self.popup_base.clone(),
            ..Default::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        let public_key = state
            .load_key()?
            .map(|key| key.public().to_hex())
            .unwrap_or_default();

        let output = format!(
            "Initialized keyward directory at: {}\n\
             - Key: {}\n\
             - Public key: {}\n\
             - State: {}\n\
             - Config: {}\n\
             - Listen port: {}\n\
             - Ledger: {} ({})",
            state.keyward_dir.display(),
            state.key_path.display(),
            public_key,
            state.state_path.display(),
            state.config_path.display(),
            state.config.listen_port,
            state.config.ledger_url,
            state.config.network,
        );

        Ok(output)
    }
}
