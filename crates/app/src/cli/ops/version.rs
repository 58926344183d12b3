use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct Version;

/// One-line description of this build
pub fn build_info() -> String {
    format!(
        "keyward {} ({}, {} build, {})",
        env!("CARGO_PKG_VERSION"),
        env!("REPO_VERSION"),
        env!("BUILD_PROFILE"),
        env!("RUST_VERSION"),
    )
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Version {
    type Error = std::convert::Infallible;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        Ok(build_info())
    }
}
