//! Shared test utilities for agent integration tests
#![allow(dead_code)]

use std::sync::Arc;

use ::common::agent::ledger::MemoryLedger;
use ::common::agent::{AgentConfig, ScopedAgent, TrustedAgent};
use ::common::state::{PendingRequest, PersistentState};

pub type Agent = Arc<TrustedAgent<MemoryLedger>>;

/// Caller identity used by most tests
pub const APP: &str = "app.example";

/// A logged-in agent over a fresh in-memory ledger
pub fn setup_agent() -> Agent {
    let agent = TrustedAgent::new(
        PersistentState::new(),
        MemoryLedger::new(),
        AgentConfig::default(),
    );
    agent.generate_keypair().unwrap();
    Arc::new(agent)
}

pub fn scoped(agent: &Agent) -> ScopedAgent<MemoryLedger> {
    ScopedAgent::new(agent.clone(), APP)
}

/// Wait until a request shows up in the pending slot, the way the prompt
/// would notice it
pub async fn wait_for_pending(agent: &Agent) -> PendingRequest {
    let mut changes = agent.state().subscribe();
    loop {
        if let Some(pending) = agent.pending() {
            return pending;
        }
        changes.changed().await.unwrap();
    }
}
