//! Terminal prompt for the single pending request.

use std::sync::Arc;

use common::agent::ledger::LedgerClient;
use common::agent::TrustedAgent;
use common::state::PendingRequest;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// What the user typed at the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Accept,
    Deny,
    Show,
}

impl Answer {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "a" | "accept" | "y" | "yes" => Some(Answer::Accept),
            "d" | "deny" | "n" | "no" => Some(Answer::Deny),
            "" | "s" | "show" => Some(Answer::Show),
            _ => None,
        }
    }
}

/// Human-readable prompt for a pending request
pub fn describe(request: &PendingRequest) -> String {
    match request {
        PendingRequest::Permission {
            identity,
            permissions,
        } => {
            let capabilities = permissions
                .capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "{} requests permissions: {}\n  [a]ccept / [d]eny",
                identity, capabilities
            )
        }
        PendingRequest::Transaction {
            identity,
            id,
            recipient,
            amount,
        } => format!(
            "{} asks to send {} to {} (transaction {})\n  [a]ccept / [d]eny",
            identity, amount, recipient, id
        ),
    }
}

/// Printed when the slot no longer holds the request the user saw
pub const REQUEST_CHANGED: &str = "the pending request changed, review it before answering";

/// Apply an answer to `shown`, the request last printed, returning what to
/// print. Accept and deny only resolve that exact request.
pub fn respond<L: LedgerClient>(
    agent: &TrustedAgent<L>,
    answer: Answer,
    shown: Option<&PendingRequest>,
) -> String {
    let resolve = |resolved: bool, verb: &str| match shown {
        Some(request) if resolved => format!("{} request from {}", verb, request.identity()),
        _ if agent.pending().is_some() => REQUEST_CHANGED.to_string(),
        _ => "nothing is pending".to_string(),
    };

    match answer {
        Answer::Accept => resolve(shown.is_some_and(|r| agent.grant_pending_if(r)), "accepted"),
        Answer::Deny => resolve(shown.is_some_and(|r| agent.deny_pending_if(r)), "denied"),
        Answer::Show => match agent.pending() {
            Some(request) => describe(&request),
            None => "nothing is pending".to_string(),
        },
    }
}

/// Read answers from stdin until shutdown, announcing each new request.
pub async fn run<L: LedgerClient>(agent: Arc<TrustedAgent<L>>, mut shutdown_rx: watch::Receiver<()>) {
    let mut changes = agent.state().subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown: Option<PendingRequest> = None;
    let mut stdin_open = true;

    loop {
        let pending = agent.pending();
        if pending != shown {
            if let Some(request) = &pending {
                println!("{}", describe(request));
            }
            shown = pending;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match Answer::parse(&line) {
                    Some(answer) => println!("{}", respond(&agent, answer, shown.as_ref())),
                    None => println!("unknown answer {:?}, expected accept, deny or show", line.trim()),
                },
                Ok(None) => {
                    tracing::info!("stdin closed, requests can only expire");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    }
}
