//! Ask-the-user coordination
//!
//! A negotiation puts one [`PendingRequest`] into [`PersistentState`] and
//! then waits until the user resolves it (the slot no longer holds that
//! request) or a fixed deadline passes. Resolution is observed through the
//! state's change notifications, never through the caller, so a caller
//! that goes away mid-wait changes nothing.
//!
//! ```text
//! Idle --request--> Pending --user--> Resolved
//!                       \----deadline--> Expired (treated as denied)
//! ```

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::state::{Admission, PendingRequest, PersistentState};

/// How long a permission prompt may stay open
pub const PERMISSION_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// How long a transaction prompt may stay open
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// What is being negotiated; fixes the deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Permission,
    Transaction,
}

impl Negotiation {
    pub fn of(request: &PendingRequest) -> Self {
        match request {
            PendingRequest::Permission { .. } => Negotiation::Permission,
            PendingRequest::Transaction { .. } => Negotiation::Transaction,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Negotiation::Permission => PERMISSION_TIMEOUT,
            Negotiation::Transaction => TRANSACTION_TIMEOUT,
        }
    }

    pub fn deadline(&self, start: Instant) -> Instant {
        start + self.timeout()
    }
}

/// Terminal state of a negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The user acted on the request. Whether that was a grant or a denial
    /// is read back from the relevant record.
    Resolved,
    /// Nobody answered before the deadline
    Expired,
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("another request is pending for {0}")]
    Busy(String),
}

/// A claimed slot plus everything needed to wait on it
#[derive(Debug)]
pub struct Ticket {
    request: PendingRequest,
    admission: Admission,
    deadline: Instant,
    changes: watch::Receiver<u64>,
}

impl Ticket {
    pub fn request(&self) -> &PendingRequest {
        &self.request
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Debug, Clone)]
pub struct NegotiationCoordinator {
    state: PersistentState,
}

impl NegotiationCoordinator {
    pub fn new(state: PersistentState) -> Self {
        Self { state }
    }

    /// Put `request` in front of the user.
    ///
    /// Fails with [`NegotiationError::Busy`] when a different request is
    /// already pending. Re-requesting the identical pending request joins
    /// it; the joined ticket gets its own full deadline.
    pub fn request(&self, request: PendingRequest) -> Result<Ticket, NegotiationError> {
        // subscribe first so a resolution racing the insert is not missed
        let changes = self.state.subscribe();
        let deadline = Negotiation::of(&request).deadline(Instant::now());

        let admission = self.state.try_set_pending(request.clone()).map_err(|existing| {
            tracing::warn!(
                requested_by = request.identity(),
                pending_for = existing.identity(),
                "rejecting negotiation while another is pending"
            );
            NegotiationError::Busy(existing.identity().to_string())
        })?;

        tracing::info!(
            identity = request.identity(),
            kind = ?Negotiation::of(&request),
            ?admission,
            "negotiation pending"
        );

        Ok(Ticket {
            request,
            admission,
            deadline,
            changes,
        })
    }

    /// Wait for the user to resolve the ticket's request or for its
    /// deadline. On expiry the request is withdrawn from the slot if it
    /// is still there.
    pub async fn wait(&self, mut ticket: Ticket) -> Outcome {
        loop {
            if !self.state.is_pending(&ticket.request) {
                tracing::debug!(identity = ticket.request.identity(), "negotiation resolved");
                return Outcome::Resolved;
            }

            match tokio::time::timeout_at(ticket.deadline, ticket.changes.changed()).await {
                Ok(Ok(())) => continue,
                // the state outlives every ticket, but never spin if it did not
                Ok(Err(_)) => tokio::time::sleep_until(ticket.deadline).await,
                Err(_) => {}
            }

            if !self.state.is_pending(&ticket.request) {
                return Outcome::Resolved;
            }
            self.state.clear_pending_if(&ticket.request);
            tracing::info!(
                identity = ticket.request.identity(),
                "negotiation expired without an answer"
            );
            return Outcome::Expired;
        }
    }

    /// [`request`](Self::request) then [`wait`](Self::wait).
    pub async fn negotiate(&self, request: PendingRequest) -> Result<Outcome, NegotiationError> {
        let ticket = self.request(request)?;
        Ok(self.wait(ticket).await)
    }
}
