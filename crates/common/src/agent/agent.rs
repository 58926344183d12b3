use serde_json::{Map, Value};

use crate::crypto::{Credential, CredentialError, KeyError, PublicKey, SecretKey};
use crate::negotiation::{NegotiationCoordinator, NegotiationError};
use crate::permission::{satisfies, PermissionSet};
use crate::state::{Admission, PendingRequest, PersistentState};

use super::ledger::{
    Account, LedgerClient, LedgerError, Operation, Session, SignedOperation, SignedQuery,
};
use super::messages::{Message, Query, Reply};

pub const MISSING_QUERY_PERMISSION: &str = "Missing Query permission";
pub const MISSING_CREATE_BUCKET_PERMISSION: &str = "Missing CreateBucket permission";
pub const MISSING_UPDATE_BUCKET_PERMISSION: &str = "Missing UpdateBucket permission";
pub const NOT_LOGGED_IN: &str = "not logged in";
pub const REQUEST_PENDING: &str = "another request is pending";

/// Host-provided settings for the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Ledger network the agent signs for
    pub network: String,
    /// Where the presentation layer's prompt lives. Replies point callers
    /// at `<popup_base>?request` or `<popup_base>?send`.
    pub popup_base: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            network: "local".to_string(),
            popup_base: "popup.html".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("not logged in")]
    NotLoggedIn,
    /// The user declined, or nobody answered in time
    #[error("request was declined")]
    Declined,
    /// The agent answered with an error reply
    #[error("{0}")]
    Rejected(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

/// The only holder of the user's keypair.
///
/// Untrusted callers talk to it exclusively through [`TrustedAgent::handle`];
/// the presentation layer resolves prompts through the `*_pending` and
/// session methods. Build one per process and share it behind an `Arc`.
#[derive(Debug)]
pub struct TrustedAgent<L: LedgerClient> {
    state: PersistentState,
    negotiation: NegotiationCoordinator,
    ledger: L,
    config: AgentConfig,
    /// Held from reading the account sequence until the signed operation is
    /// submitted, so concurrent handlers never sign the same sequence
    submit_lock: tokio::sync::Mutex<()>,
}

impl<L: LedgerClient> TrustedAgent<L> {
    pub fn new(state: PersistentState, ledger: L, config: AgentConfig) -> Self {
        Self {
            negotiation: NegotiationCoordinator::new(state.clone()),
            state,
            ledger,
            config,
            submit_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer one message from `caller`. `None` means no reply is sent,
    /// which is how declined and expired prompts look to the caller.
    pub async fn handle(&self, caller: &str, message: Message) -> Option<Reply> {
        tracing::info!(caller, kind = message.kind(), "handling untrusted message");

        match message {
            Message::RequestPermission { permissions } => {
                self.handle_request_permission(caller, permissions).await
            }
            Message::Query(query) => Some(self.handle_query(caller, query).await),
            Message::CreateBucket { name, size } => {
                let requested = PermissionSet::create_bucket(name.clone(), size);
                Some(
                    self.submit_permitted(
                        caller,
                        &requested,
                        MISSING_CREATE_BUCKET_PERMISSION,
                        Operation::CreateBucket { name, size },
                    )
                    .await,
                )
            }
            Message::UpdateBucket { name, locator } => {
                let requested = PermissionSet::update_bucket(name.clone());
                Some(
                    self.submit_permitted(
                        caller,
                        &requested,
                        MISSING_UPDATE_BUCKET_PERMISSION,
                        Operation::UpdateBucket { name, locator },
                    )
                    .await,
                )
            }
            Message::RequestSendCurrency { public_key, amount } => {
                self.handle_request_send_currency(caller, public_key, amount)
                    .await
            }
            Message::Unknown => {
                tracing::warn!(caller, "caller sent an unexpected message type");
                None
            }
        }
    }

    async fn handle_request_permission(
        &self,
        caller: &str,
        requested: PermissionSet,
    ) -> Option<Reply> {
        if satisfies(&self.state.permissions(caller), &requested) {
            return Some(self.permission_reply(caller));
        }

        let request = PendingRequest::Permission {
            identity: caller.to_string(),
            permissions: requested.clone(),
        };
        if let Err(NegotiationError::Busy(_)) = self.negotiation.negotiate(request).await {
            return Some(Reply::error(REQUEST_PENDING));
        }

        // whatever ended the wait, the held permissions decide
        if satisfies(&self.state.permissions(caller), &requested) {
            tracing::info!(caller, "permission granted");
            Some(self.permission_reply(caller))
        } else {
            tracing::info!(caller, "permission not granted");
            None
        }
    }

    fn permission_reply(&self, caller: &str) -> Reply {
        Reply::Permission {
            permissions: self.state.permissions(caller),
            popup_locator: format!("{}?request", self.config.popup_base),
        }
    }

    async fn handle_query(&self, caller: &str, query: Query) -> Reply {
        if query.public_key {
            let required = PermissionSet::new().with_public_key();
            if !satisfies(&self.state.permissions(caller), &required) {
                return Reply::error(MISSING_QUERY_PERMISSION);
            }
            return match self.state.public_key() {
                Some(public_key) => {
                    let mut data = Map::new();
                    data.insert("publicKey".to_string(), Value::String(public_key.to_hex()));
                    Reply::Data(data)
                }
                None => Reply::error(NOT_LOGGED_IN),
            };
        }

        match self.query(query.filters).await {
            Ok(data) => Reply::Data(data),
            Err(e) => {
                tracing::warn!(caller, error = %e, "ledger query failed");
                Reply::error(e.to_string())
            }
        }
    }

    async fn submit_permitted(
        &self,
        caller: &str,
        requested: &PermissionSet,
        missing: &str,
        operation: Operation,
    ) -> Reply {
        if !satisfies(&self.state.permissions(caller), requested) {
            tracing::info!(caller, "{}", missing);
            return Reply::error(missing);
        }
        match self.submit(operation).await {
            Ok(()) => Reply::empty_data(),
            Err(e) => {
                tracing::warn!(caller, error = %e, "operation failed");
                Reply::error(e.to_string())
            }
        }
    }

    async fn handle_request_send_currency(
        &self,
        caller: &str,
        recipient: String,
        amount: u64,
    ) -> Option<Reply> {
        let id = transaction_id();
        let request = PendingRequest::Transaction {
            identity: caller.to_string(),
            id: id.clone(),
            recipient: recipient.clone(),
            amount,
        };

        let ticket = match self.negotiation.request(request) {
            Ok(ticket) => ticket,
            Err(NegotiationError::Busy(_)) => return Some(Reply::error(REQUEST_PENDING)),
        };
        let admission = ticket.admission();
        self.negotiation.wait(ticket).await;

        if self.state.transaction(&id) != Some(true) {
            tracing::info!(caller, id = %id, "transaction not approved");
            return None;
        }
        // a redelivered request shares the prompt but must not send twice
        if admission == Admission::Joined {
            tracing::debug!(caller, id = %id, "duplicate transaction request, not resubmitting");
            return None;
        }

        match self
            .submit(Operation::Send {
                to: recipient.clone(),
                amount,
            })
            .await
        {
            Ok(()) => {
                tracing::info!(caller, id = %id, amount, "transaction sent");
                Some(Reply::TransactionApproved {
                    id,
                    public_key: recipient,
                    amount,
                    popup_locator: format!("{}?send", self.config.popup_base),
                })
            }
            Err(e) => {
                tracing::error!(caller, id = %id, error = %e, "approved transaction failed to submit");
                Some(Reply::error(e.to_string()))
            }
        }
    }

    // ledger

    /// Sign `operation` with the stored keypair and submit it as the next
    /// operation in the account's sequence.
    pub async fn submit(&self, operation: Operation) -> Result<(), AgentError> {
        let _guard = self.submit_lock.lock().await;
        let sequence = self.sequence().await? + 1;
        let signed = self
            .state
            .with_keypair(|key| -> Result<SignedOperation, LedgerError> {
                let signer = key.public();
                let bytes = SignedOperation::signing_bytes(&signer, sequence, &operation)?;
                Ok(SignedOperation {
                    signer,
                    sequence,
                    operation,
                    signature: key.sign(&bytes),
                })
            })
            .ok_or(AgentError::NotLoggedIn)??;

        tracing::debug!(signer = %signed.signer, sequence, "submitting operation");
        self.ledger.submit(signed).await?;
        Ok(())
    }

    /// Run a ledger query. Signed by the account when logged in, otherwise
    /// by a throwaway keypair under an [`Session::Ephemeral`] session.
    pub async fn query(&self, filters: Map<String, Value>) -> Result<Map<String, Value>, AgentError> {
        let signed = match self
            .state
            .with_keypair(|key| sign_query(Session::Account, key, filters.clone()))
        {
            Some(signed) => signed?,
            None => {
                let ephemeral = SecretKey::generate()?;
                sign_query(Session::Ephemeral, &ephemeral, filters)?
            }
        };
        Ok(self.ledger.query(signed).await?)
    }

    /// The logged-in account as the ledger sees it
    pub async fn account(&self) -> Result<Option<Account>, AgentError> {
        match self.state.public_key() {
            Some(public_key) => Ok(self.ledger.account(&public_key).await?),
            None => Ok(None),
        }
    }

    pub async fn balance(&self) -> Result<u64, AgentError> {
        Ok(self.account().await?.map(|a| a.balance).unwrap_or(0))
    }

    /// Sequence of the last operation applied for this account
    pub async fn sequence(&self) -> Result<u64, AgentError> {
        Ok(self.account().await?.map(|a| a.sequence).unwrap_or(0))
    }

    // session

    pub fn public_key(&self) -> Option<PublicKey> {
        self.state.public_key()
    }

    /// Replace the stored keypair with a fresh one
    pub fn generate_keypair(&self) -> Result<PublicKey, AgentError> {
        let key = SecretKey::generate()?;
        Ok(self.import_keypair(key))
    }

    pub fn import_keypair(&self, key: SecretKey) -> PublicKey {
        let public_key = key.public();
        self.state.set_keypair(Some(key));
        tracing::info!(%public_key, "keypair stored");
        public_key
    }

    pub fn set_password(&self, password: &str) -> Result<(), AgentError> {
        self.state.set_credential(Credential::derive(password)?);
        Ok(())
    }

    pub fn unlock(&self, password: &str) -> bool {
        let unlocked = self.state.check_password(password);
        if !unlocked {
            tracing::warn!("unlock attempt with wrong password");
        }
        unlocked
    }

    /// Drop the keypair and everything granted under it. The transaction
    /// audit trail is kept.
    pub fn log_out(&self) {
        self.state.log_out();
        tracing::info!("logged out");
    }

    // presentation layer

    pub fn pending(&self) -> Option<PendingRequest> {
        self.state.pending()
    }

    pub fn grant_pending(&self) -> Option<PendingRequest> {
        let resolved = self.state.grant_pending();
        if let Some(request) = &resolved {
            tracing::info!(identity = request.identity(), "user accepted pending request");
        }
        resolved
    }

    pub fn deny_pending(&self) -> Option<PendingRequest> {
        let resolved = self.state.deny_pending();
        if let Some(request) = &resolved {
            tracing::info!(identity = request.identity(), "user denied pending request");
        }
        resolved
    }

    /// Accept `request` only if it is still the pending one. `false` when
    /// it was resolved or replaced in the meantime.
    pub fn grant_pending_if(&self, request: &PendingRequest) -> bool {
        let granted = self.state.grant_pending_if(request);
        if granted {
            tracing::info!(identity = request.identity(), "user accepted pending request");
        }
        granted
    }

    /// Decline `request` only if it is still the pending one.
    pub fn deny_pending_if(&self, request: &PendingRequest) -> bool {
        let denied = self.state.clear_pending_if(request);
        if denied {
            tracing::info!(identity = request.identity(), "user denied pending request");
        }
        denied
    }

    /// Approve the pending transaction `id`. `false` when it is no longer
    /// pending, e.g. it already expired.
    pub fn approve_transaction(&self, id: &str) -> bool {
        let approved = self.state.approve_transaction(id);
        if approved {
            tracing::info!(id, "transaction approved");
        } else {
            tracing::warn!(id, "approval for a transaction that is not pending");
        }
        approved
    }
}

fn sign_query(
    session: Session,
    key: &SecretKey,
    filters: Map<String, Value>,
) -> Result<SignedQuery, LedgerError> {
    let signer = key.public();
    let bytes = SignedQuery::signing_bytes(session, &signer, &filters)?;
    Ok(SignedQuery {
        session,
        signer,
        filters,
        signature: key.sign(&bytes),
    })
}

/// `t` followed by the current unix time in milliseconds
fn transaction_id() -> String {
    let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("t{}", millis)
}
