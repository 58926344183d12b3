use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::permission::PermissionSet;

/// A request from the untrusted side.
///
/// Decoded once at the channel boundary with [`Message::decode`]; types this
/// build does not know decode to [`Message::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Ask the user for `permissions`
    RequestPermission { permissions: PermissionSet },
    /// Read-only query, answered locally or by the ledger
    Query(Query),
    /// Register a new bucket on the ledger
    CreateBucket { name: String, size: u64 },
    /// Point a bucket at a newly published locator
    UpdateBucket {
        name: String,
        #[serde(alias = "magnet")]
        locator: String,
    },
    /// Ask the user to approve a transfer
    #[serde(rename_all = "camelCase")]
    RequestSendCurrency { public_key: String, amount: u64 },
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn decode(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Wire name of the message type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestPermission { .. } => "RequestPermission",
            Message::Query(_) => "Query",
            Message::CreateBucket { .. } => "CreateBucket",
            Message::UpdateBucket { .. } => "UpdateBucket",
            Message::RequestSendCurrency { .. } => "RequestSendCurrency",
            Message::Unknown => "Unknown",
        }
    }
}

/// Query filters. `publicKey: true` asks for the agent's own public key;
/// everything else is passed through to the ledger untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub public_key: bool,
    #[serde(flatten)]
    pub filters: Map<String, Value>,
}

/// The single answer to a [`Message`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    #[serde(rename_all = "camelCase")]
    Permission {
        permissions: PermissionSet,
        popup_locator: String,
    },
    Data(Map<String, Value>),
    Error { error: String },
    #[serde(rename_all = "camelCase")]
    TransactionApproved {
        id: String,
        public_key: String,
        amount: u64,
        popup_locator: String,
    },
}

impl Reply {
    pub fn empty_data() -> Self {
        Reply::Data(Map::new())
    }

    pub fn error(error: impl Into<String>) -> Self {
        Reply::Error {
            error: error.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
