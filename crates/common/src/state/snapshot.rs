use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::crypto::{Credential, PublicKey};
use crate::permission::PermissionSet;

use super::PendingRequest;

/// Persisted shape of [`PersistentState`](super::PersistentState).
///
/// The secret key is not part of the snapshot; hosts store it separately
/// (PEM) and hand it back to [`PersistentState::restore`](super::PersistentState::restore).
/// `public_key` is informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default)]
    pub public_key: Option<PublicKey>,
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub permissions: HashMap<String, PermissionSet>,
    #[serde(default)]
    pub request: Option<PendingRequest>,
    #[serde(default)]
    pub transactions: BTreeMap<String, bool>,
}

impl StateSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let mut snapshot = StateSnapshot::default();
        snapshot
            .permissions
            .insert("app.example".into(), PermissionSet::update_bucket("b"));
        snapshot.transactions.insert("t1".into(), true);
        snapshot.request = Some(PendingRequest::Transaction {
            identity: "app.example".into(),
            id: "t2".into(),
            recipient: "pk1".into(),
            amount: 5,
        });

        let restored = StateSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_missing_fields_default() {
        let snapshot = StateSnapshot::from_json("{}").unwrap();
        assert_eq!(snapshot, StateSnapshot::default());
    }
}
