//! Capability vocabulary and the policy that evaluates it
//!
//! A [`PermissionSet`] maps a capability name to the list of constraint
//! entries granted (or requested) for it. On the wire it is a plain JSON
//! object keyed by capability:
//!
//! ```text
//! {
//!   "publicKey":    [{}],
//!   "createBucket": [{ "name": "photos", "size": 1000000 }],
//!   "updateBucket": [{ "name": "photos" }]
//! }
//! ```
//!
//! Matching is superset matching, see [`satisfies`].

mod policy;

use serde::{Deserialize, Serialize};

pub use policy::{satisfies, Contains};

/// Name wildcard accepted in granted entries
pub const WILDCARD: &str = "*";

/// The fixed set of capabilities an untrusted caller can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    PublicKey,
    CreateBucket,
    UpdateBucket,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::PublicKey => "publicKey",
            Capability::CreateBucket => "createBucket",
            Capability::UpdateBucket => "updateBucket",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission to read the agent's public key. Carries no constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyGrant {}

/// Permission to register a bucket on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBucketGrant {
    /// Bucket name, `None` or `"*"` for any name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Size ceiling in bytes
    pub size: u64,
}

/// Permission to change the locator a bucket points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBucketGrant {
    /// Bucket name, `None` or `"*"` for any name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Capability name -> constraint entries.
///
/// An absent capability (`None`) is different from a present one with no
/// entries: the former grants nothing, the latter grants the unconstrained
/// part of the capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<PublicKeyGrant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_bucket: Option<Vec<CreateBucketGrant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_bucket: Option<Vec<UpdateBucketGrant>>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_key(mut self) -> Self {
        self.public_key
            .get_or_insert_with(Vec::new)
            .push(PublicKeyGrant {});
        self
    }

    pub fn with_create_bucket(mut self, name: impl Into<String>, size: u64) -> Self {
        self.create_bucket
            .get_or_insert_with(Vec::new)
            .push(CreateBucketGrant {
                name: Some(name.into()),
                size,
            });
        self
    }

    pub fn with_update_bucket(mut self, name: impl Into<String>) -> Self {
        self.update_bucket
            .get_or_insert_with(Vec::new)
            .push(UpdateBucketGrant {
                name: Some(name.into()),
            });
        self
    }

    /// Requested set for creating a single bucket
    pub fn create_bucket(name: impl Into<String>, size: u64) -> Self {
        Self::new().with_create_bucket(name, size)
    }

    /// Requested set for updating a single bucket
    pub fn update_bucket(name: impl Into<String>) -> Self {
        Self::new().with_update_bucket(name)
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities().is_empty()
    }

    /// Capabilities present in this set, in a stable order
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities = Vec::new();
        if self.public_key.is_some() {
            capabilities.push(Capability::PublicKey);
        }
        if self.create_bucket.is_some() {
            capabilities.push(Capability::CreateBucket);
        }
        if self.update_bucket.is_some() {
            capabilities.push(Capability::UpdateBucket);
        }
        capabilities
    }

    /// Accumulate another set into this one.
    ///
    /// Entries already present are not duplicated. The result satisfies
    /// everything either input satisfied.
    pub fn merge(&mut self, other: &PermissionSet) {
        merge_entries(&mut self.public_key, &other.public_key);
        merge_entries(&mut self.create_bucket, &other.create_bucket);
        merge_entries(&mut self.update_bucket, &other.update_bucket);
    }
}

fn merge_entries<T: Clone + PartialEq>(into: &mut Option<Vec<T>>, from: &Option<Vec<T>>) {
    let Some(from) = from else {
        return;
    };
    let into = into.get_or_insert_with(Vec::new);
    for entry in from {
        if !into.contains(entry) {
            into.push(entry.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let set = PermissionSet::new()
            .with_public_key()
            .with_create_bucket("b", 10);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "publicKey": [{}],
                "createBucket": [{ "name": "b", "size": 10 }]
            })
        );
    }

    #[test]
    fn test_decode_without_name() {
        let set: PermissionSet =
            serde_json::from_str(r#"{"createBucket":[{"size":5}],"updateBucket":[{}]}"#).unwrap();
        assert_eq!(
            set.create_bucket,
            Some(vec![CreateBucketGrant {
                name: None,
                size: 5
            }])
        );
        assert_eq!(set.update_bucket, Some(vec![UpdateBucketGrant { name: None }]));
        assert!(set.public_key.is_none());
    }

    #[test]
    fn test_merge_accumulates_without_duplicates() {
        let mut granted = PermissionSet::create_bucket("a", 10);
        granted.merge(&PermissionSet::create_bucket("a", 10).with_update_bucket("a"));
        granted.merge(&PermissionSet::new().with_public_key());

        assert_eq!(granted.create_bucket.as_ref().unwrap().len(), 1);
        assert_eq!(
            granted.capabilities(),
            vec![
                Capability::PublicKey,
                Capability::CreateBucket,
                Capability::UpdateBucket
            ]
        );
    }

    #[test]
    fn test_empty() {
        assert!(PermissionSet::new().is_empty());
        assert!(!PermissionSet::update_bucket("x").is_empty());
    }
}
