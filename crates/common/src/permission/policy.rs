use super::{CreateBucketGrant, PermissionSet, PublicKeyGrant, UpdateBucketGrant, WILDCARD};

/// Capability-specific containment between a granted entry and a
/// requested entry.
pub trait Contains {
    /// Whether holding `self` covers a request for `requested`
    fn contains(&self, requested: &Self) -> bool;
}

impl Contains for PublicKeyGrant {
    fn contains(&self, _requested: &Self) -> bool {
        true
    }
}

impl Contains for CreateBucketGrant {
    fn contains(&self, requested: &Self) -> bool {
        self.size >= requested.size && name_covers(self.name.as_deref(), requested.name.as_deref())
    }
}

impl Contains for UpdateBucketGrant {
    fn contains(&self, requested: &Self) -> bool {
        name_covers(self.name.as_deref(), requested.name.as_deref())
    }
}

fn name_covers(granted: Option<&str>, requested: Option<&str>) -> bool {
    match granted {
        None | Some(WILDCARD) => true,
        Some(granted) => requested == Some(granted),
    }
}

/// Does the `granted` set cover everything in `requested`?
///
/// Every capability present in `requested` must be present in `granted`,
/// and each requested entry must be contained in at least one granted
/// entry. Missing capabilities or unmatched entries yield `false`.
pub fn satisfies(granted: &PermissionSet, requested: &PermissionSet) -> bool {
    entries_satisfied(&granted.public_key, &requested.public_key)
        && entries_satisfied(&granted.create_bucket, &requested.create_bucket)
        && entries_satisfied(&granted.update_bucket, &requested.update_bucket)
}

fn entries_satisfied<T: Contains>(granted: &Option<Vec<T>>, requested: &Option<Vec<T>>) -> bool {
    match (granted, requested) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(granted), Some(requested)) => requested
            .iter()
            .all(|want| granted.iter().any(|have| have.contains(want))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<PermissionSet> {
        vec![
            PermissionSet::new(),
            PermissionSet::new().with_public_key(),
            PermissionSet::create_bucket("b", 10),
            PermissionSet::create_bucket("b", 5),
            PermissionSet::create_bucket("c", 10),
            PermissionSet::create_bucket("*", 100),
            PermissionSet::update_bucket("b"),
            PermissionSet::update_bucket("*"),
            PermissionSet::create_bucket("b", 10).with_update_bucket("b"),
            PermissionSet::new()
                .with_public_key()
                .with_create_bucket("b", 10)
                .with_create_bucket("c", 1),
            PermissionSet {
                update_bucket: Some(vec![]),
                ..Default::default()
            },
            PermissionSet {
                create_bucket: Some(vec![CreateBucketGrant {
                    name: None,
                    size: 7,
                }]),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_reflexive() {
        for set in corpus() {
            assert!(satisfies(&set, &set), "not reflexive: {:?}", set);
        }
    }

    #[test]
    fn test_monotonic() {
        let corpus = corpus();
        for granted in &corpus {
            for requested in &corpus {
                if !satisfies(granted, requested) {
                    continue;
                }
                for extra in &corpus {
                    let mut widened = granted.clone();
                    widened.merge(extra);
                    assert!(
                        satisfies(&widened, requested),
                        "widening {:?} with {:?} lost {:?}",
                        granted,
                        extra,
                        requested
                    );
                }
            }
        }
    }

    #[test]
    fn test_everything_satisfies_empty_request() {
        for granted in corpus() {
            assert!(satisfies(&granted, &PermissionSet::new()));
        }
    }

    #[test]
    fn test_empty_grant_denies_capabilities() {
        let granted = PermissionSet::new();
        assert!(!satisfies(&granted, &PermissionSet::create_bucket("b", 10)));
        assert!(!satisfies(&granted, &PermissionSet::new().with_public_key()));
    }

    #[test]
    fn test_create_bucket_size_ceiling() {
        let granted = PermissionSet::create_bucket("b", 10);
        assert!(satisfies(&granted, &PermissionSet::create_bucket("b", 10)));
        assert!(satisfies(&granted, &PermissionSet::create_bucket("b", 3)));
        assert!(!satisfies(&granted, &PermissionSet::create_bucket("b", 11)));
        assert!(!satisfies(&granted, &PermissionSet::create_bucket("c", 1)));
    }

    #[test]
    fn test_wildcard_and_absent_names() {
        let wildcard = PermissionSet::create_bucket("*", 10);
        assert!(satisfies(&wildcard, &PermissionSet::create_bucket("anything", 10)));

        let unnamed = PermissionSet {
            update_bucket: Some(vec![UpdateBucketGrant { name: None }]),
            ..Default::default()
        };
        assert!(satisfies(&unnamed, &PermissionSet::update_bucket("x")));

        // a named grant does not cover an unnamed request
        let named = PermissionSet::update_bucket("x");
        let unnamed_request = unnamed.clone();
        assert!(!satisfies(&named, &unnamed_request));
    }

    #[test]
    fn test_every_requested_entry_needs_a_match() {
        let granted = PermissionSet::create_bucket("b", 10);
        let requested = PermissionSet::create_bucket("b", 1).with_create_bucket("c", 1);
        assert!(!satisfies(&granted, &requested));
    }

    #[test]
    fn test_present_but_empty_capability() {
        let requested = PermissionSet {
            update_bucket: Some(vec![]),
            ..Default::default()
        };
        assert!(!satisfies(&PermissionSet::new(), &requested));
        assert!(satisfies(&PermissionSet::update_bucket("b"), &requested));
    }
}
