//! Integration tests for publishing buckets through the agent

mod common;

use std::time::Duration;

use ::common::agent::ledger::MemoryLedger;
use ::common::agent::{AgentError, ScopedAgent};
use ::common::bucket::{Bucket, BucketError, Distribution, Locator, MemoryDistribution, Swarm};
use ::common::permission::PermissionSet;
use ::common::state::PendingRequest;
use bytes::Bytes;

use crate::common::{scoped, setup_agent, wait_for_pending, Agent, APP};

type TestBucket = Bucket<MemoryDistribution, ScopedAgent<MemoryLedger>>;

/// An agent that has registered an empty `photos` bucket
async fn with_registered_bucket(distribution: &MemoryDistribution) -> (Agent, TestBucket) {
    let agent = setup_agent();
    agent
        .state()
        .grant_permission(APP, &PermissionSet::create_bucket("photos", 1 << 20));
    let scoped = scoped(&agent);
    scoped.create_bucket("photos", 1 << 20).await.unwrap();

    let owner = agent.public_key().unwrap();
    let bucket = scoped.open_bucket(
        distribution.clone(),
        "photos",
        owner,
        1 << 20,
        Locator::default(),
    );
    (agent, bucket)
}

#[tokio::test]
async fn test_publish_asks_for_permission_then_updates_ledger() {
    let distribution = MemoryDistribution::new();
    let (agent, bucket) = with_registered_bucket(&distribution).await;
    bucket.write_text("a.txt", "hello");
    bucket.write_json("meta.json", &serde_json::json!({ "v": 1 })).unwrap();

    let publisher = tokio::spawn({
        let bucket = bucket.clone();
        async move { bucket.publish().await }
    });

    let pending = wait_for_pending(&agent).await;
    assert_eq!(
        pending,
        PendingRequest::Permission {
            identity: APP.to_string(),
            permissions: PermissionSet::update_bucket("photos"),
        }
    );
    agent.grant_pending();

    let locator = publisher.await.unwrap().unwrap();
    assert!(locator.as_str().starts_with("blake3:"));
    assert_eq!(bucket.locator(), locator);
    assert_eq!(agent.ledger().bucket("photos").unwrap().locator, locator.as_str());
    assert!(distribution.holders(&locator) >= 1);

    // the published locator serves the same files to a fresh reader
    let reader = scoped(&agent).open_bucket(
        distribution.clone(),
        "photos",
        agent.public_key().unwrap(),
        1 << 20,
        locator,
    );
    assert_eq!(
        reader.list_filenames().await.unwrap(),
        vec!["a.txt", "meta.json"]
    );
    assert_eq!(reader.read_text("a.txt").await.unwrap().unwrap(), "hello");
}

#[tokio::test]
async fn test_denied_publish_leaves_ledger_alone() {
    let distribution = MemoryDistribution::new();
    let (agent, bucket) = with_registered_bucket(&distribution).await;
    bucket.write_text("a.txt", "hello");
    let submitted = agent.ledger().submitted().len();

    let publisher = tokio::spawn({
        let bucket = bucket.clone();
        async move { bucket.publish().await }
    });
    wait_for_pending(&agent).await;
    agent.deny_pending();

    let result = publisher.await.unwrap();
    assert!(matches!(result, Err(BucketError::Authority(_))));
    assert_eq!(agent.ledger().submitted().len(), submitted);
    assert_eq!(agent.ledger().bucket("photos").unwrap().locator, "");
    assert!(bucket.locator().is_empty());
    assert_eq!(bucket.read_text("a.txt").await.unwrap().unwrap(), "hello");
}

#[tokio::test(start_paused = true)]
async fn test_publish_waits_for_a_holder() {
    let distribution = MemoryDistribution::isolated();
    let (agent, bucket) = with_registered_bucket(&distribution).await;
    agent
        .state()
        .grant_permission(APP, &PermissionSet::update_bucket("photos"));
    bucket.write_text("a.txt", "hello");

    // same content, same locator
    let expected = distribution
        .publish(vec![("a.txt".to_string(), Bytes::from("hello"))])
        .await
        .unwrap()
        .locator()
        .clone();

    let publisher = tokio::spawn({
        let bucket = bucket.clone();
        async move { bucket.publish().await }
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!publisher.is_finished());
    assert_eq!(agent.ledger().bucket("photos").unwrap().locator, "");

    assert!(distribution.attach_holder(&expected));
    let locator = publisher.await.unwrap().unwrap();
    assert_eq!(locator, expected);
    assert_eq!(agent.ledger().bucket("photos").unwrap().locator, expected.as_str());
}

#[tokio::test]
async fn test_republish_releases_previous_swarm() {
    let distribution = MemoryDistribution::new();
    let (agent, bucket) = with_registered_bucket(&distribution).await;
    agent
        .state()
        .grant_permission(APP, &PermissionSet::update_bucket("*"));

    bucket.write_text("a.txt", "one");
    let first = bucket.publish().await.unwrap();

    let reader = scoped(&agent).open_bucket(
        distribution.clone(),
        "photos",
        agent.public_key().unwrap(),
        1 << 20,
        first.clone(),
    );
    reader.write_text("b.txt", "two");
    let second = reader.publish().await.unwrap();

    assert_ne!(first, second);
    assert_eq!(distribution.joins(), 1);
    assert!(distribution.releases() >= 1);
    assert_eq!(agent.ledger().bucket("photos").unwrap().locator, second.as_str());
    assert_eq!(
        reader.list_filenames().await.unwrap(),
        vec!["a.txt", "b.txt"]
    );
}

#[tokio::test]
async fn test_create_bucket_requires_permission() {
    let agent = setup_agent();
    let result = scoped(&agent).create_bucket("photos", 10).await;
    assert!(matches!(result, Err(AgentError::Rejected(_))));
    assert!(agent.ledger().bucket("photos").is_none());
}
