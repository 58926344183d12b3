//! Integration tests for lazy bucket fetching and the local overlay

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use ::common::agent::ledger::MemoryLedger;
use ::common::agent::ScopedAgent;
use ::common::bucket::{Bucket, Distribution, Locator, MemoryDistribution, Swarm};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::{scoped, setup_agent};

type TestBucket = Bucket<MemoryDistribution, ScopedAgent<MemoryLedger>>;

async fn published(distribution: &MemoryDistribution, files: &[(&str, &str)]) -> Locator {
    let files = files
        .iter()
        .map(|(name, data)| (name.to_string(), Bytes::from(data.to_string())))
        .collect();
    let swarm = distribution.publish(files).await.unwrap();
    swarm.locator().clone()
}

fn open(distribution: &MemoryDistribution, locator: Locator) -> TestBucket {
    let agent = setup_agent();
    let owner = agent.public_key().unwrap();
    scoped(&agent).open_bucket(distribution.clone(), "photos", owner, 1 << 20, locator)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_fetch_once() {
    let distribution = MemoryDistribution::new();
    distribution.set_latency(Duration::from_millis(250));
    let locator = published(&distribution, &[("a.txt", "1"), ("b.txt", "2")]).await;
    let bucket = open(&distribution, locator);
    assert!(bucket.is_fetch_pending());

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let bucket = bucket.clone();
            tokio::spawn(async move { bucket.list_filenames().await.unwrap() })
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.await.unwrap(), vec!["a.txt", "b.txt"]);
    }

    assert_eq!(distribution.joins(), 1);
    assert_eq!(distribution.fetches(), 1);
    assert!(!bucket.is_fetch_pending());

    bucket.read_file("a.txt").await.unwrap();
    assert_eq!(distribution.joins(), 1);
}

#[tokio::test]
async fn test_overlay_shadows_remote() {
    let distribution = MemoryDistribution::new();
    let locator = published(&distribution, &[("a.txt", "remote"), ("b.txt", "remote")]).await;
    let bucket = open(&distribution, locator);

    bucket.write_text("a.txt", "local");

    assert_eq!(bucket.read_text("a.txt").await.unwrap().unwrap(), "local");
    assert_eq!(bucket.read_text("b.txt").await.unwrap().unwrap(), "remote");
    assert_eq!(bucket.read_text("c.txt").await.unwrap(), None);
}

#[tokio::test]
async fn test_listing_is_sorted_and_unique() {
    let distribution = MemoryDistribution::new();
    let locator = published(&distribution, &[("m.txt", "1"), ("b.txt", "2")]).await;
    let bucket = open(&distribution, locator);

    bucket.write_text("z.txt", "3");
    bucket.write_text("b.txt", "shadow");
    bucket.write_text("a.txt", "4");

    assert_eq!(
        bucket.list_filenames().await.unwrap(),
        vec!["a.txt", "b.txt", "m.txt", "z.txt"]
    );
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Album {
    title: String,
    photos: Vec<String>,
    tags: BTreeMap<String, u32>,
}

#[tokio::test]
async fn test_json_round_trip() {
    let bucket = open(&MemoryDistribution::new(), Locator::default());
    let album = Album {
        title: "summer".into(),
        photos: vec!["1.jpg".into(), "2.jpg".into()],
        tags: BTreeMap::from([("beach".into(), 2)]),
    };

    bucket.write_json("album.json", &album).unwrap();
    let read: Album = bucket.read_json("album.json").await.unwrap().unwrap();
    assert_eq!(read, album);
}

#[tokio::test]
async fn test_failed_fetch_can_be_retried() {
    let distribution = MemoryDistribution::new();
    let locator = published(&distribution, &[("a.txt", "1")]).await;
    let bucket = open(&distribution, locator);

    distribution.set_offline(true);
    assert!(bucket.list_filenames().await.is_err());
    assert!(bucket.is_fetch_pending());

    distribution.set_offline(false);
    assert_eq!(bucket.list_filenames().await.unwrap(), vec!["a.txt"]);
    assert!(!bucket.is_fetch_pending());
}
