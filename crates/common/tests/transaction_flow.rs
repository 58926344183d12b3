mod common;

use std::time::Duration;

use ::common::agent::ledger::Operation;
use ::common::agent::{Message, Reply, REQUEST_PENDING};
use ::common::negotiation::TRANSACTION_TIMEOUT;
use ::common::permission::PermissionSet;
use ::common::state::PendingRequest;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::{setup_agent, wait_for_pending, Agent, APP};

fn send(agent: &Agent, recipient: &str, amount: u64) -> JoinHandle<Option<Reply>> {
    let agent = agent.clone();
    let message = Message::RequestSendCurrency {
        public_key: recipient.to_string(),
        amount,
    };
    tokio::spawn(async move { agent.handle(APP, message).await })
}

fn funded_agent(amount: u64) -> Agent {
    let agent = setup_agent();
    let public_key = agent.public_key().unwrap();
    agent.ledger().fund(&public_key, amount);
    agent
}

#[tokio::test]
async fn test_approved_transaction_is_sent_once() {
    let agent = funded_agent(100);
    let handler = send(&agent, "pk1", 5);

    let PendingRequest::Transaction {
        id,
        recipient,
        amount,
        ..
    } = wait_for_pending(&agent).await
    else {
        panic!("expected a transaction prompt");
    };
    assert_eq!(recipient, "pk1");
    assert_eq!(amount, 5);
    assert_eq!(agent.state().transaction(&id), Some(false));

    agent.grant_pending();

    let reply = handler.await.unwrap();
    assert_eq!(
        reply,
        Some(Reply::TransactionApproved {
            id: id.clone(),
            public_key: "pk1".to_string(),
            amount: 5,
            popup_locator: "popup.html?send".to_string(),
        })
    );

    let transactions = agent.state().transactions();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions.get(&id), Some(&true));

    let submitted = agent.ledger().submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].operation,
        Operation::Send {
            to: "pk1".to_string(),
            amount: 5
        }
    );
    assert_eq!(agent.ledger().received("pk1"), 5);
    assert_eq!(agent.balance().await.unwrap(), 95);
}

#[tokio::test]
async fn test_approve_by_id() {
    let agent = funded_agent(100);
    let handler = send(&agent, "pk1", 5);

    let PendingRequest::Transaction { id, .. } = wait_for_pending(&agent).await else {
        panic!("expected a transaction prompt");
    };
    assert!(agent.approve_transaction(&id));

    assert!(matches!(
        handler.await.unwrap(),
        Some(Reply::TransactionApproved { .. })
    ));
    assert_eq!(agent.ledger().received("pk1"), 5);
}

#[tokio::test]
async fn test_denied_transaction_never_submits() {
    let agent = funded_agent(100);
    let handler = send(&agent, "pk1", 5);

    let PendingRequest::Transaction { id, .. } = wait_for_pending(&agent).await else {
        panic!("expected a transaction prompt");
    };
    agent.deny_pending();

    assert_eq!(handler.await.unwrap(), None);
    assert!(agent.ledger().submitted().is_empty());
    assert_eq!(agent.state().transaction(&id), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_transaction_expires_after_one_minute() {
    let agent = funded_agent(100);
    let start = Instant::now();

    let reply = send(&agent, "pk1", 5).await.unwrap();

    assert_eq!(reply, None);
    let elapsed = start.elapsed();
    assert!(elapsed >= TRANSACTION_TIMEOUT);
    assert!(elapsed < TRANSACTION_TIMEOUT + Duration::from_secs(1));
    assert!(agent.ledger().submitted().is_empty());
    assert!(agent.pending().is_none());
    assert!(agent.state().transactions().values().all(|approved| !approved));
}

#[tokio::test(start_paused = true)]
async fn test_late_approval_is_not_recorded() {
    let agent = funded_agent(100);
    let handler = send(&agent, "pk1", 5);

    let PendingRequest::Transaction { id, .. } = wait_for_pending(&agent).await else {
        panic!("expected a transaction prompt");
    };
    assert_eq!(handler.await.unwrap(), None);

    assert!(!agent.approve_transaction(&id));
    assert_eq!(agent.state().transaction(&id), Some(false));
    assert!(!agent.approve_transaction("t0"));
    assert_eq!(agent.state().transaction("t0"), None);
    assert!(agent.ledger().submitted().is_empty());
}

#[tokio::test]
async fn test_failed_send_is_an_error_reply() {
    let agent = funded_agent(1);
    let handler = send(&agent, "pk1", 5);

    wait_for_pending(&agent).await;
    agent.grant_pending();

    assert!(matches!(handler.await.unwrap(), Some(Reply::Error { .. })));
    assert_eq!(agent.ledger().received("pk1"), 0);
}

#[tokio::test]
async fn test_transaction_while_permission_pending_is_busy() {
    let agent = funded_agent(100);
    let permission = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .handle(
                    APP,
                    Message::RequestPermission {
                        permissions: PermissionSet::update_bucket("b"),
                    },
                )
                .await
        }
    });
    wait_for_pending(&agent).await;

    let reply = send(&agent, "pk1", 5).await.unwrap();
    assert_eq!(reply, Some(Reply::error(REQUEST_PENDING)));
    assert!(agent.state().transactions().is_empty());

    agent.deny_pending();
    assert_eq!(permission.await.unwrap(), None);
}
