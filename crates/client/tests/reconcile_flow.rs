//! End-to-end client flows against an in-memory server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use shelfmate_client::{
    BroadcastHub, BulkFailure, BulkOutcome, ClientError, ClientResult, FriendsClient,
    FriendshipTransport, Page, PartitionKey, PartitionKind, PushEvent, PushOutcome, Relationship,
    RelationshipStatus, Toast,
};
use shelfmate_common::relationship_id;
use tokio::sync::oneshot;

fn doc(owner: &str, friend: &str, status: RelationshipStatus, requested_by: &str) -> Relationship {
    Relationship {
        id: relationship_id(owner, friend),
        user_id: owner.to_string(),
        friend_id: friend.to_string(),
        status,
        requested_by: requested_by.to_string(),
        friendship_date: None,
        friend_username: friend.to_string(),
        friend_name: None,
        friend_avatar_url: None,
        friend_bio: None,
        mutual_friends_count: None,
        created_at: Utc::now().fixed_offset(),
        updated_at: None,
    }
}

fn received_from(friend: &str) -> Relationship {
    doc("alice", friend, RelationshipStatus::Pending, friend)
}

/// Alice's lists as the server sees them.
#[derive(Default)]
struct FakeServer {
    lists: Mutex<HashMap<PartitionKind, Vec<Relationship>>>,
    fetches: AtomicUsize,
    failures: Mutex<VecDeque<(String, String)>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
}

impl FakeServer {
    fn with_received(friends: &[&str]) -> Arc<Self> {
        let server = Self::default();
        server.lists.lock().unwrap().insert(
            PartitionKind::Received,
            friends.iter().map(|f| received_from(f)).collect(),
        );
        Arc::new(server)
    }

    /// Hold the next mutation to arrive until the returned sender fires.
    fn hold_mutations(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    fn fail_next(&self, code: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push_back((code.to_string(), message.to_string()));
    }

    async fn before_mutation(&self) -> ClientResult<()> {
        let gate = self.gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some((code, message)) => Err(ClientError::Api { code, message }),
            None => Ok(()),
        }
    }

    fn accept(&self, id: &str) -> Option<Relationship> {
        let mut lists = self.lists.lock().unwrap();
        let received = lists.entry(PartitionKind::Received).or_default();
        let pos = received.iter().position(|d| d.id == id)?;
        let mut accepted = received.remove(pos);
        accepted.status = RelationshipStatus::Accepted;
        accepted.friendship_date = Some(Utc::now().fixed_offset());
        lists
            .entry(PartitionKind::Friends)
            .or_default()
            .push(accepted.clone());
        Some(accepted)
    }
}

struct FakeTransport(Arc<FakeServer>);

fn not_found(what: &str) -> ClientError {
    ClientError::Api {
        code: "CONFLICT".to_string(),
        message: format!("{what} no longer exists"),
    }
}

#[async_trait]
impl FriendshipTransport for FakeTransport {
    async fn fetch_partition(
        &self,
        key: &PartitionKey,
        _until_id: Option<&str>,
        _limit: u64,
    ) -> ClientResult<Page<Relationship>> {
        self.0.fetches.fetch_add(1, Ordering::SeqCst);
        let items = self
            .0
            .lists
            .lock()
            .unwrap()
            .get(&key.kind)
            .cloned()
            .unwrap_or_default();
        Ok(Page {
            items,
            next_cursor: None,
        })
    }

    async fn send_request(&self, target_id: &str) -> ClientResult<Relationship> {
        self.0.before_mutation().await?;
        let sent = doc("alice", target_id, RelationshipStatus::Pending, "alice");
        self.0
            .lists
            .lock()
            .unwrap()
            .entry(PartitionKind::Sent)
            .or_default()
            .push(sent.clone());
        Ok(sent)
    }

    async fn accept_request(&self, id: &str) -> ClientResult<Relationship> {
        self.0.before_mutation().await?;
        self.0.accept(id).ok_or_else(|| not_found(id))
    }

    async fn reject_request(&self, _id: &str) -> ClientResult<()> {
        self.0.before_mutation().await
    }

    async fn cancel_sent_request(&self, _id: &str) -> ClientResult<()> {
        self.0.before_mutation().await
    }

    async fn remove_relationship(&self, _id: &str) -> ClientResult<()> {
        self.0.before_mutation().await
    }

    async fn block_user(&self, _user_id: &str) -> ClientResult<()> {
        self.0.before_mutation().await
    }

    async fn accept_all(&self, ids: &[String]) -> ClientResult<BulkOutcome> {
        self.0.before_mutation().await?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            if self.0.accept(id).is_some() {
                outcome.succeeded.push(id.clone());
            } else {
                outcome.failed.push(BulkFailure {
                    id: id.clone(),
                    code: "CONFLICT".to_string(),
                    message: "Relationship no longer exists".to_string(),
                });
            }
        }
        Ok(outcome)
    }

    async fn reject_all(&self, _ids: &[String]) -> ClientResult<BulkOutcome> {
        self.0.before_mutation().await?;
        Ok(BulkOutcome::default())
    }

    async fn cancel_all_sent(&self, _ids: &[String]) -> ClientResult<BulkOutcome> {
        self.0.before_mutation().await?;
        Ok(BulkOutcome::default())
    }

    async fn subscribe(&self) -> ClientResult<BoxStream<'static, ClientResult<PushEvent>>> {
        let events = vec![
            Ok(PushEvent::Connected),
            Ok(PushEvent::Partition {
                kind: PartitionKind::Received,
                items: vec![received_from("erin")],
            }),
        ];
        Ok(stream::iter(events).boxed())
    }
}

async fn loaded_client(server: &Arc<FakeServer>) -> FriendsClient<FakeTransport> {
    let client = FriendsClient::new("alice", FakeTransport(Arc::clone(server)));
    for kind in PartitionKind::ALL {
        client.load(&client.partition(kind)).await.unwrap();
    }
    client
}

fn friend_ids(client: &FriendsClient<FakeTransport>, kind: PartitionKind) -> Vec<String> {
    client
        .view(&client.partition(kind))
        .items
        .into_iter()
        .map(|d| d.friend_id)
        .collect()
}

fn friend_set(client: &FriendsClient<FakeTransport>, kind: PartitionKind) -> BTreeSet<String> {
    friend_ids(client, kind).into_iter().collect()
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(ToString::to_string).collect()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_accept_is_optimistic_and_push_is_suppressed_until_settled() {
    let server = FakeServer::with_received(&["bob"]);
    let client = loaded_client(&server).await;
    let mut toasts = client.toasts();

    let release = server.hold_mutations();
    let id = relationship_id("alice", "bob");
    let task = {
        let client = client.clone();
        let id = id.clone();
        tokio::spawn(async move { client.accept_request(&id).await })
    };

    eventually(|| friend_ids(&client, PartitionKind::Friends) == ["bob"]).await;
    assert!(friend_ids(&client, PartitionKind::Received).is_empty());

    // The server has not applied the accept yet, so its snapshot still lists bob.
    let outcome = client.handle_push(PushEvent::Partition {
        kind: PartitionKind::Received,
        items: vec![received_from("bob")],
    });
    assert_eq!(outcome, Some(PushOutcome::Suppressed));
    assert!(friend_ids(&client, PartitionKind::Received).is_empty());

    release.send(()).unwrap();
    let accepted = task.await.unwrap().unwrap();
    assert_eq!(accepted.status, RelationshipStatus::Accepted);

    assert_eq!(
        toasts.recv().await.unwrap(),
        Toast::Success("Friend request accepted".to_string())
    );
    assert_eq!(friend_ids(&client, PartitionKind::Friends), ["bob"]);
    assert!(!client.view(&client.partition(PartitionKind::Friends)).stale);

    let outcome = client.handle_push(PushEvent::Partition {
        kind: PartitionKind::Received,
        items: vec![],
    });
    assert_eq!(outcome, Some(PushOutcome::Merged));
}

#[tokio::test]
async fn test_failed_accept_rolls_back_and_toasts() {
    let server = FakeServer::with_received(&["bob", "carol"]);
    let client = loaded_client(&server).await;
    let mut toasts = client.toasts();
    let before = client.view(&client.partition(PartitionKind::Received));

    server.fail_next("CONFLICT", "Request is no longer pending");
    let err = client
        .accept_request(&relationship_id("alice", "bob"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "CONFLICT");
    assert_eq!(client.view(&client.partition(PartitionKind::Received)), before);
    assert!(friend_ids(&client, PartitionKind::Friends).is_empty());
    assert_eq!(
        toasts.recv().await.unwrap(),
        Toast::Error("Request is no longer pending".to_string())
    );
}

#[tokio::test]
async fn test_second_mutation_on_same_user_is_refused_while_in_flight() {
    let server = FakeServer::with_received(&["bob"]);
    let client = loaded_client(&server).await;

    let release = server.hold_mutations();
    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.accept_request(&relationship_id("alice", "bob")).await })
    };
    eventually(|| friend_ids(&client, PartitionKind::Friends) == ["bob"]).await;

    let second = client
        .reject_request(&relationship_id("alice", "bob"))
        .await;
    assert!(matches!(second, Err(ClientError::InFlight(user)) if user == "bob"));

    release.send(()).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bulk_accept_reports_partial_failure() {
    let server = FakeServer::with_received(&["bob"]);
    let client = loaded_client(&server).await;
    let mut toasts = client.toasts();

    let outcome = client
        .accept_all(&[relationship_id("alice", "bob"), relationship_id("alice", "zed")])
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, vec![relationship_id("alice", "bob")]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(
        toasts.recv().await.unwrap(),
        Toast::Error("1 accepted, 1 failed".to_string())
    );
    assert_eq!(friend_ids(&client, PartitionKind::Friends), ["bob"]);
}

#[tokio::test]
async fn test_sibling_client_refetches_after_broadcast() {
    let server = FakeServer::with_received(&["bob"]);
    let hub = BroadcastHub::new();

    let tab_a = loaded_client(&server).await.with_broadcast(hub.clone());
    let tab_b = loaded_client(&server).await.with_broadcast(hub);
    let listener = tab_b.spawn_tab_listener().unwrap();

    tab_a
        .accept_request(&relationship_id("alice", "bob"))
        .await
        .unwrap();

    eventually(|| friend_ids(&tab_b, PartitionKind::Friends) == ["bob"]).await;
    assert!(friend_ids(&tab_b, PartitionKind::Received).is_empty());
    listener.abort();
}

#[tokio::test]
async fn test_send_shows_placeholder_then_server_copy() {
    let server = FakeServer::with_received(&[]);
    let client = loaded_client(&server).await;
    let fetches_before = server.fetches.load(Ordering::SeqCst);

    client.send_request("dave").await.unwrap();

    assert_eq!(friend_ids(&client, PartitionKind::Sent), ["dave"]);
    // Every list of the viewer is refetched after a successful mutation.
    assert_eq!(server.fetches.load(Ordering::SeqCst), fetches_before + 3);
}

#[tokio::test]
async fn test_push_listener_applies_snapshots() {
    let server = FakeServer::with_received(&[]);
    let client = loaded_client(&server).await;

    client.spawn_push_listener().await.unwrap();

    assert_eq!(friend_ids(&client, PartitionKind::Received), ["erin"]);
}

#[tokio::test]
async fn test_overlapping_accepts_that_both_fail_leave_no_trace() {
    let server = FakeServer::with_received(&["bob", "carol"]);
    let client = loaded_client(&server).await;

    let release_bob = server.hold_mutations();
    let release_carol = server.hold_mutations();
    let bob = {
        let client = client.clone();
        tokio::spawn(async move { client.accept_request(&relationship_id("alice", "bob")).await })
    };
    eventually(|| friend_set(&client, PartitionKind::Friends) == set(&["bob"])).await;
    let carol = {
        let client = client.clone();
        tokio::spawn(async move { client.accept_request(&relationship_id("alice", "carol")).await })
    };
    eventually(|| friend_set(&client, PartitionKind::Friends) == set(&["bob", "carol"])).await;

    server.fail_next("CONFLICT", "Request is no longer pending");
    server.fail_next("CONFLICT", "Request is no longer pending");

    release_bob.send(()).unwrap();
    assert!(bob.await.unwrap().is_err());
    // Carol's accept is still pending and keeps its optimistic effect.
    assert_eq!(friend_set(&client, PartitionKind::Friends), set(&["carol"]));
    assert_eq!(friend_set(&client, PartitionKind::Received), set(&["bob"]));

    release_carol.send(()).unwrap();
    assert!(carol.await.unwrap().is_err());
    assert!(friend_ids(&client, PartitionKind::Friends).is_empty());
    assert_eq!(
        friend_set(&client, PartitionKind::Received),
        set(&["bob", "carol"])
    );
}

#[tokio::test]
async fn test_refetch_after_one_accept_keeps_the_other_pending_accept() {
    let server = FakeServer::with_received(&["bob", "carol"]);
    let client = loaded_client(&server).await;

    let release_bob = server.hold_mutations();
    let release_carol = server.hold_mutations();
    let bob = {
        let client = client.clone();
        tokio::spawn(async move { client.accept_request(&relationship_id("alice", "bob")).await })
    };
    eventually(|| friend_set(&client, PartitionKind::Friends) == set(&["bob"])).await;
    let carol = {
        let client = client.clone();
        tokio::spawn(async move { client.accept_request(&relationship_id("alice", "carol")).await })
    };
    eventually(|| friend_set(&client, PartitionKind::Friends) == set(&["bob", "carol"])).await;

    // Bob's settle refetches every list while the server still has carol pending.
    release_bob.send(()).unwrap();
    bob.await.unwrap().unwrap();
    assert!(friend_ids(&client, PartitionKind::Received).is_empty());
    assert_eq!(
        friend_set(&client, PartitionKind::Friends),
        set(&["bob", "carol"])
    );

    release_carol.send(()).unwrap();
    carol.await.unwrap().unwrap();
    assert!(friend_ids(&client, PartitionKind::Received).is_empty());
    assert_eq!(
        friend_set(&client, PartitionKind::Friends),
        set(&["bob", "carol"])
    );
    assert!(!client.view(&client.partition(PartitionKind::Friends)).stale);
}
