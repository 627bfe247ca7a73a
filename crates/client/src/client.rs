//! Friends client: the cache, the transport and the cross-tab hub together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastHub, TabMessage};
use crate::cache::{FetchTicket, PartitionView, PushOutcome, ReconcileCache};
use crate::error::ClientResult;
use crate::model::{
    BulkOutcome, Page, PartitionKey, PartitionKind, PushEvent, Relationship, SortOrder,
};
use crate::mutation::Mutation;
use crate::transport::FriendshipTransport;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// Default page size for list fetches.
pub const DEFAULT_PAGE_SIZE: u64 = 30;

/// User-facing message emitted after a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toast {
    /// The mutation went through.
    Success(String),
    /// The mutation failed and local state was rolled back.
    Error(String),
}

/// Friends client for one signed-in user.
pub struct FriendsClient<T> {
    transport: Arc<T>,
    cache: Arc<Mutex<ReconcileCache>>,
    hub: Option<BroadcastHub>,
    origin: u64,
    page_size: u64,
    toasts: broadcast::Sender<Toast>,
}

impl<T> Clone for FriendsClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            hub: self.hub.clone(),
            origin: self.origin,
            page_size: self.page_size,
            toasts: self.toasts.clone(),
        }
    }
}

impl<T: FriendshipTransport + 'static> FriendsClient<T> {
    /// Create a client for `viewer_id`.
    #[must_use]
    pub fn new(viewer_id: impl Into<String>, transport: T) -> Self {
        let (toasts, _) = broadcast::channel(32);
        Self {
            transport: Arc::new(transport),
            cache: Arc::new(Mutex::new(ReconcileCache::new(viewer_id))),
            hub: None,
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed),
            page_size: DEFAULT_PAGE_SIZE,
            toasts,
        }
    }

    /// Share completed mutations with sibling clients through `hub`.
    #[must_use]
    pub fn with_broadcast(mut self, hub: BroadcastHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Override the page size used for fetches.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    fn cache(&self) -> MutexGuard<'_, ReconcileCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The signed-in user.
    #[must_use]
    pub fn viewer_id(&self) -> String {
        self.cache().viewer().to_string()
    }

    /// Key of one of the viewer's lists.
    #[must_use]
    pub fn partition(&self, kind: PartitionKind) -> PartitionKey {
        self.cache().viewer_key(kind)
    }

    /// Listen for toasts.
    #[must_use]
    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.toasts.subscribe()
    }

    /// What to render for a list.
    #[must_use]
    pub fn view(&self, key: &PartitionKey) -> PartitionView {
        self.cache().view(key)
    }

    /// Filter a list locally.
    pub fn set_search(&self, key: &PartitionKey, search: impl Into<String>) {
        self.cache().set_search(key, search);
    }

    /// Sort a list locally.
    pub fn set_sort(&self, key: &PartitionKey, sort: SortOrder) {
        self.cache().set_sort(key, sort);
    }

    // === Fetching ===

    /// Fetch the first page of a list.
    pub async fn load(&self, key: &PartitionKey) -> ClientResult<()> {
        let ticket = self.cache().begin_fetch(key);
        let result = self
            .transport
            .fetch_partition(key, None, self.page_size)
            .await;
        self.finish_fetch(&ticket, result)
    }

    /// Fetch the next page of a list. Does nothing when the list is complete
    /// or already loading.
    pub async fn load_more(&self, key: &PartitionKey) -> ClientResult<()> {
        let Some(ticket) = self.cache().begin_fetch_more(key) else {
            return Ok(());
        };
        let result = self
            .transport
            .fetch_partition(key, ticket.until_id.as_deref(), self.page_size)
            .await;
        self.finish_fetch(&ticket, result)
    }

    fn finish_fetch(
        &self,
        ticket: &FetchTicket,
        result: ClientResult<Page<Relationship>>,
    ) -> ClientResult<()> {
        match result {
            Ok(page) => {
                self.cache().complete_fetch(ticket, page);
                Ok(())
            }
            Err(e) => {
                self.cache().fail_fetch(ticket, e.to_string());
                Err(e)
            }
        }
    }

    /// Refetch every list marked stale. Failures are recorded on the list.
    pub async fn refresh_stale(&self) {
        let keys = self.cache().stale_keys();
        for key in keys {
            if let Err(e) = self.load(&key).await {
                warn!(error = %e, ?key, "Failed to refetch list");
            }
        }
    }

    // === Mutations ===

    /// Send a friend request.
    pub async fn send_request(&self, target_id: &str) -> ClientResult<Relationship> {
        let mutation = Mutation::Send {
            target_id: target_id.to_string(),
        };
        self.mutate(mutation, "Friend request sent", |t| async move {
            t.send_request(target_id).await
        })
        .await
    }

    /// Accept a received request.
    pub async fn accept_request(&self, id: &str) -> ClientResult<Relationship> {
        let mutation = Mutation::Accept {
            ids: vec![id.to_string()],
        };
        self.mutate(mutation, "Friend request accepted", |t| async move {
            t.accept_request(id).await
        })
        .await
    }

    /// Reject a received request.
    pub async fn reject_request(&self, id: &str) -> ClientResult<()> {
        let mutation = Mutation::Reject {
            ids: vec![id.to_string()],
        };
        self.mutate(mutation, "Friend request rejected", |t| async move {
            t.reject_request(id).await
        })
        .await
    }

    /// Withdraw a sent request.
    pub async fn cancel_sent_request(&self, id: &str) -> ClientResult<()> {
        let mutation = Mutation::Cancel {
            ids: vec![id.to_string()],
        };
        self.mutate(mutation, "Friend request cancelled", |t| async move {
            t.cancel_sent_request(id).await
        })
        .await
    }

    /// End a friendship.
    pub async fn remove_relationship(&self, id: &str) -> ClientResult<()> {
        let mutation = Mutation::Remove { id: id.to_string() };
        self.mutate(mutation, "Friend removed", |t| async move {
            t.remove_relationship(id).await
        })
        .await
    }

    /// Block a user.
    pub async fn block_user(&self, user_id: &str) -> ClientResult<()> {
        let mutation = Mutation::Block {
            user_id: user_id.to_string(),
        };
        self.mutate(mutation, "User blocked", |t| async move {
            t.block_user(user_id).await
        })
        .await
    }

    /// Accept several requests.
    pub async fn accept_all(&self, ids: &[String]) -> ClientResult<BulkOutcome> {
        let mutation = Mutation::Accept { ids: ids.to_vec() };
        self.mutate_bulk(mutation, "accepted", |t| async move { t.accept_all(ids).await })
            .await
    }

    /// Reject several requests.
    pub async fn reject_all(&self, ids: &[String]) -> ClientResult<BulkOutcome> {
        let mutation = Mutation::Reject { ids: ids.to_vec() };
        self.mutate_bulk(mutation, "rejected", |t| async move { t.reject_all(ids).await })
            .await
    }

    /// Withdraw several sent requests.
    pub async fn cancel_all_sent(&self, ids: &[String]) -> ClientResult<BulkOutcome> {
        let mutation = Mutation::Cancel { ids: ids.to_vec() };
        self.mutate_bulk(mutation, "cancelled", |t| async move {
            t.cancel_all_sent(ids).await
        })
        .await
    }

    async fn mutate<R, F, Fut>(&self, mutation: Mutation, done: &str, call: F) -> ClientResult<R>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = ClientResult<R>>,
    {
        let token = self
            .cache()
            .begin_mutation(mutation, Utc::now().fixed_offset())?;

        match call(Arc::clone(&self.transport)).await {
            Ok(value) => {
                let stale = self.cache().settle_success(token);
                self.announce(&stale);
                self.toast(Toast::Success(done.to_string()));
                self.refresh_stale().await;
                Ok(value)
            }
            Err(e) => {
                self.cache().settle_failure(token);
                self.toast(Toast::Error(e.to_string()));
                self.refresh_stale().await;
                Err(e)
            }
        }
    }

    /// Like `mutate`, but per-id failures inside a successful response only
    /// narrow the success effects and are reported in the toast.
    async fn mutate_bulk<F, Fut>(
        &self,
        mutation: Mutation,
        verb: &str,
        call: F,
    ) -> ClientResult<BulkOutcome>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = ClientResult<BulkOutcome>>,
    {
        let mut token = self
            .cache()
            .begin_mutation(mutation, Utc::now().fixed_offset())?;

        match call(Arc::clone(&self.transport)).await {
            Ok(outcome) => {
                token.narrow(&outcome.succeeded);
                let stale = self.cache().settle_success(token);
                self.announce(&stale);
                let toast = if outcome.failed.is_empty() {
                    Toast::Success(format!("{} {verb}", outcome.succeeded.len()))
                } else {
                    Toast::Error(format!(
                        "{} {verb}, {} failed",
                        outcome.succeeded.len(),
                        outcome.failed.len()
                    ))
                };
                self.toast(toast);
                self.refresh_stale().await;
                Ok(outcome)
            }
            Err(e) => {
                self.cache().settle_failure(token);
                self.toast(Toast::Error(e.to_string()));
                self.refresh_stale().await;
                Err(e)
            }
        }
    }

    fn toast(&self, toast: Toast) {
        let _ = self.toasts.send(toast);
    }

    fn announce(&self, stale: &[PartitionKey]) {
        if let Some(hub) = &self.hub {
            let viewer = self.viewer_id();
            hub.publish(
                &viewer,
                TabMessage {
                    origin: self.origin,
                    kinds: stale.iter().map(|key| key.kind).collect(),
                },
            );
        }
    }

    // === Real-time ===

    /// Apply one event from the real-time stream.
    pub fn handle_push(&self, event: PushEvent) -> Option<PushOutcome> {
        match event {
            PushEvent::Partition { kind, items } => {
                let mut cache = self.cache();
                let key = cache.viewer_key(kind);
                Some(cache.apply_push(&key, items))
            }
            PushEvent::Connected => {
                debug!("Event stream connected");
                None
            }
            PushEvent::Notification {
                notification_type,
                actor_id,
                ..
            } => {
                debug!(%notification_type, %actor_id, "Notification received");
                None
            }
        }
    }

    /// Consume the real-time stream in the background until it ends.
    pub fn spawn_push_listener(&self) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut events = match client.transport.subscribe().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Failed to open event stream");
                    return;
                }
            };
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        client.handle_push(event);
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable push event"),
                }
            }
            info!("Event stream ended");
        })
    }

    /// React to sibling clients' messages in the background. Messages from
    /// this client are ignored.
    pub fn spawn_tab_listener(&self) -> Option<JoinHandle<()>> {
        let hub = self.hub.as_ref()?;
        let mut rx = hub.subscribe(&self.viewer_id());
        let client = self.clone();
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) if message.origin == client.origin => {}
                    Ok(message) => {
                        {
                            let mut cache = client.cache();
                            let keys: Vec<_> = message
                                .kinds
                                .iter()
                                .map(|&kind| cache.viewer_key(kind))
                                .collect();
                            cache.mark_stale(&keys);
                        }
                        client.refresh_stale().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let keys: Vec<_> = PartitionKind::ALL
                            .iter()
                            .map(|&kind| client.partition(kind))
                            .collect();
                        client.cache().mark_stale(&keys);
                        client.refresh_stale().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}
