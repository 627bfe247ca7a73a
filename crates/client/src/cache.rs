//! Reconciliation cache for relationship lists.
//!
//! Each cached list merges three sources: fetched pages, real-time snapshots
//! pushed by the server, and optimistic mutations applied locally. Every list
//! moves through `Idle -> Loading -> Loaded`.
//!
//! While mutations are in flight, each list they touch keeps a *base*: the
//! server-derived state underneath the optimistic effects. What is rendered is
//! always the base with every in-flight mutation replayed over it in the order
//! they began. A rejected mutation simply leaves the replay, so overlapping
//! mutations never undo each other; a confirmed one is folded into the base.
//! Fetched pages that land meanwhile replace the base rather than the rendered
//! items.
//!
//! Pushed snapshots for touched lists are dropped instead: the snapshot may
//! predate the write. The check runs when the push arrives, so a push that
//! lands after the last touching mutation settles is merged normally.
//!
//! The cache is synchronous. Callers hold one lock across base capture and
//! optimistic apply.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::model::{Page, PartitionKey, PartitionKind, Relationship, SortOrder, ViewOptions};
use crate::mutation::Mutation;

/// Load state of a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    /// Never fetched.
    #[default]
    Idle,
    /// A fetch is in flight.
    Loading,
    /// Populated by a fetch or a push.
    Loaded,
}

/// Contents and load status of a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PartitionData {
    items: Vec<Relationship>,
    state: LoadState,
    error: Option<String>,
    next_cursor: Option<String>,
    stale: bool,
}

#[derive(Debug, Default)]
struct Partition {
    data: PartitionData,
    /// State without optimistic effects; present while a touching mutation
    /// is in flight.
    base: Option<PartitionData>,
    /// Bumped whenever outstanding fetches must be discarded.
    generation: u64,
    view: ViewOptions,
}

/// What a consumer renders for one list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionView {
    /// Items after search and sort.
    pub items: Vec<Relationship>,
    /// A fetch is in flight.
    pub loading: bool,
    /// Last fetch error.
    pub error: Option<String>,
    /// Cursor for the next page.
    pub next_cursor: Option<String>,
    /// The list needs a refetch.
    pub stale: bool,
}

/// Handle for one fetch. Completing it after the list's generation moved on
/// is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    /// The list being fetched.
    pub key: PartitionKey,
    /// Cursor to fetch from; `None` fetches the first page.
    pub until_id: Option<String>,
    generation: u64,
}

/// Handle for one in-flight mutation.
#[derive(Debug)]
pub struct MutationToken {
    id: u64,
    mutation: Mutation,
    started_at: DateTime<FixedOffset>,
}

impl MutationToken {
    /// The mutation this token tracks.
    #[must_use]
    pub const fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Restrict the success effects to the ids the server confirmed.
    pub fn narrow(&mut self, confirmed: &[String]) {
        self.mutation.narrow(confirmed);
    }
}

#[derive(Debug)]
struct InFlight {
    mutation: Mutation,
    started_at: DateTime<FixedOffset>,
    counterparts: Vec<String>,
    touched: Vec<PartitionKey>,
}

/// Result of offering a pushed snapshot to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The snapshot replaced the cached list.
    Merged,
    /// A mutation touching the list is in flight; the snapshot was dropped.
    Suppressed,
}

/// Per-viewer cache of relationship lists.
#[derive(Debug)]
pub struct ReconcileCache {
    viewer: String,
    partitions: BTreeMap<PartitionKey, Partition>,
    in_flight: BTreeMap<u64, InFlight>,
    next_token: u64,
}

impl ReconcileCache {
    /// Create an empty cache for `viewer`.
    #[must_use]
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            partitions: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            next_token: 0,
        }
    }

    /// The user this cache belongs to.
    #[must_use]
    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    /// Key of one of the viewer's own lists.
    #[must_use]
    pub fn viewer_key(&self, kind: PartitionKind) -> PartitionKey {
        PartitionKey::new(self.viewer.clone(), kind)
    }

    fn partition_mut(&mut self, key: &PartitionKey) -> &mut Partition {
        self.partitions.entry(key.clone()).or_default()
    }

    // === Fetching ===

    /// Start fetching the first page of a list, superseding any fetch already
    /// in flight for it.
    pub fn begin_fetch(&mut self, key: &PartitionKey) -> FetchTicket {
        let partition = self.partition_mut(key);
        partition.generation += 1;
        partition.data.state = LoadState::Loading;
        FetchTicket {
            key: key.clone(),
            until_id: None,
            generation: partition.generation,
        }
    }

    /// Start fetching the page after the cached items. Returns `None` when the
    /// list is complete or another fetch is already running.
    pub fn begin_fetch_more(&mut self, key: &PartitionKey) -> Option<FetchTicket> {
        let partition = self.partition_mut(key);
        if partition.data.state != LoadState::Loaded {
            return None;
        }
        let until_id = partition.data.next_cursor.clone()?;
        partition.generation += 1;
        partition.data.state = LoadState::Loading;
        Some(FetchTicket {
            key: key.clone(),
            until_id: Some(until_id),
            generation: partition.generation,
        })
    }

    /// Store a fetched page. Returns `false` when the fetch was superseded.
    ///
    /// While a mutation touching the list is in flight the page becomes the
    /// new base and the in-flight mutations are replayed over it.
    pub fn complete_fetch(&mut self, ticket: &FetchTicket, page: Page<Relationship>) -> bool {
        let partition = self.partition_mut(&ticket.key);
        if partition.generation != ticket.generation {
            debug!(key = ?ticket.key, "Discarding superseded fetch");
            return false;
        }

        let rebased = if let Some(base) = partition.base.as_mut() {
            store_page(base, ticket, page);
            let data = &mut partition.data;
            data.state = LoadState::Loaded;
            data.stale = false;
            true
        } else {
            store_page(&mut partition.data, ticket, page);
            false
        };

        if rebased {
            debug!(key = ?ticket.key, "Replaying in-flight mutations over fetched page");
            self.replay();
        }
        true
    }

    /// Record a failed fetch. Returns `false` when the fetch was superseded.
    pub fn fail_fetch(&mut self, ticket: &FetchTicket, message: impl Into<String>) -> bool {
        let partition = self.partition_mut(&ticket.key);
        if partition.generation != ticket.generation {
            return false;
        }
        let data = &mut partition.data;
        data.state = if data.items.is_empty() && ticket.until_id.is_none() {
            LoadState::Idle
        } else {
            LoadState::Loaded
        };
        data.error = Some(message.into());
        true
    }

    // === Real-time push ===

    /// Whether a mutation touching `key` is in flight.
    #[must_use]
    pub fn is_suppressed(&self, key: &PartitionKey) -> bool {
        self.in_flight
            .values()
            .any(|flight| flight.touched.contains(key))
    }

    /// Offer a full snapshot of a list. Documents missing from the snapshot
    /// are dropped from the cache.
    pub fn apply_push(&mut self, key: &PartitionKey, items: Vec<Relationship>) -> PushOutcome {
        if self.is_suppressed(key) {
            debug!(?key, "Suppressing push during in-flight mutation");
            return PushOutcome::Suppressed;
        }
        let data = &mut self.partition_mut(key).data;
        data.items = items;
        data.error = None;
        data.stale = false;
        if data.state == LoadState::Idle {
            data.state = LoadState::Loaded;
        }
        PushOutcome::Merged
    }

    // === Mutations ===

    /// Capture the base of the lists `mutation` touches, then apply its
    /// optimistic effect.
    ///
    /// Fetches in flight for those lists are cancelled. Fails without changing
    /// anything when a mutation naming the same counterpart has not settled.
    pub fn begin_mutation(
        &mut self,
        mutation: Mutation,
        now: DateTime<FixedOffset>,
    ) -> ClientResult<MutationToken> {
        let counterparts = mutation.counterparts(&self.viewer);
        if let Some(busy) = counterparts.iter().find(|user| {
            self.in_flight
                .values()
                .any(|flight| flight.counterparts.contains(user))
        }) {
            return Err(ClientError::InFlight(busy.clone()));
        }

        let touched: Vec<PartitionKey> = mutation
            .touched_kinds()
            .iter()
            .map(|&kind| self.viewer_key(kind))
            .collect();

        for key in &touched {
            let partition = self.partition_mut(key);
            partition.generation += 1;
            if partition.data.state == LoadState::Loading {
                // Cancelling the fetch belongs to this mutation's effect and is
                // not rolled back; the list is refetched once it settles.
                partition.data.state = LoadState::Loaded;
                partition.data.stale = true;
            }
            if partition.base.is_none() {
                partition.base = Some(partition.data.clone());
            }
        }

        let id = self.next_token;
        self.next_token += 1;
        self.in_flight.insert(
            id,
            InFlight {
                mutation: mutation.clone(),
                started_at: now,
                counterparts,
                touched,
            },
        );
        self.replay();

        Ok(MutationToken {
            id,
            mutation,
            started_at: now,
        })
    }

    /// Settle a mutation the server accepted.
    ///
    /// Every list of the viewer is marked stale, since counters and
    /// membership may have moved in any of them. Cached friend lists of other
    /// users get their `mutual_friends_count` patched. Returns the keys to
    /// refetch.
    pub fn settle_success(&mut self, token: MutationToken) -> Vec<PartitionKey> {
        self.in_flight.remove(&token.id);

        let mut confirmed_lists = BTreeMap::new();
        for &kind in token.mutation.touched_kinds() {
            let key = self.viewer_key(kind);
            if let Some(base) = self.partitions.get(&key).and_then(|p| p.base.as_ref()) {
                confirmed_lists.insert(kind, base.items.clone());
            }
        }
        token
            .mutation
            .apply_optimistic(&self.viewer, &mut confirmed_lists, token.started_at);
        for (kind, items) in confirmed_lists {
            let key = self.viewer_key(kind);
            if let Some(base) = self.partition_mut(&key).base.as_mut() {
                base.items = items;
            }
        }
        self.replay();
        self.release_bases();

        let mut stale = Vec::new();
        for kind in PartitionKind::ALL {
            let key = self.viewer_key(kind);
            self.partition_mut(&key).data.stale = true;
            stale.push(key);
        }

        if let Some(delta) = token.mutation.mutual_delta() {
            let confirmed = token.mutation.counterparts(&self.viewer);
            let mut endpoints: BTreeSet<&str> = confirmed.iter().map(String::as_str).collect();
            if !endpoints.is_empty() {
                endpoints.insert(self.viewer.as_str());
            }

            for (key, partition) in &mut self.partitions {
                if key.owner == self.viewer {
                    continue;
                }
                for doc in &mut partition.data.items {
                    if endpoints.contains(doc.friend_id.as_str())
                        && let Some(count) = doc.mutual_friends_count
                    {
                        doc.mutual_friends_count = Some((count + delta).max(0));
                    }
                }
            }
        }

        stale
    }

    /// Settle a mutation the server rejected. Its effect is withdrawn while
    /// other in-flight mutations keep theirs; once none touch a list, the list
    /// is back to its base.
    pub fn settle_failure(&mut self, token: MutationToken) {
        self.in_flight.remove(&token.id);
        self.replay();
        self.release_bases();
    }

    /// Rebuild every list that has a base: the base with each in-flight
    /// mutation applied in the order they began.
    fn replay(&mut self) {
        let mut lists = BTreeMap::new();
        for (key, partition) in &self.partitions {
            if let Some(base) = &partition.base {
                lists.insert(key.kind, base.items.clone());
            }
        }
        for flight in self.in_flight.values() {
            flight
                .mutation
                .apply_optimistic(&self.viewer, &mut lists, flight.started_at);
        }
        for (key, partition) in &mut self.partitions {
            if let Some(base) = &partition.base {
                let data = &mut partition.data;
                data.items = lists.remove(&key.kind).unwrap_or_default();
                data.next_cursor.clone_from(&base.next_cursor);
                data.error.clone_from(&base.error);
            }
        }
    }

    /// Drop the bases of lists no in-flight mutation touches any more.
    fn release_bases(&mut self) {
        let busy: BTreeSet<&PartitionKey> = self
            .in_flight
            .values()
            .flat_map(|flight| flight.touched.iter())
            .collect();
        for (key, partition) in &mut self.partitions {
            if !busy.contains(key) {
                partition.base = None;
            }
        }
    }

    /// Number of mutations in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    // === Views ===

    /// Mark lists as needing a refetch.
    pub fn mark_stale(&mut self, keys: &[PartitionKey]) {
        for key in keys {
            self.partition_mut(key).data.stale = true;
        }
    }

    /// Lists marked stale.
    #[must_use]
    pub fn stale_keys(&self) -> Vec<PartitionKey> {
        self.partitions
            .iter()
            .filter(|(_, partition)| partition.data.stale)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Set the search string of a list. Never triggers a fetch.
    pub fn set_search(&mut self, key: &PartitionKey, search: impl Into<String>) {
        self.partition_mut(key).view.search = search.into();
    }

    /// Set the sort order of a list. Never triggers a fetch.
    pub fn set_sort(&mut self, key: &PartitionKey, sort: SortOrder) {
        self.partition_mut(key).view.sort = sort;
    }

    /// Load state of a list.
    #[must_use]
    pub fn load_state(&self, key: &PartitionKey) -> LoadState {
        self.partitions
            .get(key)
            .map_or(LoadState::Idle, |partition| partition.data.state)
    }

    /// Cached items of a list, unfiltered, in cache order.
    #[must_use]
    pub fn items(&self, key: &PartitionKey) -> &[Relationship] {
        self.partitions
            .get(key)
            .map(|partition| partition.data.items.as_slice())
            .unwrap_or(&[])
    }

    /// What to render for a list.
    #[must_use]
    pub fn view(&self, key: &PartitionKey) -> PartitionView {
        self.partitions.get(key).map_or_else(
            || PartitionView {
                items: Vec::new(),
                loading: false,
                error: None,
                next_cursor: None,
                stale: false,
            },
            |partition| PartitionView {
                items: partition.view.apply(&partition.data.items),
                loading: partition.data.state == LoadState::Loading,
                error: partition.data.error.clone(),
                next_cursor: partition.data.next_cursor.clone(),
                stale: partition.data.stale,
            },
        )
    }
}

fn store_page(data: &mut PartitionData, ticket: &FetchTicket, page: Page<Relationship>) {
    if ticket.until_id.is_some() {
        let known: BTreeSet<String> = data.items.iter().map(|doc| doc.id.clone()).collect();
        data.items
            .extend(page.items.into_iter().filter(|doc| !known.contains(&doc.id)));
    } else {
        data.items = page.items;
    }
    data.next_cursor = page.next_cursor;
    data.state = LoadState::Loaded;
    data.error = None;
    data.stale = false;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::fixtures::doc;
    use shelfmate_common::relationship_id;

    fn now() -> DateTime<FixedOffset> {
        chrono::Utc::now().fixed_offset()
    }

    fn page(items: Vec<Relationship>) -> Page<Relationship> {
        Page {
            items,
            next_cursor: None,
        }
    }

    fn loaded(cache: &mut ReconcileCache, kind: PartitionKind, items: Vec<Relationship>) {
        let key = cache.viewer_key(kind);
        let ticket = cache.begin_fetch(&key);
        assert!(cache.complete_fetch(&ticket, page(items)));
    }

    #[test]
    fn test_fetch_lifecycle() {
        let mut cache = ReconcileCache::new("alice");
        let key = cache.viewer_key(PartitionKind::Friends);
        assert_eq!(cache.load_state(&key), LoadState::Idle);

        let ticket = cache.begin_fetch(&key);
        assert!(cache.view(&key).loading);

        let items = vec![doc("alice", "bob", PartitionKind::Friends, 1)];
        assert!(cache.complete_fetch(
            &ticket,
            Page {
                items,
                next_cursor: Some("cursor".to_string()),
            }
        ));
        let view = cache.view(&key);
        assert!(!view.loading);
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.next_cursor.as_deref(), Some("cursor"));
    }

    #[test]
    fn test_newer_fetch_supersedes_older() {
        let mut cache = ReconcileCache::new("alice");
        let key = cache.viewer_key(PartitionKind::Friends);

        let old = cache.begin_fetch(&key);
        let new = cache.begin_fetch(&key);
        assert!(cache.complete_fetch(&new, page(vec![])));
        assert!(!cache.complete_fetch(
            &old,
            page(vec![doc("alice", "bob", PartitionKind::Friends, 1)])
        ));
        assert!(cache.items(&key).is_empty());
    }

    #[test]
    fn test_fetch_more_appends_without_duplicates() {
        let mut cache = ReconcileCache::new("alice");
        let key = cache.viewer_key(PartitionKind::Friends);
        let ticket = cache.begin_fetch(&key);
        cache.complete_fetch(
            &ticket,
            Page {
                items: vec![doc("alice", "bob", PartitionKind::Friends, 2)],
                next_cursor: Some(relationship_id("alice", "bob")),
            },
        );

        let more = cache.begin_fetch_more(&key).unwrap();
        assert!(cache.begin_fetch_more(&key).is_none());
        cache.complete_fetch(
            &more,
            page(vec![
                doc("alice", "bob", PartitionKind::Friends, 2),
                doc("alice", "carol", PartitionKind::Friends, 1),
            ]),
        );
        assert_eq!(cache.items(&key).len(), 2);
        assert!(cache.begin_fetch_more(&key).is_none());
    }

    #[test]
    fn test_fetch_failure_sets_error() {
        let mut cache = ReconcileCache::new("alice");
        let key = cache.viewer_key(PartitionKind::Sent);
        let ticket = cache.begin_fetch(&key);
        assert!(cache.fail_fetch(&ticket, "boom"));

        let view = cache.view(&key);
        assert_eq!(view.error.as_deref(), Some("boom"));
        assert!(!view.loading);
    }

    #[test]
    fn test_push_replaces_snapshot() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Friends,
            vec![
                doc("alice", "bob", PartitionKind::Friends, 1),
                doc("alice", "carol", PartitionKind::Friends, 2),
            ],
        );
        let key = cache.viewer_key(PartitionKind::Friends);

        let outcome = cache.apply_push(&key, vec![doc("alice", "dave", PartitionKind::Friends, 3)]);
        assert_eq!(outcome, PushOutcome::Merged);
        let ids: Vec<_> = cache.items(&key).iter().map(|d| d.friend_id.clone()).collect();
        assert_eq!(ids, ["dave"]);
    }

    #[test]
    fn test_push_suppressed_while_mutation_in_flight() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Received,
            vec![doc("alice", "bob", PartitionKind::Received, 1)],
        );
        loaded(&mut cache, PartitionKind::Friends, vec![]);
        loaded(
            &mut cache,
            PartitionKind::Sent,
            vec![doc("alice", "erin", PartitionKind::Sent, 1)],
        );

        let token = cache
            .begin_mutation(
                Mutation::Accept {
                    ids: vec![relationship_id("alice", "bob")],
                },
                now(),
            )
            .unwrap();

        let received = cache.viewer_key(PartitionKind::Received);
        let friends = cache.viewer_key(PartitionKind::Friends);
        let sent = cache.viewer_key(PartitionKind::Sent);

        // A snapshot from before the write would resurrect the request.
        let stale_push = vec![doc("alice", "bob", PartitionKind::Received, 1)];
        assert_eq!(cache.apply_push(&received, stale_push), PushOutcome::Suppressed);
        assert_eq!(cache.apply_push(&friends, vec![]), PushOutcome::Suppressed);
        assert_eq!(cache.items(&friends).len(), 1);

        // Untouched lists keep merging.
        assert_eq!(cache.apply_push(&sent, vec![]), PushOutcome::Merged);

        cache.settle_success(token);
        assert_eq!(cache.apply_push(&received, vec![]), PushOutcome::Merged);
    }

    #[test]
    fn test_failure_restores_snapshot_exactly() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Received,
            vec![
                doc("alice", "bob", PartitionKind::Received, 1),
                doc("alice", "carol", PartitionKind::Received, 2),
            ],
        );
        loaded(
            &mut cache,
            PartitionKind::Friends,
            vec![doc("alice", "dave", PartitionKind::Friends, 1)],
        );
        let received = cache.viewer_key(PartitionKind::Received);
        let friends = cache.viewer_key(PartitionKind::Friends);
        let before_received = cache.items(&received).to_vec();
        let before_friends = cache.items(&friends).to_vec();

        let token = cache
            .begin_mutation(
                Mutation::Accept {
                    ids: vec![relationship_id("alice", "carol")],
                },
                now(),
            )
            .unwrap();
        assert_eq!(cache.items(&received).len(), 1);
        assert_eq!(cache.items(&friends).len(), 2);

        cache.settle_failure(token);
        assert_eq!(cache.items(&received), before_received.as_slice());
        assert_eq!(cache.items(&friends), before_friends.as_slice());
        assert_eq!(cache.in_flight_count(), 0);
    }

    fn accept(cache: &mut ReconcileCache, friend: &str) -> MutationToken {
        cache
            .begin_mutation(
                Mutation::Accept {
                    ids: vec![relationship_id("alice", friend)],
                },
                now(),
            )
            .unwrap()
    }

    fn friend_ids(cache: &ReconcileCache, kind: PartitionKind) -> Vec<String> {
        let key = cache.viewer_key(kind);
        cache.items(&key).iter().map(|d| d.friend_id.clone()).collect()
    }

    fn two_pending(cache: &mut ReconcileCache) {
        loaded(
            cache,
            PartitionKind::Received,
            vec![
                doc("alice", "bob", PartitionKind::Received, 1),
                doc("alice", "carol", PartitionKind::Received, 2),
            ],
        );
        loaded(cache, PartitionKind::Friends, vec![]);
    }

    #[test]
    fn test_failure_keeps_overlapping_mutation_effect() {
        let mut cache = ReconcileCache::new("alice");
        two_pending(&mut cache);

        let bob = accept(&mut cache, "bob");
        let carol = accept(&mut cache, "carol");
        assert!(friend_ids(&cache, PartitionKind::Received).is_empty());

        cache.settle_failure(bob);
        assert_eq!(friend_ids(&cache, PartitionKind::Received), ["bob"]);
        assert_eq!(friend_ids(&cache, PartitionKind::Friends), ["carol"]);

        cache.settle_failure(carol);
        assert_eq!(friend_ids(&cache, PartitionKind::Received), ["bob", "carol"]);
        assert!(friend_ids(&cache, PartitionKind::Friends).is_empty());
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[test]
    fn test_failure_in_reverse_order_restores_base() {
        let mut cache = ReconcileCache::new("alice");
        two_pending(&mut cache);
        let received = cache.viewer_key(PartitionKind::Received);
        let before = cache.view(&received);

        let bob = accept(&mut cache, "bob");
        let carol = accept(&mut cache, "carol");
        cache.settle_failure(carol);
        assert_eq!(friend_ids(&cache, PartitionKind::Received), ["carol"]);
        assert_eq!(friend_ids(&cache, PartitionKind::Friends), ["bob"]);

        cache.settle_failure(bob);
        assert_eq!(cache.view(&received), before);
        assert!(friend_ids(&cache, PartitionKind::Friends).is_empty());
    }

    #[test]
    fn test_refetch_keeps_effect_of_mutation_still_in_flight() {
        let mut cache = ReconcileCache::new("alice");
        two_pending(&mut cache);

        let bob = accept(&mut cache, "bob");
        let _carol = accept(&mut cache, "carol");
        let stale = cache.settle_success(bob);

        // The server has applied bob's accept but not carol's yet.
        let received = cache.viewer_key(PartitionKind::Received);
        let friends = cache.viewer_key(PartitionKind::Friends);
        assert!(stale.contains(&received));
        let ticket = cache.begin_fetch(&received);
        assert!(cache.complete_fetch(
            &ticket,
            page(vec![doc("alice", "carol", PartitionKind::Received, 2)])
        ));
        let ticket = cache.begin_fetch(&friends);
        assert!(cache.complete_fetch(
            &ticket,
            page(vec![doc("alice", "bob", PartitionKind::Friends, 3)])
        ));

        assert!(friend_ids(&cache, PartitionKind::Received).is_empty());
        assert_eq!(friend_ids(&cache, PartitionKind::Friends), ["carol", "bob"]);
        assert!(!cache.view(&received).stale);
        assert!(!cache.view(&received).loading);
    }

    #[test]
    fn test_failure_after_refetch_falls_back_to_fetched_page() {
        let mut cache = ReconcileCache::new("alice");
        two_pending(&mut cache);

        let bob = accept(&mut cache, "bob");
        let carol = accept(&mut cache, "carol");
        cache.settle_success(bob);

        let received = cache.viewer_key(PartitionKind::Received);
        let ticket = cache.begin_fetch(&received);
        cache.complete_fetch(
            &ticket,
            page(vec![doc("alice", "carol", PartitionKind::Received, 2)]),
        );

        cache.settle_failure(carol);
        assert_eq!(friend_ids(&cache, PartitionKind::Received), ["carol"]);
        assert_eq!(friend_ids(&cache, PartitionKind::Friends), ["bob"]);
    }

    #[test]
    fn test_rollback_after_cancelled_fetch_leaves_list_stale() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Friends,
            vec![doc("alice", "bob", PartitionKind::Friends, 1)],
        );
        let friends = cache.viewer_key(PartitionKind::Friends);
        let ticket = cache.begin_fetch(&friends);

        let token = cache
            .begin_mutation(
                Mutation::Remove {
                    id: relationship_id("alice", "bob"),
                },
                now(),
            )
            .unwrap();
        cache.settle_failure(token);

        assert!(!cache.complete_fetch(&ticket, page(vec![])));
        assert_eq!(friend_ids(&cache, PartitionKind::Friends), ["bob"]);
        assert_eq!(cache.load_state(&friends), LoadState::Loaded);
        assert_eq!(cache.stale_keys(), vec![friends]);
    }

    #[test]
    fn test_mutation_cancels_fetch_in_flight() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Friends,
            vec![doc("alice", "bob", PartitionKind::Friends, 1)],
        );
        let friends = cache.viewer_key(PartitionKind::Friends);
        let ticket = cache.begin_fetch(&friends);

        let token = cache
            .begin_mutation(
                Mutation::Remove {
                    id: relationship_id("alice", "bob"),
                },
                now(),
            )
            .unwrap();

        // The response carries bob and must not bring him back.
        assert!(!cache.complete_fetch(
            &ticket,
            page(vec![doc("alice", "bob", PartitionKind::Friends, 1)])
        ));
        assert!(cache.items(&friends).is_empty());
        assert!(!cache.view(&friends).loading);
        cache.settle_success(token);
    }

    #[test]
    fn test_same_counterpart_cannot_overlap() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Received,
            vec![doc("alice", "bob", PartitionKind::Received, 1)],
        );

        let _token = cache
            .begin_mutation(
                Mutation::Accept {
                    ids: vec![relationship_id("alice", "bob")],
                },
                now(),
            )
            .unwrap();
        let second = cache.begin_mutation(
            Mutation::Reject {
                ids: vec![relationship_id("bob", "alice")],
            },
            now(),
        );
        assert!(matches!(second, Err(ClientError::InFlight(user)) if user == "bob"));
    }

    #[test]
    fn test_success_marks_all_stale_and_patches_mutuals() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Received,
            vec![doc("alice", "carol", PartitionKind::Received, 1)],
        );

        // Bob's friend list, viewed by alice.
        let bobs = PartitionKey::new("bob", PartitionKind::Friends);
        let mut carol = doc("bob", "carol", PartitionKind::Friends, 1);
        carol.mutual_friends_count = Some(2);
        let mut dave = doc("bob", "dave", PartitionKind::Friends, 2);
        dave.mutual_friends_count = Some(5);
        let unknown = doc("bob", "alice", PartitionKind::Friends, 3);
        let ticket = cache.begin_fetch(&bobs);
        cache.complete_fetch(&ticket, page(vec![carol, dave, unknown]));

        let token = cache
            .begin_mutation(
                Mutation::Accept {
                    ids: vec![relationship_id("alice", "carol")],
                },
                now(),
            )
            .unwrap();
        let stale = cache.settle_success(token);

        assert_eq!(stale.len(), 3);
        assert!(stale.iter().all(|key| key.owner == "alice"));
        assert_eq!(cache.stale_keys().len(), 3);

        let counts: Vec<_> = cache
            .items(&bobs)
            .iter()
            .map(|d| (d.friend_id.as_str(), d.mutual_friends_count))
            .collect();
        assert_eq!(
            counts,
            [("carol", Some(3)), ("dave", Some(5)), ("alice", None)]
        );
    }

    #[test]
    fn test_narrowed_bulk_patches_only_confirmed() {
        let mut cache = ReconcileCache::new("alice");
        let bobs = PartitionKey::new("bob", PartitionKind::Friends);
        let mut carol = doc("bob", "carol", PartitionKind::Friends, 1);
        carol.mutual_friends_count = Some(1);
        let mut dave = doc("bob", "dave", PartitionKind::Friends, 2);
        dave.mutual_friends_count = Some(1);
        let ticket = cache.begin_fetch(&bobs);
        cache.complete_fetch(&ticket, page(vec![carol, dave]));

        let carol_id = relationship_id("alice", "carol");
        let mut token = cache
            .begin_mutation(
                Mutation::Accept {
                    ids: vec![carol_id.clone(), relationship_id("alice", "dave")],
                },
                now(),
            )
            .unwrap();
        token.narrow(&[carol_id]);
        cache.settle_success(token);

        let counts: Vec<_> = cache
            .items(&bobs)
            .iter()
            .map(|d| d.mutual_friends_count)
            .collect();
        assert_eq!(counts, [Some(2), Some(1)]);
    }

    #[test]
    fn test_search_and_sort_never_change_cache() {
        let mut cache = ReconcileCache::new("alice");
        loaded(
            &mut cache,
            PartitionKind::Friends,
            vec![
                doc("alice", "bob", PartitionKind::Friends, 1),
                doc("alice", "carol", PartitionKind::Friends, 2),
            ],
        );
        let key = cache.viewer_key(PartitionKind::Friends);

        cache.set_search(&key, "car");
        cache.set_sort(&key, SortOrder::Oldest);

        let view = cache.view(&key);
        assert_eq!(view.items.len(), 1);
        assert_eq!(cache.items(&key).len(), 2);
        assert_eq!(cache.load_state(&key), LoadState::Loaded);
        assert!(!view.stale);
    }
}
