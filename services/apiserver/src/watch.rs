//! Watch emulation over a backend change feed.
//!
//! # Purpose
//! Backends only expose `changes(gvk, since, limit)`. A [`WatchSession`]
//! turns that feed into an ordered stream of [`WatchEvent`]s for one
//! (cluster, kind) and an optional namespace/label/field filter.
//!
//! # State machine
//! `Initializing -> Streaming -> Closed(reason)`, published on a
//! `tokio::sync::watch` channel so callers and tests can observe it.
//! - Initializing: without a starting version, the current state is listed and
//!   replayed as `ADDED`; with one, the first poll proves it is still inside the
//!   retained change log or the session closes `Expired`.
//! - Streaming: the change feed is polled every `poll_interval`. Events leave
//!   in increasing version order.
//! - Closed: cancelled (session dropped or cancelled), timed out, expired
//!   (history compacted or buffer overflow) or failed.
//!
//! # Backpressure
//! Events go through a bounded buffer. The initial replay and any changes
//! committed before the session started wait for the consumer. A consumer
//! that lets live events fill the buffer loses the session with `Expired`
//! and must re-list.
use crate::model::{Change, ChangeOp, Gvk, KindSelector, WatchEvent, WatchEventType};
use crate::query::QuerySpec;
use crate::store::{ResourceStore, StoreError, StoreResult};
use crate::version::ResourceVersion;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub buffer_capacity: usize,
    /// Server-side cap on a session's lifetime.
    pub session_timeout: Option<Duration>,
    pub bookmark_interval: Duration,
    /// Changes requested per poll.
    pub batch_limit: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            buffer_capacity: 1024,
            session_timeout: Some(Duration::from_secs(1800)),
            bookmark_interval: Duration::from_secs(60),
            batch_limit: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub kind: KindSelector,
    /// Namespace, label and field filters; paging fields are ignored.
    pub query: QuerySpec,
    /// `None` or `0` starts with a synthetic `ADDED` for every current object.
    pub from: Option<ResourceVersion>,
    pub allow_bookmarks: bool,
    /// Client-requested lifetime, capped by `WatchOptions::session_timeout`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Cancelled,
    TimedOut,
    Expired(String),
    Failed(String),
}

impl CloseReason {
    fn label(&self) -> &'static str {
        match self {
            CloseReason::Cancelled => "cancelled",
            CloseReason::TimedOut => "timed_out",
            CloseReason::Expired(_) => "expired",
            CloseReason::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Initializing,
    Streaming,
    Closed(CloseReason),
}

/// Consumer half of a running watch. Dropping it stops the polling task.
pub struct WatchSession {
    gvk: Gvk,
    events: mpsc::Receiver<WatchEvent>,
    state: watch::Receiver<WatchState>,
    cancel: CancellationToken,
    finished: bool,
}

impl WatchSession {
    pub fn gvk(&self) -> &Gvk {
        &self.gvk
    }

    pub fn state(&self) -> WatchState {
        self.state.borrow().clone()
    }

    /// A receiver that keeps observing the state after the session is dropped.
    pub fn state_receiver(&self) -> watch::Receiver<WatchState> {
        self.state.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, `Some(Err(..))` once if the session ended abnormally, then `None`.
    ///
    /// An expired session reports the error ahead of anything still buffered.
    pub async fn next(&mut self) -> Option<StoreResult<WatchEvent>> {
        if self.finished {
            return None;
        }
        if let Some(err) = self.terminal_error() {
            self.finished = true;
            return Some(Err(err));
        }
        match self.events.recv().await {
            Some(event) => {
                if let Some(err) = self.terminal_error() {
                    self.finished = true;
                    return Some(Err(err));
                }
                Some(Ok(event))
            }
            None => {
                self.finished = true;
                self.terminal_error().map(Err)
            }
        }
    }

    fn terminal_error(&self) -> Option<StoreError> {
        match &*self.state.borrow() {
            WatchState::Closed(CloseReason::Expired(msg)) => Some(StoreError::Expired(msg.clone())),
            WatchState::Closed(CloseReason::Failed(msg)) => {
                Some(StoreError::Unexpected(anyhow::anyhow!(msg.clone())))
            }
            _ => None,
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a watch session. Must be called inside a tokio runtime.
pub fn start<B>(backend: Arc<B>, request: WatchRequest, opts: &WatchOptions) -> WatchSession
where
    B: ResourceStore + ?Sized + 'static,
{
    let (events_tx, events_rx) = mpsc::channel(opts.buffer_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(WatchState::Initializing);
    let cancel = CancellationToken::new();
    let gvk = request.kind.gvk.clone();

    let timeout = match (request.timeout, opts.session_timeout) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let emulator = Emulator {
        backend,
        request,
        opts: opts.clone(),
        events: events_tx,
        state: state_tx,
        cancel: cancel.clone(),
    };
    metrics::gauge!("fleetdex_watch_sessions_active").increment(1.0);
    tokio::spawn(async move {
        let reason = emulator.run(timeout).await;
        match &reason {
            CloseReason::Expired(msg) | CloseReason::Failed(msg) => {
                tracing::info!(kind = %emulator.request.kind.gvk, reason = reason.label(), message = %msg, "watch closed");
            }
            _ => tracing::debug!(kind = %emulator.request.kind.gvk, reason = reason.label(), "watch closed"),
        }
        metrics::counter!("fleetdex_watch_closed_total", "reason" => reason.label()).increment(1);
        metrics::gauge!("fleetdex_watch_sessions_active").decrement(1.0);
        // Publish the reason before the event sender drops so `next` sees it.
        emulator.state.send_replace(WatchState::Closed(reason));
        drop(emulator);
    });

    WatchSession {
        gvk,
        events: events_rx,
        state: state_rx,
        cancel,
        finished: false,
    }
}

struct Emulator<B: ?Sized> {
    backend: Arc<B>,
    request: WatchRequest,
    opts: WatchOptions,
    events: mpsc::Sender<WatchEvent>,
    state: watch::Sender<WatchState>,
    cancel: CancellationToken,
}

impl<B: ResourceStore + ?Sized> Emulator<B> {
    async fn run(&self, timeout: Option<Duration>) -> CloseReason {
        let deadline = tokio::time::sleep_until(match timeout {
            Some(limit) => Instant::now() + limit,
            // Far enough out to never fire.
            None => Instant::now() + Duration::from_secs(86_400 * 365),
        });
        tokio::pin!(deadline);

        tokio::select! {
            reason = self.stream() => reason,
            _ = &mut deadline => CloseReason::TimedOut,
            _ = self.cancel.cancelled() => CloseReason::Cancelled,
        }
    }

    async fn stream(&self) -> CloseReason {
        // Changes up to `backlog` were committed before the session started and
        // are delivered with backpressure; only newer ones can overflow.
        let (mut cursor, backlog) = match self.request.from.filter(|rv| !rv.is_zero()) {
            Some(from) => match self.backend.current_version(&self.request.kind.gvk).await {
                Ok(newest) => (from, newest),
                Err(err) if err.is_retryable() => (from, from),
                Err(err) => return close_reason(err),
            },
            None => match self.replay_current_state().await {
                Ok(rv) => (rv, rv),
                Err(reason) => return reason,
            },
        };

        let tombstones = self.backend.retains_tombstones();
        let want_bookmarks = self.request.allow_bookmarks || !tombstones;
        let mut last_bookmark = Instant::now();
        let mut ticker = tokio::time::interval(self.opts.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // The first tick of an interval completes immediately, so a resumed
            // watch validates `from` before reporting Streaming.
            ticker.tick().await;
            loop {
                match self.poll_once(cursor, backlog).await {
                    Ok((next, more)) => {
                        cursor = next;
                        if !more {
                            break;
                        }
                    }
                    Err(reason) => return reason,
                }
            }
            if want_bookmarks && last_bookmark.elapsed() >= self.opts.bookmark_interval {
                let bookmark = if tombstones {
                    WatchEvent::bookmark(cursor)
                } else {
                    WatchEvent::relist_bookmark(cursor)
                };
                if let Err(reason) = self.offer(bookmark, false).await {
                    return reason;
                }
                last_bookmark = Instant::now();
            }
        }
    }

    /// List current state and replay it as ADDED; returns the list version.
    async fn replay_current_state(&self) -> Result<ResourceVersion, CloseReason> {
        let query = QuerySpec {
            limit: None,
            continue_token: None,
            resource_version: None,
            ..self.request.query.clone()
        };
        let page = self
            .backend
            .list(&self.request.kind, &query)
            .await
            .map_err(close_reason)?;
        for record in page.items {
            let event = WatchEvent::with_record(WatchEventType::Added, record);
            // Initial state applies backpressure instead of overflowing.
            if self.events.send(event).await.is_err() {
                return Err(CloseReason::Cancelled);
            }
        }
        self.state.send_replace(WatchState::Streaming);
        Ok(page.resource_version)
    }

    /// One `changes` call. Returns the new cursor and whether more changes
    /// are already waiting.
    async fn poll_once(
        &self,
        cursor: ResourceVersion,
        backlog: ResourceVersion,
    ) -> Result<(ResourceVersion, bool), CloseReason> {
        let gvk = &self.request.kind.gvk;
        let set = match self.backend.changes(gvk, cursor, self.opts.batch_limit).await {
            Ok(set) => set,
            Err(err) if err.is_retryable() => {
                tracing::warn!(kind = %gvk, error = %err, "watch poll failed; retrying next tick");
                return Ok((cursor, false));
            }
            Err(err) => return Err(close_reason(err)),
        };
        self.state.send_if_modified(|state| {
            if *state == WatchState::Initializing {
                *state = WatchState::Streaming;
                true
            } else {
                false
            }
        });
        for change in set.items {
            if change.record.key.cluster != self.request.kind.cluster {
                continue;
            }
            let catching_up = change.resource_version <= backlog;
            if let Some(event) = translate(&self.request.query, change) {
                self.offer(event, catching_up).await?;
            }
        }
        Ok((set.resource_version.max(cursor), set.more))
    }

    /// Queue one event. With `wait` the emulator blocks on a full buffer;
    /// otherwise a full buffer ends the session.
    async fn offer(&self, event: WatchEvent, wait: bool) -> Result<(), CloseReason> {
        let label = match event.event_type {
            WatchEventType::Added => "added",
            WatchEventType::Modified => "modified",
            WatchEventType::Deleted => "deleted",
            WatchEventType::Bookmark => "bookmark",
        };
        if wait {
            self.events
                .send(event)
                .await
                .map_err(|_| CloseReason::Cancelled)?;
        } else {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    return Err(CloseReason::Expired(
                        "watch consumer fell behind; buffer overflowed".to_string(),
                    ));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(CloseReason::Cancelled),
            }
        }
        metrics::counter!("fleetdex_watch_events_total", "type" => label).increment(1);
        Ok(())
    }
}

fn close_reason(err: StoreError) -> CloseReason {
    match err {
        StoreError::Expired(msg) => CloseReason::Expired(msg),
        other => CloseReason::Failed(other.to_string()),
    }
}

/// Map one change onto the watcher's filter. An object entering the filter is
/// ADDED and one leaving it is DELETED.
fn translate(query: &QuerySpec, change: Change) -> Option<WatchEvent> {
    let was_visible = change.previous.as_ref().is_some_and(|p| query.matches(p));
    let is_visible = change.op != ChangeOp::Deleted && query.matches(&change.record);
    let event_type = match (change.op, was_visible, is_visible) {
        (ChangeOp::Deleted, true, _) => WatchEventType::Deleted,
        (ChangeOp::Deleted, false, _) => return None,
        (_, true, true) => WatchEventType::Modified,
        (_, false, true) => WatchEventType::Added,
        (_, true, false) => WatchEventType::Deleted,
        (_, false, false) => return None,
    };
    Some(WatchEvent::with_record(event_type, change.record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Patch, ResourceKey, ResourceRecord};
    use crate::query::ListOptions;
    use crate::store::memory::InMemoryStore;
    use crate::store::{ChangeSet, ListPage, StoreConfig};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    /// An in-memory store that reports it keeps no tombstones.
    struct TombstonelessStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl ResourceStore for TombstonelessStore {
        async fn ensure_schema(&self) -> StoreResult<()> {
            self.inner.ensure_schema().await
        }
        async fn get(&self, key: &ResourceKey) -> StoreResult<ResourceRecord> {
            self.inner.get(key).await
        }
        async fn list(&self, kind: &KindSelector, query: &QuerySpec) -> StoreResult<ListPage> {
            self.inner.list(kind, query).await
        }
        async fn changes(
            &self,
            gvk: &Gvk,
            since: ResourceVersion,
            limit: usize,
        ) -> StoreResult<ChangeSet> {
            self.inner.changes(gvk, since, limit).await
        }
        async fn current_version(&self, gvk: &Gvk) -> StoreResult<ResourceVersion> {
            self.inner.current_version(gvk).await
        }
        async fn create(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
            self.inner.create(key, object).await
        }
        async fn update(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
            self.inner.update(key, object).await
        }
        async fn delete(
            &self,
            key: &ResourceKey,
            precondition: Option<ResourceVersion>,
        ) -> StoreResult<ResourceRecord> {
            self.inner.delete(key, precondition).await
        }
        async fn patch(&self, key: &ResourceKey, patch: &Patch) -> StoreResult<ResourceRecord> {
            self.inner.patch(key, patch).await
        }
        async fn health_check(&self) -> StoreResult<()> {
            self.inner.health_check().await
        }
        fn retains_tombstones(&self) -> bool {
            false
        }
        fn is_durable(&self) -> bool {
            false
        }
        fn backend_name(&self) -> &'static str {
            "tombstoneless"
        }
    }

    fn gvk() -> Gvk {
        Gvk::new("", "v1", "Pod")
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new("east", gvk(), "default", name)
    }

    fn pod(name: &str, tier: &str) -> serde_json::Value {
        json!({"metadata": {"name": name, "labels": {"tier": tier}}})
    }

    fn store(retention: i64) -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new(StoreConfig {
            changes_limit: retention as u64,
            change_retention_max_rows: Some(retention),
            change_retention_max_age: None,
        }))
    }

    fn fast() -> WatchOptions {
        WatchOptions {
            poll_interval: Duration::from_millis(5),
            buffer_capacity: 64,
            session_timeout: Some(Duration::from_secs(10)),
            bookmark_interval: Duration::from_secs(3600),
            batch_limit: 50,
        }
    }

    fn request(from: Option<u64>, label: Option<&str>) -> WatchRequest {
        WatchRequest {
            kind: KindSelector::new("east", gvk()),
            query: QuerySpec::from_options(
                Some("default".into()),
                &ListOptions {
                    label_selector: label.map(str::to_string),
                    ..ListOptions::default()
                },
            )
            .expect("query"),
            from: from.map(ResourceVersion::from_raw),
            allow_bookmarks: false,
            timeout: None,
        }
    }

    async fn next_event(session: &mut WatchSession) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(2), session.next())
            .await
            .expect("event in time")
            .expect("open session")
            .expect("event")
    }

    async fn wait_for(rx: &mut watch::Receiver<WatchState>, want: impl Fn(&WatchState) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| want(s)))
            .await
            .expect("state in time")
            .expect("state channel");
    }

    #[tokio::test]
    async fn list_then_watch_delivers_exactly_the_next_write() {
        let store = store(100);
        store.create(&key("a"), pod("a", "web")).await.expect("a");
        store.create(&key("b"), pod("b", "web")).await.expect("b");
        let page = store
            .list(&KindSelector::new("east", gvk()), &QuerySpec::default())
            .await
            .expect("list");
        assert_eq!(page.resource_version.to_string(), "2");

        let mut session = start(
            store.clone(),
            request(Some(page.resource_version.as_raw()), None),
            &fast(),
        );
        let mut state = session.state_receiver();
        wait_for(&mut state, |s| *s == WatchState::Streaming).await;

        store.create(&key("c"), pod("c", "web")).await.expect("c");
        let event = next_event(&mut session).await;
        assert_eq!(event.event_type, WatchEventType::Added);
        assert_eq!(event.resource_version.to_string(), "3");
        assert_eq!(event.record.expect("record").key.name, "c");
    }

    #[tokio::test]
    async fn watch_from_zero_replays_current_state_first() {
        let store = store(100);
        store.create(&key("a"), pod("a", "web")).await.expect("a");
        let mut session = start(store.clone(), request(None, None), &fast());
        let first = next_event(&mut session).await;
        assert_eq!(first.event_type, WatchEventType::Added);
        assert_eq!(first.resource_version.to_string(), "1");

        store.delete(&key("a"), None).await.expect("delete");
        let gone = next_event(&mut session).await;
        assert_eq!(gone.event_type, WatchEventType::Deleted);
        assert_eq!(gone.resource_version.to_string(), "2");
    }

    #[tokio::test]
    async fn events_arrive_in_version_order() {
        let store = store(100);
        let mut session = start(store.clone(), request(Some(0), None), &fast());
        let mut state = session.state_receiver();
        wait_for(&mut state, |s| *s == WatchState::Streaming).await;
        for name in ["a", "b", "c"] {
            store.create(&key(name), pod(name, "web")).await.expect("create");
        }
        store.update(&key("a"), pod("a", "db")).await.expect("update");
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_event(&mut session).await.resource_version.as_raw());
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn selector_transitions_surface_as_added_and_deleted() {
        let store = store(100);
        store.create(&key("a"), pod("a", "web")).await.expect("a");
        let mut session = start(store.clone(), request(Some(1), Some("tier=web")), &fast());

        store
            .patch(&key("a"), &Patch::merge(json!({"metadata": {"labels": {"tier": "db"}}})))
            .await
            .expect("leave");
        store.create(&key("b"), pod("b", "db")).await.expect("unrelated");
        store
            .patch(&key("a"), &Patch::merge(json!({"metadata": {"labels": {"tier": "web"}}})))
            .await
            .expect("enter");

        let left = next_event(&mut session).await;
        assert_eq!(left.event_type, WatchEventType::Deleted);
        assert_eq!(left.resource_version.to_string(), "2");
        let entered = next_event(&mut session).await;
        assert_eq!(entered.event_type, WatchEventType::Added);
        assert_eq!(entered.resource_version.to_string(), "4");
    }

    #[tokio::test]
    async fn resuming_from_compacted_history_expires() {
        let store = store(2);
        for name in ["a", "b", "c", "d"] {
            store.create(&key(name), pod(name, "web")).await.expect("create");
        }
        let mut session = start(store.clone(), request(Some(1), None), &fast());
        let err = tokio::time::timeout(Duration::from_secs(2), session.next())
            .await
            .expect("in time")
            .expect("terminal error")
            .unwrap_err();
        assert!(matches!(err, StoreError::Expired(_)));
        assert!(session.next().await.is_none());
        assert!(matches!(
            session.state(),
            WatchState::Closed(CloseReason::Expired(_))
        ));
    }

    #[tokio::test]
    async fn overflowing_the_buffer_expires_the_session() {
        let store = store(100);
        let opts = WatchOptions {
            buffer_capacity: 2,
            ..fast()
        };
        let mut session = start(store.clone(), request(Some(0), None), &opts);
        let mut state = session.state_receiver();
        wait_for(&mut state, |s| *s == WatchState::Streaming).await;
        for name in ["a", "b", "c", "d", "e"] {
            store.create(&key(name), pod(name, "web")).await.expect("create");
        }
        wait_for(&mut state, |s| matches!(s, WatchState::Closed(_))).await;

        let err = session.next().await.expect("terminal").unwrap_err();
        assert!(matches!(err, StoreError::Expired(_)));
        assert!(session.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_session_stops_polling() {
        let store = store(100);
        let session = start(store.clone(), request(Some(0), None), &fast());
        let mut state = session.state_receiver();
        wait_for(&mut state, |s| *s == WatchState::Streaming).await;
        drop(session);
        wait_for(&mut state, |s| {
            *s == WatchState::Closed(CloseReason::Cancelled)
        })
        .await;
    }

    #[tokio::test]
    async fn session_timeout_closes_cleanly() {
        let store = store(100);
        let mut req = request(Some(0), None);
        req.timeout = Some(Duration::from_millis(30));
        let mut session = start(store.clone(), req, &fast());
        let end = tokio::time::timeout(Duration::from_secs(2), session.next())
            .await
            .expect("closes in time");
        assert!(end.is_none());
        assert_eq!(session.state(), WatchState::Closed(CloseReason::TimedOut));
    }

    #[tokio::test]
    async fn bookmarks_carry_the_cursor() {
        let store = store(100);
        store.create(&key("a"), pod("a", "web")).await.expect("a");
        let mut req = request(Some(1), Some("tier=none"));
        req.allow_bookmarks = true;
        let opts = WatchOptions {
            bookmark_interval: Duration::from_millis(10),
            ..fast()
        };
        let mut session = start(store.clone(), req, &opts);
        store.create(&key("b"), pod("b", "web")).await.expect("b");

        loop {
            let event = next_event(&mut session).await;
            assert_eq!(event.event_type, WatchEventType::Bookmark);
            assert!(event.record.is_none());
            assert!(!event.relist_advised);
            if event.resource_version.as_raw() == 2 {
                break;
            }
        }
    }

    #[tokio::test]
    async fn backlog_older_than_the_session_waits_for_the_consumer() {
        let store = store(100);
        for i in 0..20 {
            let name = format!("p{i:02}");
            store.create(&key(&name), pod(&name, "web")).await.expect("create");
        }
        let opts = WatchOptions {
            buffer_capacity: 8,
            ..fast()
        };
        let mut session = start(store.clone(), request(Some(1), None), &opts);
        let mut seen = Vec::new();
        for _ in 0..19 {
            seen.push(next_event(&mut session).await.resource_version.as_raw());
        }
        assert_eq!(seen, (2..=20).collect::<Vec<_>>());
        assert_eq!(session.state(), WatchState::Streaming);
    }

    #[tokio::test]
    async fn catch_up_drains_past_the_backend_page_size() {
        let store = Arc::new(InMemoryStore::new(StoreConfig {
            changes_limit: 2,
            change_retention_max_rows: Some(100),
            change_retention_max_age: None,
        }));
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            store.create(&key(name), pod(name, "web")).await.expect("create");
        }
        // Only the immediate first tick fires within the test.
        let opts = WatchOptions {
            poll_interval: Duration::from_secs(3600),
            ..fast()
        };
        let mut session = start(store.clone(), request(Some(1), None), &opts);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(next_event(&mut session).await.resource_version.as_raw());
        }
        assert_eq!(seen, vec![2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn backends_without_tombstones_always_get_relist_bookmarks() {
        let store = Arc::new(TombstonelessStore {
            inner: InMemoryStore::new(StoreConfig::default()),
        });
        store.create(&key("a"), pod("a", "web")).await.expect("a");
        let req = request(Some(1), None);
        assert!(!req.allow_bookmarks);
        let opts = WatchOptions {
            bookmark_interval: Duration::from_millis(10),
            ..fast()
        };
        let mut session = start(store.clone(), req, &opts);

        let event = next_event(&mut session).await;
        assert_eq!(event.event_type, WatchEventType::Bookmark);
        assert!(event.relist_advised);
        assert_eq!(event.resource_version.as_raw(), 1);

        store.create(&key("b"), pod("b", "web")).await.expect("b");
        loop {
            let event = next_event(&mut session).await;
            if event.event_type == WatchEventType::Added {
                assert_eq!(event.resource_version.as_raw(), 2);
                break;
            }
            assert!(event.relist_advised);
        }
    }
}
