//! Per-channel broadcast scheduler
//!
//! Owns one independent periodic loop per (channel, interval) registration.
//! Each loop pulls from the shared single-flight cache, records rank
//! movement for its own key, and edits its destination message in place.
//! Loops are explicit tasks with explicit cancellation: every entry stores
//! its command channel and join handle, and stopping awaits the loop to
//! completion so no orphaned work survives.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use scanner_core::{format_interval, SnapshotError};

use crate::publisher::{OutputHandle, PublishError, Publisher, UpdateContent};
use crate::rank_store::{RankDelta, RankStore};
use crate::schedule_store::{PersistedEntry, ScheduleStore, ScheduleStoreError};
use crate::snapshot_cache::SnapshotCache;

/// Identity of one broadcast loop. A channel may carry several intervals,
/// but never two loops with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleKey {
    pub channel_id: u64,
    pub interval_secs: u32,
}

impl ScheduleKey {
    fn period(&self) -> Duration {
        Duration::from_secs(self.interval_secs as u64)
    }

    /// Freshness threshold for ticks: half the loop period, so a normal
    /// tick usually triggers a genuine refresh while near-simultaneous
    /// ticks from other loops still coalesce.
    fn max_age(&self) -> Duration {
        self.period() / 2
    }
}

impl std::fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "channel {} @ {}",
            self.channel_id,
            format_interval(self.interval_secs)
        )
    }
}

/// Human-readable labels persisted alongside a registration.
#[derive(Debug, Clone, Default)]
pub struct EntryLabels {
    pub guild_id: Option<u64>,
    pub server_name: Option<String>,
    pub channel_name: Option<String>,
}

/// Outcome of a startup restore pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub discarded: usize,
}

enum LoopCommand {
    /// Run one tick now, without touching the scheduled cadence. The ack
    /// fires when the tick has finished, success or not.
    Refresh(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

struct EntryHandle {
    cmd_tx: mpsc::Sender<LoopCommand>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

struct SchedulerInner {
    cache: SnapshotCache,
    ranks: Arc<RankStore>,
    store: Arc<ScheduleStore>,
    publisher: Arc<dyn Publisher>,
    registry: DashMap<ScheduleKey, Arc<EntryHandle>>,
}

/// The live registry of broadcast loops plus their lifecycle operations.
pub struct ChannelScheduler {
    inner: Arc<SchedulerInner>,
}

impl ChannelScheduler {
    pub fn new(
        cache: SnapshotCache,
        ranks: Arc<RankStore>,
        store: Arc<ScheduleStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                cache,
                ranks,
                store,
                publisher,
                registry: DashMap::new(),
            }),
        }
    }

    /// Start a broadcast loop for (channel, interval).
    ///
    /// Publishes the placeholder message, persists the registration and
    /// spawns the loop with an immediate first tick. Starting a key that is
    /// already running is rejected, not queued.
    ///
    /// The registry key is reserved before anything is published, so of two
    /// racing starts only one ever posts a placeholder or touches the
    /// durable row.
    pub async fn start(
        &self,
        channel_id: u64,
        interval_secs: u32,
        labels: EntryLabels,
    ) -> Result<(), SchedulerError> {
        let key = ScheduleKey {
            channel_id,
            interval_secs,
        };
        let (entry, cmd_rx) = match self.reserve(key) {
            Some(reservation) => reservation,
            None => return Err(SchedulerError::AlreadyRunning(key)),
        };

        let output = match self.inner.publisher.publish_initial(channel_id).await {
            Ok(output) => output,
            Err(e) => {
                self.inner.registry.remove(&key);
                return Err(e.into());
            }
        };

        let persisted = PersistedEntry {
            channel_id,
            interval_secs,
            message_id: output.message_id,
            guild_id: labels.guild_id,
            running: true,
            server_name: labels.server_name,
            channel_name: labels.channel_name,
        };
        if let Err(e) = self.inner.store.upsert(&persisted) {
            // In-memory state still governs this process lifetime.
            warn!("Failed to persist registration for {}: {}", key, e);
        }

        self.spawn_into(&entry, key, output, cmd_rx, true);
        info!("Started broadcast loop for {}", key);
        Ok(())
    }

    /// Stop one (channel, interval) loop and await its completion.
    pub async fn stop(&self, channel_id: u64, interval_secs: u32) -> Result<(), SchedulerError> {
        let key = ScheduleKey {
            channel_id,
            interval_secs,
        };
        let entry = match self.inner.registry.get(&key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Err(SchedulerError::NotRunning(key)),
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if entry.cmd_tx.send(LoopCommand::Stop(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }

        // Await the task itself so nothing outlives the stop.
        let task = entry.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }

        info!("Stopped broadcast loop for {}", key);
        Ok(())
    }

    /// Stop every loop registered for a channel. Returns how many were
    /// stopped.
    pub async fn stop_channel(&self, channel_id: u64) -> usize {
        let keys: Vec<ScheduleKey> = self
            .inner
            .registry
            .iter()
            .map(|e| *e.key())
            .filter(|k| k.channel_id == channel_id)
            .collect();

        let mut stopped = 0;
        for key in keys {
            if self.stop(key.channel_id, key.interval_secs).await.is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    /// Trigger an out-of-band refresh on every running loop and wait for
    /// all of them to finish. A failure in one loop never aborts the
    /// others, and no loop's scheduled cadence moves.
    pub async fn refresh_all(&self) {
        let entries: Vec<(ScheduleKey, Arc<EntryHandle>)> = self
            .inner
            .registry
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        if entries.is_empty() {
            return;
        }
        debug!("Out-of-band refresh for {} loops", entries.len());

        let waits = entries.into_iter().map(|(key, entry)| async move {
            let (ack_tx, ack_rx) = oneshot::channel();
            if entry.cmd_tx.send(LoopCommand::Refresh(ack_tx)).await.is_ok() {
                if ack_rx.await.is_err() {
                    debug!("Out-of-band refresh for {} ended with the loop", key);
                }
            }
        });
        join_all(waits).await;
    }

    /// Rebuild loops from the durable schedule table.
    ///
    /// Entries whose destination no longer resolves are discarded and
    /// removed from storage. Surviving entries restart in Running state
    /// with an immediate first tick. Entries restore concurrently, with no
    /// cross-entry ordering.
    pub async fn restore(&self) -> Result<RestoreSummary, SchedulerError> {
        let persisted = self.inner.store.load_running()?;
        if persisted.is_empty() {
            return Ok(RestoreSummary {
                restored: 0,
                discarded: 0,
            });
        }
        info!("Restoring {} persisted registrations", persisted.len());

        let attempts = persisted.into_iter().map(|entry| {
            let inner = Arc::clone(&self.inner);
            let this = Self {
                inner: Arc::clone(&self.inner),
            };
            async move {
                let key = ScheduleKey {
                    channel_id: entry.channel_id,
                    interval_secs: entry.interval_secs,
                };
                let output = OutputHandle {
                    channel_id: entry.channel_id,
                    message_id: entry.message_id,
                };
                let (entry_handle, cmd_rx) = match this.reserve(key) {
                    Some(reservation) => reservation,
                    None => {
                        warn!("Registration for {} is already live, skipping", key);
                        return false;
                    }
                };
                match inner.publisher.resolve(output).await {
                    Ok(()) => {
                        this.spawn_into(&entry_handle, key, output, cmd_rx, true);
                        info!("Restored broadcast loop for {}", key);
                        true
                    }
                    Err(e) => {
                        inner.registry.remove(&key);
                        info!("Discarding registration for {}: {}", key, e);
                        if let Err(e) = inner.store.delete(key.channel_id, key.interval_secs) {
                            warn!("Failed to remove dead registration for {}: {}", key, e);
                        }
                        false
                    }
                }
            }
        });

        let results = join_all(attempts).await;
        let restored = results.iter().filter(|ok| **ok).count();
        Ok(RestoreSummary {
            restored,
            discarded: results.len() - restored,
        })
    }

    pub fn is_running(&self, channel_id: u64, interval_secs: u32) -> bool {
        self.inner.registry.contains_key(&ScheduleKey {
            channel_id,
            interval_secs,
        })
    }

    pub fn running_keys(&self) -> Vec<ScheduleKey> {
        self.inner.registry.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    /// Claim the registry slot for `key`. Returns `None` when the key is
    /// already live; the winner gets the entry handle plus the command
    /// receiver its loop will consume.
    fn reserve(&self, key: ScheduleKey) -> Option<(Arc<EntryHandle>, mpsc::Receiver<LoopCommand>)> {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let entry = Arc::new(EntryHandle {
            cmd_tx,
            task: StdMutex::new(None),
        });

        match self.inner.registry.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&entry));
                Some((entry, cmd_rx))
            }
        }
    }

    /// Spawn the loop for a previously reserved entry.
    fn spawn_into(
        &self,
        entry: &EntryHandle,
        key: ScheduleKey,
        output: OutputHandle,
        cmd_rx: mpsc::Receiver<LoopCommand>,
        immediate: bool,
    ) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run_loop(inner, key, output, cmd_rx, immediate));
        if let Ok(mut slot) = entry.task.lock() {
            *slot = Some(task);
        }
    }
}

impl Clone for ChannelScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum LoopExit {
    Stopped(Option<oneshot::Sender<()>>),
    DestinationGone,
}

async fn run_loop(
    inner: Arc<SchedulerInner>,
    key: ScheduleKey,
    output: OutputHandle,
    mut cmd_rx: mpsc::Receiver<LoopCommand>,
    immediate: bool,
) {
    let period = key.period();
    let mut next_tick = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };

    let exit = loop {
        tokio::select! {
            _ = sleep_until(next_tick) => {
                // Cadence derives from the previous scheduled tick, never
                // from an out-of-band refresh.
                next_tick += period;
                if tick(&inner, key, output).await.is_err() {
                    break LoopExit::DestinationGone;
                }
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(LoopCommand::Refresh(ack)) => {
                    let result = tick(&inner, key, output).await;
                    let _ = ack.send(());
                    if result.is_err() {
                        break LoopExit::DestinationGone;
                    }
                }
                Some(LoopCommand::Stop(ack)) => break LoopExit::Stopped(Some(ack)),
                None => break LoopExit::Stopped(None),
            }
        }
    };

    match exit {
        LoopExit::Stopped(ack) => {
            if let Err(e) = inner.publisher.publish_stopped(output).await {
                debug!("Stopped-state edit failed for {}: {}", key, e);
            }
            finish_loop(&inner, key);
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        LoopExit::DestinationGone => {
            warn!("Destination gone for {}, stopping loop", key);
            finish_loop(&inner, key);
        }
    }
}

fn finish_loop(inner: &SchedulerInner, key: ScheduleKey) {
    if let Err(e) = inner.store.delete(key.channel_id, key.interval_secs) {
        warn!("Failed to delete registration for {}: {}", key, e);
    }
    inner.registry.remove(&key);
    debug!("Loop for {} finished", key);
}

/// One tick: refresh, diff, publish. `Err` means the destination is gone
/// and the loop must stop; every other failure keeps the loop alive.
async fn tick(inner: &SchedulerInner, key: ScheduleKey, output: OutputHandle) -> Result<(), ()> {
    let snapshot = match inner.cache.get_or_refresh(key.max_age()).await {
        Ok(snapshot) => snapshot,
        Err(SnapshotError::NoData) => {
            debug!("Scan produced no data, skipping tick for {}", key);
            return Ok(());
        }
        Err(e) => {
            warn!("Snapshot refresh failed for {}: {}", key, e);
            return Ok(());
        }
    };

    let delta = match inner.ranks.record_and_diff(
        &snapshot.session_name,
        key.interval_secs,
        &snapshot.ranking,
    ) {
        Ok(delta) => delta,
        Err(e) => {
            warn!("Rank history update failed for {}: {}", key, e);
            RankDelta::new()
        }
    };

    let content = UpdateContent {
        table: snapshot.table.clone(),
        session_name: snapshot.session_name.clone(),
        session_weight: snapshot.session_weight,
        interval_secs: key.interval_secs,
        computed_at: snapshot.computed_at,
        movers: format_movers(&delta),
    };

    match inner.publisher.publish_update(output, &content).await {
        Ok(()) => {
            debug!("Updated destination for {}", key);
            Ok(())
        }
        Err(PublishError::NotFound) => Err(()),
        Err(e) => {
            warn!("Publish failed for {}: {}", key, e);
            Ok(())
        }
    }
}

/// Render the biggest rank movements as a one-line summary.
fn format_movers(delta: &RankDelta) -> Option<String> {
    if delta.is_empty() {
        return None;
    }
    let mut movers: Vec<(&String, &i64)> = delta.iter().collect();
    movers.sort_by(|a, b| b.1.abs().cmp(&a.1.abs()).then_with(|| a.0.cmp(b.0)));
    movers.truncate(5);

    let parts: Vec<String> = movers
        .into_iter()
        .map(|(symbol, change)| {
            if *change > 0 {
                format!("{} ▲{}", symbol, change)
            } else {
                format!("{} ▼{}", symbol, -change)
            }
        })
        .collect();
    Some(parts.join(" · "))
}

/// Errors from scheduler lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scanner is already running for {0}")]
    AlreadyRunning(ScheduleKey),

    #[error("scanner is not running for {0}")]
    NotRunning(ScheduleKey),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Store(#[from] ScheduleStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use scanner_core::{Snapshot, SnapshotComputer};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn ranked_snapshot() -> Snapshot {
        Snapshot {
            table: "table".to_string(),
            computed_at: Utc::now(),
            session_name: "LONDON".to_string(),
            session_weight: 1.0,
            ranking: vec![("BTCUSDT".to_string(), 1), ("ETHUSDT".to_string(), 2)],
        }
    }

    struct StubComputer;

    #[async_trait]
    impl SnapshotComputer for StubComputer {
        async fn compute(&self) -> Result<Snapshot, SnapshotError> {
            Ok(ranked_snapshot())
        }
    }

    /// Fails with the scripted errors, in order, then succeeds forever.
    struct SequenceComputer {
        invocations: AtomicUsize,
        planned_errors: StdMutex<Vec<SnapshotError>>,
    }

    impl SequenceComputer {
        fn new(planned_errors: Vec<SnapshotError>) -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
                planned_errors: StdMutex::new(planned_errors),
            })
        }

        fn count(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotComputer for SequenceComputer {
        async fn compute(&self) -> Result<Snapshot, SnapshotError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let mut planned = self.planned_errors.lock().unwrap();
            if planned.is_empty() {
                Ok(ranked_snapshot())
            } else {
                Err(planned.remove(0))
            }
        }
    }

    #[derive(Default)]
    struct MockPublisher {
        next_message_id: AtomicU64,
        initial_delay: StdMutex<Duration>,
        updates: StdMutex<Vec<(OutputHandle, Instant)>>,
        stopped: StdMutex<Vec<OutputHandle>>,
        missing: StdMutex<HashSet<OutputHandle>>,
    }

    impl MockPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn placeholder_count(&self) -> u64 {
            self.next_message_id.load(Ordering::SeqCst)
        }

        fn set_initial_delay(&self, delay: Duration) {
            *self.initial_delay.lock().unwrap() = delay;
        }

        fn update_count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }

        fn update_times(&self) -> Vec<Instant> {
            self.updates.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }

        fn mark_missing(&self, handle: OutputHandle) {
            self.missing.lock().unwrap().insert(handle);
        }
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        async fn publish_initial(&self, channel_id: u64) -> Result<OutputHandle, PublishError> {
            let delay = *self.initial_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(OutputHandle {
                channel_id,
                message_id,
            })
        }

        async fn publish_update(
            &self,
            handle: OutputHandle,
            _content: &UpdateContent,
        ) -> Result<(), PublishError> {
            if self.missing.lock().unwrap().contains(&handle) {
                return Err(PublishError::NotFound);
            }
            self.updates.lock().unwrap().push((handle, Instant::now()));
            Ok(())
        }

        async fn publish_stopped(&self, handle: OutputHandle) -> Result<(), PublishError> {
            if self.missing.lock().unwrap().contains(&handle) {
                return Err(PublishError::NotFound);
            }
            self.stopped.lock().unwrap().push(handle);
            Ok(())
        }

        async fn resolve(&self, handle: OutputHandle) -> Result<(), PublishError> {
            if self.missing.lock().unwrap().contains(&handle) {
                return Err(PublishError::NotFound);
            }
            Ok(())
        }
    }

    struct Fixture {
        scheduler: ChannelScheduler,
        publisher: Arc<MockPublisher>,
        store: Arc<ScheduleStore>,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(StubComputer))
    }

    fn fixture_with(computer: Arc<dyn SnapshotComputer>) -> Fixture {
        let cache = SnapshotCache::new(computer);
        let ranks = Arc::new(RankStore::new_in_memory().unwrap());
        let store = Arc::new(ScheduleStore::new_in_memory().unwrap());
        let publisher = MockPublisher::new();
        let scheduler =
            ChannelScheduler::new(cache, ranks, Arc::clone(&store), publisher.clone());
        Fixture {
            scheduler,
            publisher,
            store,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_is_rejected() {
        let f = fixture();
        f.scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap();

        let err = f
            .scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning(_)));
        assert_eq!(f.scheduler.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_starts_post_a_single_placeholder() {
        let f = fixture();
        // Hold the winner inside publish_initial so the second start arrives
        // while the first is still mid-flight.
        f.publisher.set_initial_delay(Duration::from_millis(50));

        let (first, second) = tokio::join!(
            f.scheduler.start(100, 60, EntryLabels::default()),
            f.scheduler.start(100, 60, EntryLabels::default()),
        );

        // Exactly one start wins; the other is rejected before it publishes.
        assert!(first.is_ok() != second.is_ok());
        let loser = first.and(second).unwrap_err();
        assert!(matches!(loser, SchedulerError::AlreadyRunning(_)));
        assert_eq!(f.publisher.placeholder_count(), 1);

        // The durable row points at the message the live loop is editing.
        let rows = f.store.load_running().unwrap();
        assert_eq!(rows.len(), 1);
        wait_until(|| f.publisher.update_count() == 1).await;
        let updated = f.publisher.updates.lock().unwrap()[0].0;
        assert_eq!(rows[0].message_id, updated.message_id);
        assert!(f.publisher.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_keeps_loop_alive() {
        let computer = SequenceComputer::new(vec![SnapshotError::Upstream(
            "exchange unreachable".to_string(),
        )]);
        let f = fixture_with(computer.clone());
        f.scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap();

        // The immediate tick fails upstream; the loop survives it.
        wait_until(|| computer.count() == 1).await;
        assert!(f.scheduler.is_running(100, 60));
        assert_eq!(f.publisher.update_count(), 0);

        // The next scheduled tick succeeds and publishes as usual.
        tokio::time::advance(Duration::from_secs(60)).await;
        wait_until(|| f.publisher.update_count() == 1).await;
        assert!(f.scheduler.is_running(100, 60));
        assert_eq!(f.store.count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_scan_tick_skips_publish() {
        let computer = SequenceComputer::new(vec![SnapshotError::NoData]);
        let f = fixture_with(computer.clone());
        f.scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap();

        wait_until(|| computer.count() == 1).await;
        assert!(f.scheduler.is_running(100, 60));
        assert_eq!(f.publisher.update_count(), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        wait_until(|| f.publisher.update_count() == 1).await;
        assert!(f.scheduler.is_running(100, 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_persists_and_ticks_immediately() {
        let f = fixture();
        f.scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap();

        wait_until(|| f.publisher.update_count() == 1).await;
        assert_eq!(f.store.count().unwrap(), 1);
        assert!(f.scheduler.is_running(100, 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_channel_removes_all_intervals() {
        let f = fixture();
        f.scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap();
        f.scheduler
            .start(100, 300, EntryLabels::default())
            .await
            .unwrap();
        assert_eq!(f.store.count().unwrap(), 2);

        let stopped = f.scheduler.stop_channel(100).await;
        assert_eq!(stopped, 2);
        assert!(f.scheduler.is_empty());
        assert_eq!(f.store.count().unwrap(), 0);
        assert_eq!(f.publisher.stopped.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_key_errors() {
        let f = fixture();
        let err = f.scheduler.stop(100, 60).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotRunning(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destination_gone_stops_only_that_loop() {
        let f = fixture();
        f.scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap();
        f.scheduler
            .start(200, 60, EntryLabels::default())
            .await
            .unwrap();
        wait_until(|| f.publisher.update_count() == 2).await;

        // Kill channel 100's destination, then let its next tick fire.
        f.publisher.mark_missing(OutputHandle {
            channel_id: 100,
            message_id: 1,
        });
        tokio::time::advance(Duration::from_secs(60)).await;
        wait_until(|| f.scheduler.len() == 1).await;

        assert!(!f.scheduler.is_running(100, 60));
        assert!(f.scheduler.is_running(200, 60));
        let remaining = f.store.load_running().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].channel_id, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resolves_and_discards() {
        let f = fixture();
        for (interval, message_id) in [(60u32, 11u64), (300, 12)] {
            f.store
                .upsert(&PersistedEntry {
                    channel_id: 100,
                    interval_secs: interval,
                    message_id,
                    guild_id: None,
                    running: true,
                    server_name: None,
                    channel_name: None,
                })
                .unwrap();
        }
        // The 60s destination was deleted while the process was down.
        f.publisher.mark_missing(OutputHandle {
            channel_id: 100,
            message_id: 11,
        });

        let summary = f.scheduler.restore().await.unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                restored: 1,
                discarded: 1
            }
        );
        assert!(f.scheduler.is_running(100, 300));
        assert!(!f.scheduler.is_running(100, 60));
        assert_eq!(f.store.count().unwrap(), 1);

        // Restored loops tick immediately rather than waiting a period.
        wait_until(|| f.publisher.update_count() == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_skips_rows_not_marked_running() {
        let f = fixture();
        let mut halted = PersistedEntry {
            channel_id: 100,
            interval_secs: 60,
            message_id: 11,
            guild_id: None,
            running: false,
            server_name: None,
            channel_name: None,
        };
        f.store.upsert(&halted).unwrap();
        halted.interval_secs = 300;
        halted.message_id = 12;
        halted.running = true;
        f.store.upsert(&halted).unwrap();

        let summary = f.scheduler.restore().await.unwrap();
        assert_eq!(summary.restored, 1);
        assert!(f.scheduler.is_running(100, 300));
        assert!(!f.scheduler.is_running(100, 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_empty_store() {
        let f = fixture();
        let summary = f.scheduler.restore().await.unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                restored: 0,
                discarded: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_refresh_preserves_schedule() {
        let f = fixture();
        f.scheduler
            .start(100, 60, EntryLabels::default())
            .await
            .unwrap();
        wait_until(|| f.publisher.update_count() == 1).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        f.scheduler.refresh_all().await;
        assert_eq!(f.publisher.update_count(), 2);

        // The next scheduled tick still lands a full period after the
        // first, not a period after the out-of-band refresh.
        tokio::time::advance(Duration::from_secs(30)).await;
        wait_until(|| f.publisher.update_count() == 3).await;

        let times = f.publisher.update_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(30));
        assert_eq!(times[2] - times[0], Duration::from_secs(60));
    }

    #[test]
    fn test_format_movers() {
        let mut delta = RankDelta::new();
        assert_eq!(format_movers(&delta), None);

        delta.insert("BTCUSDT".to_string(), -1);
        delta.insert("ETHUSDT".to_string(), 1);
        delta.insert("SOLUSDT".to_string(), 4);
        let line = format_movers(&delta).unwrap();
        // Largest absolute movement first.
        assert!(line.starts_with("SOLUSDT ▲4"));
        assert!(line.contains("BTCUSDT ▼1"));
        assert!(line.contains("ETHUSDT ▲1"));
    }

    #[test]
    fn test_format_movers_caps_at_five() {
        let mut delta = RankDelta::new();
        for i in 0..8 {
            delta.insert(format!("SYM{}USDT", i), i + 1);
        }
        let line = format_movers(&delta).unwrap();
        assert_eq!(line.matches('▲').count(), 5);
    }
}
