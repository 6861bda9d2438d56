//! End-to-end scenarios for the Channel Group/Unit state machine, covering
//! the concrete cases enumerated for this subsystem: single success, single
//! failure, backpressure, pause composition, target-key pause, auth-token
//! timeline recursion, disable-with-wipe, and re-enable after wipe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use telemetry_channel::auth::{AuthTokenWindow, SharedAuthTokenContext, StaticAuthTokenContext};
use telemetry_channel::config::GroupConfig;
use telemetry_channel::delegate::Delegate;
use telemetry_channel::error::{DeliveryError, IngestionError};
use telemetry_channel::group::ChannelGroup;
use telemetry_channel::ingestion::{Batch, IngestionClient, IngestionEvent};
use telemetry_channel::pause::PauseId;
use telemetry_channel::record::{Flags, Log};
use telemetry_channel::store::InMemoryLogStore;

/// A controllable ingestion fake: records every call, can be told to hold
/// all calls open until released (for exercising concurrency), and returns
/// a queued result per call (defaulting to success).
#[derive(Clone)]
struct FakeIngestion {
    calls: Arc<Mutex<Vec<(Batch, Option<String>)>>>,
    results: Arc<Mutex<VecDeque<Result<(), IngestionError>>>>,
    release_tx: watch::Sender<bool>,
    release_rx: watch::Receiver<bool>,
    hold: Arc<std::sync::atomic::AtomicBool>,
    events_tx: mpsc::UnboundedSender<IngestionEvent>,
    events_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<IngestionEvent>>>>,
}

impl FakeIngestion {
    fn new() -> Self {
        let (release_tx, release_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            results: Arc::new(Mutex::new(VecDeque::new())),
            release_tx,
            release_rx,
            hold: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            events_tx,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
        }
    }

    fn hold_sends(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    fn release_all(&self) {
        let _ = self.release_tx.send(true);
    }

    fn push_result(&self, result: Result<(), IngestionError>) {
        self.results.lock().push_back(result);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn tokens(&self) -> Vec<Option<String>> {
        self.calls.lock().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl IngestionClient for FakeIngestion {
    async fn is_ready_to_send(&self) -> bool {
        true
    }

    async fn send(&self, batch: Batch, token: Option<String>) -> Result<(), IngestionError> {
        self.calls.lock().push((batch, token));
        if self.hold.load(Ordering::SeqCst) {
            let mut rx = self.release_rx.clone();
            let _ = rx.wait_for(|released| *released).await;
        }
        self.results
            .lock()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<IngestionEvent> {
        self.events_rx
            .lock()
            .take()
            .expect("subscribe called more than once in this test")
    }
}

#[derive(Default)]
struct RecordingDelegate {
    events: Mutex<Vec<String>>,
}

impl RecordingDelegate {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl Delegate for RecordingDelegate {
    fn did_succeed_sending_log(&self, _record: &Log) {
        self.events.lock().push("succeed".to_string());
    }

    fn did_fail_sending_log(&self, _record: &Log, error: &DeliveryError) {
        self.events.lock().push(format!("fail:{error}"));
    }

    fn did_pause(&self, identifier: &PauseId) {
        self.events.lock().push(format!("pause:{identifier}"));
    }

    fn did_resume(&self, identifier: &PauseId) {
        self.events.lock().push(format!("resume:{identifier}"));
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let step = Duration::from_millis(5);
    let mut waited = Duration::ZERO;
    while !cond() {
        if waited >= timeout {
            return false;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    true
}

fn payload() -> bytes::Bytes {
    bytes::Bytes::from_static(b"payload")
}

#[tokio::test]
async fn single_success() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();
    let auth = Arc::new(SharedAuthTokenContext::new());
    let delegate = Arc::new(RecordingDelegate::default());

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(1)
        .pending_batches_limit(1)
        .flush_interval(Duration::ZERO)
        .build()
        .unwrap();
    let unit = group.attach(config);
    unit.register_delegate(delegate.clone());
    unit.enqueue(Log::new(payload()), Flags::Default);

    assert!(wait_until(|| ingestion.call_count() == 1, Duration::from_secs(2)).await);
    assert!(wait_until(|| unit.snapshot().pending_batch_count == 0, Duration::from_secs(2)).await);

    assert_eq!(ingestion.tokens(), vec![None]);
    assert_eq!(unit.snapshot().items_count, 0);
    let events = delegate.events();
    assert_eq!(events.iter().filter(|e| *e == "succeed").count(), 1);
    assert_eq!(events.iter().filter(|e| e.starts_with("fail")).count(), 0);
    assert_eq!(store.count("g1").await.unwrap(), 0);
}

#[tokio::test]
async fn single_failure() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();
    ingestion.push_result(Err(IngestionError::Http {
        status: 300,
        message: "redirected".to_string(),
    }));
    let auth = Arc::new(SharedAuthTokenContext::new());
    let delegate = Arc::new(RecordingDelegate::default());

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(1)
        .pending_batches_limit(1)
        .flush_interval(Duration::ZERO)
        .build()
        .unwrap();
    let unit = group.attach(config);
    unit.register_delegate(delegate.clone());
    unit.enqueue(Log::new(payload()), Flags::Default);

    assert!(wait_until(|| unit.snapshot().pending_batch_count == 0, Duration::from_secs(2)).await);

    let events = delegate.events();
    assert_eq!(events.iter().filter(|e| e.starts_with("fail")).count(), 1);
    assert_eq!(events.iter().filter(|e| *e == "succeed").count(), 0);
    assert_eq!(store.count("g1").await.unwrap(), 0);
}

#[tokio::test]
async fn backpressure_limits_concurrent_sends() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();
    ingestion.hold_sends();
    let auth = Arc::new(SharedAuthTokenContext::new());

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(1)
        .pending_batches_limit(2)
        .flush_interval(Duration::ZERO)
        .build()
        .unwrap();
    let unit = group.attach(config);

    unit.enqueue(Log::new(payload()), Flags::Default);
    unit.enqueue(Log::new(payload()), Flags::Default);
    unit.enqueue(Log::new(payload()), Flags::Default);

    assert!(wait_until(|| ingestion.call_count() == 2, Duration::from_secs(2)).await);
    // Give the actor a moment to settle so a would-be third send would have
    // had a chance to fire if backpressure weren't enforced.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ingestion.call_count(), 2);
    assert!(unit.snapshot().pending_batch_count >= 2);
    assert_eq!(store.count("g1").await.unwrap(), 1);

    ingestion.release_all();
    assert!(wait_until(|| ingestion.call_count() == 3, Duration::from_secs(2)).await);
    assert!(wait_until(|| store.count("g1").await.unwrap() == 0, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn pause_composition_resumes_only_once_every_identifier_clears() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();
    let auth = Arc::new(SharedAuthTokenContext::new());
    let delegate = Arc::new(RecordingDelegate::default());

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(1)
        .pending_batches_limit(1)
        .flush_interval(Duration::ZERO)
        .build()
        .unwrap();
    let unit = group.attach(config);
    unit.register_delegate(delegate.clone());

    unit.pause(PauseId::new("a"));
    unit.pause(PauseId::new("b"));
    unit.pause(PauseId::new("c"));
    unit.resume(PauseId::new("a"));
    unit.resume(PauseId::new("c"));

    assert!(wait_until(|| unit.snapshot().paused_by_id, Duration::from_secs(1)).await);
    assert!(unit.snapshot().paused_by_id);

    unit.enqueue(Log::new(payload()), Flags::Default);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ingestion.call_count(), 0);

    unit.resume(PauseId::new("b"));
    assert!(wait_until(|| !unit.snapshot().paused_by_id, Duration::from_secs(1)).await);
    assert!(wait_until(|| ingestion.call_count() == 1, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn target_key_pause_excludes_matching_records_from_send() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();
    let auth = Arc::new(SharedAuthTokenContext::new());

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(1)
        .pending_batches_limit(1)
        .flush_interval(Duration::ZERO)
        .build()
        .unwrap();
    let unit = group.attach(config);

    unit.pause_target("k1-secret");
    unit.enqueue(
        Log::new(payload()).with_target("k1-othersecret"),
        Flags::Default,
    );

    assert!(wait_until(|| store.count("g1").await.unwrap() == 1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ingestion.call_count(), 0);
    assert_eq!(store.count("g1").await.unwrap(), 1);

    unit.resume_target("k1-secret");
    assert!(wait_until(|| ingestion.call_count() == 1, Duration::from_secs(2)).await);
    assert_eq!(ingestion.tokens(), vec![None]);
}

#[tokio::test]
async fn token_timeline_recursion_skips_empty_windows() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let timeline = vec![
        AuthTokenWindow {
            token: Some("t1".to_string()),
            start: 0,
            end: Some(now.saturating_sub(200)),
        },
        AuthTokenWindow {
            token: Some("t2".to_string()),
            start: now.saturating_sub(200),
            end: Some(now.saturating_sub(100)),
        },
        AuthTokenWindow {
            token: Some("t3".to_string()),
            start: now.saturating_sub(100),
            end: None,
        },
    ];
    let auth = Arc::new(StaticAuthTokenContext(timeline));

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(10)
        .pending_batches_limit(1)
        .flush_interval(Duration::ZERO)
        .build()
        .unwrap();
    let unit = group.attach(config);

    for _ in 0..5 {
        unit.enqueue(Log::new(payload()), Flags::Default);
    }

    assert!(wait_until(|| ingestion.call_count() == 1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ingestion.call_count(), 1);
    assert_eq!(ingestion.tokens(), vec![Some("t3".to_string())]);
}

#[tokio::test]
async fn disable_with_wipe_discards_future_enqueues() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();
    let auth = Arc::new(SharedAuthTokenContext::new());

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(100)
        .pending_batches_limit(1)
        .flush_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let unit = group.attach(config);

    unit.enqueue(Log::new(payload()), Flags::Default);
    assert!(wait_until(|| store.count("g1").await.unwrap() == 1, Duration::from_secs(1)).await);

    unit.set_enabled(false, true);
    assert!(wait_until(|| unit.snapshot().discard_logs, Duration::from_secs(1)).await);
    assert!(wait_until(|| store.count("g1").await.unwrap() == 0, Duration::from_secs(1)).await);

    unit.enqueue(Log::new(payload()), Flags::Default);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.count("g1").await.unwrap(), 0);
}

#[tokio::test]
async fn re_enable_after_wipe_resumes_persistence() {
    let store = Arc::new(InMemoryLogStore::new());
    let ingestion = FakeIngestion::new();
    let auth = Arc::new(SharedAuthTokenContext::new());

    let group = ChannelGroup::builder(store.clone(), Arc::new(ingestion.clone()), auth).build();
    let config = GroupConfig::builder("g1")
        .batch_size_limit(100)
        .pending_batches_limit(1)
        .flush_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let unit = group.attach(config);

    unit.set_enabled(false, true);
    assert!(wait_until(|| unit.snapshot().discard_logs, Duration::from_secs(1)).await);

    unit.set_enabled(true, false);
    assert!(wait_until(|| !unit.snapshot().discard_logs, Duration::from_secs(1)).await);

    unit.enqueue(Log::new(payload()), Flags::Default);
    assert!(wait_until(|| store.count("g1").await.unwrap() == 1, Duration::from_secs(1)).await);
}
