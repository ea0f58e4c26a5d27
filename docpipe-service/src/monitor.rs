//! Client-side adaptive status monitor.
//!
//! Every monitored document gets its own polling task, cancellation token and
//! event channel. Polling backs off exponentially while the status endpoint
//! fails, consults the shared [`ErrorCache`] before each network call, treats
//! "not found" as possibly transient up to a threshold, and reports a stall
//! once when progress stops moving. Polling ends at a terminal status.
//!
//! `stop_monitoring` is synchronous: once it returns, no further event for that
//! document is delivered.

pub mod cache;
pub mod client;

pub use cache::{ErrorCache, ErrorCacheEntry};
pub use client::{HttpStatusClient, StatusClient};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::MonitorConfig;
use crate::db::{DocumentStatus, DocumentStatusReport};
use crate::error::{MonitorError, ProcessingError, format_error_chain_ref};

/// What a monitored document reports to its caller
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A successful poll
    Progress(DocumentStatusReport),
    /// Still processing with no progress for `stalled_for`
    Stalled {
        document_id: String,
        percentage: f64,
        stalled_for: Duration,
    },
    /// The document finished successfully; polling has stopped
    Completed(DocumentStatusReport),
    /// The document failed or could not be monitored; polling has stopped
    Failed {
        document_id: String,
        message: String,
        recoverable: bool,
    },
}

/// Result of one scheduled poll
#[derive(Debug)]
pub enum PollOutcome {
    Status(DocumentStatusReport),
    /// Skipped: the error cache forbids a network call before `until`
    Waiting { until: Instant },
    Failed(ProcessingError),
}

/// What the polling loop does after handling an outcome
#[derive(Debug)]
pub(crate) struct Step {
    pub events: Vec<MonitorEvent>,
    /// `None` stops polling
    pub next_poll: Option<Duration>,
}

/// Poll state of one document
pub(crate) struct Poller<C: StatusClient> {
    document_id: String,
    client: Arc<C>,
    cache: Arc<ErrorCache>,
    policy: BackoffPolicy,
    config: MonitorConfig,
    retry_count: u32,
    not_found_count: u32,
    last_success: Instant,
    last_percentage: Option<f64>,
    progress_since: Instant,
    stall_reported: bool,
}

impl<C: StatusClient> Poller<C> {
    pub(crate) fn new(
        document_id: &str,
        client: Arc<C>,
        cache: Arc<ErrorCache>,
        config: MonitorConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            document_id: document_id.to_string(),
            client,
            cache,
            policy: config.backoff_policy(),
            config,
            retry_count: 0,
            not_found_count: 0,
            last_success: now,
            last_percentage: None,
            progress_since: now,
            stall_reported: false,
        }
    }

    pub(crate) async fn poll_once(&self) -> PollOutcome {
        if let Some(until) = self.cache.retry_at(&self.document_id) {
            return PollOutcome::Waiting { until };
        }

        metrics::counter!("docpipe_monitor_polls_total").increment(1);
        match self.client.fetch_status(&self.document_id).await {
            Ok(report) => PollOutcome::Status(report),
            Err(e) => PollOutcome::Failed(e.into_processing()),
        }
    }

    pub(crate) fn handle(&mut self, outcome: PollOutcome) -> Step {
        let now = Instant::now();
        match outcome {
            PollOutcome::Waiting { until } => Step {
                events: Vec::new(),
                next_poll: Some(until.saturating_duration_since(now)),
            },
            PollOutcome::Status(report) => self.on_success(report, now),
            PollOutcome::Failed(error) => self.on_failure(error, now),
        }
    }

    fn on_success(&mut self, report: DocumentStatusReport, now: Instant) -> Step {
        self.retry_count = 0;
        self.not_found_count = 0;
        self.last_success = now;
        self.cache.clear(&self.document_id);

        let mut events = vec![MonitorEvent::Progress(report.clone())];

        match report.status {
            DocumentStatus::Completed => {
                events.push(MonitorEvent::Completed(report));
                return Step {
                    events,
                    next_poll: None,
                };
            }
            DocumentStatus::Error => {
                events.push(MonitorEvent::Failed {
                    document_id: self.document_id.clone(),
                    message: report
                        .error_message
                        .unwrap_or_else(|| "Document processing failed".to_string()),
                    recoverable: report.recoverable,
                });
                return Step {
                    events,
                    next_poll: None,
                };
            }
            DocumentStatus::Uploading | DocumentStatus::Processing => {}
        }

        if self.last_percentage != Some(report.percentage) {
            self.last_percentage = Some(report.percentage);
            self.progress_since = now;
            self.stall_reported = false;
        } else if !self.stall_reported {
            let stalled_for = now.duration_since(self.progress_since);
            if stalled_for >= self.config.stall_timeout() {
                self.stall_reported = true;
                warn!(
                    doc_id = %self.document_id,
                    percentage = report.percentage,
                    stalled_secs = stalled_for.as_secs(),
                    "Document progress stalled"
                );
                events.push(MonitorEvent::Stalled {
                    document_id: self.document_id.clone(),
                    percentage: report.percentage,
                    stalled_for,
                });
            }
        }

        Step {
            events,
            next_poll: Some(self.policy.base()),
        }
    }

    fn on_failure(&mut self, error: ProcessingError, now: Instant) -> Step {
        self.retry_count += 1;
        let message = format_error_chain_ref(&error);

        if matches!(error, ProcessingError::AmbiguousNotFound { .. }) {
            self.not_found_count += 1;
            if self.not_found_count >= self.config.not_found_threshold {
                return self.give_up(
                    format!(
                        "Document {} not found after {} consecutive checks",
                        self.document_id, self.not_found_count
                    ),
                    false,
                );
            }
        } else {
            self.not_found_count = 0;
        }

        if self.retry_count >= self.config.max_retries {
            return self.give_up(
                format!(
                    "Gave up after {} failed polls: {}",
                    self.retry_count, message
                ),
                true,
            );
        }

        let since_success = now.duration_since(self.last_success);
        if since_success > self.config.global_timeout() {
            return self.give_up(
                format!(
                    "No successful status poll for {}s: {}",
                    since_success.as_secs(),
                    message
                ),
                true,
            );
        }

        let interval = self.policy.delay(self.retry_count);
        let entry = self.cache.record_failure(&self.document_id, interval);
        debug!(
            doc_id = %self.document_id,
            retry_count = self.retry_count,
            error_count = entry.error_count,
            next_poll_ms = interval.as_millis() as u64,
            error = %message,
            "Status poll failed"
        );

        Step {
            events: Vec::new(),
            next_poll: Some(interval),
        }
    }

    fn give_up(&self, message: String, recoverable: bool) -> Step {
        warn!(doc_id = %self.document_id, error = %message, "Stopped monitoring document");
        Step {
            events: vec![MonitorEvent::Failed {
                document_id: self.document_id.clone(),
                message,
                recoverable,
            }],
            next_poll: None,
        }
    }
}

/// Delivery side of a monitor's channel. Taking the sender under the lock
/// guarantees no send can complete afterwards.
struct EventGate {
    tx: Mutex<Option<mpsc::UnboundedSender<MonitorEvent>>>,
}

impl EventGate {
    fn emit(&self, event: MonitorEvent) -> bool {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

struct MonitorHandle {
    /// Distinguishes this monitor from a later one for the same document
    session: uuid::Uuid,
    token: CancellationToken,
    gate: Arc<EventGate>,
    join: JoinHandle<()>,
}

/// Polls the status of any number of documents independently
pub struct StatusMonitor<C: StatusClient> {
    client: Arc<C>,
    config: MonitorConfig,
    cache: Arc<ErrorCache>,
    handles: Arc<DashMap<String, MonitorHandle>>,
}

impl<C: StatusClient> StatusMonitor<C> {
    pub fn new(client: Arc<C>, config: MonitorConfig) -> Self {
        let cache = Arc::new(ErrorCache::new(config.error_cache_ttl()));
        Self {
            client,
            config,
            cache,
            handles: Arc::new(DashMap::new()),
        }
    }

    /// Start polling a document. Events arrive on the returned receiver,
    /// which closes once polling ends.
    pub fn start_monitoring(
        &self,
        document_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<MonitorEvent>, MonitorError> {
        let entry = self.handles.entry(document_id.to_string());
        if let Entry::Occupied(existing) = &entry
            && !existing.get().join.is_finished()
        {
            return Err(MonitorError::AlreadyMonitoring {
                document_id: document_id.to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(EventGate {
            tx: Mutex::new(Some(tx)),
        });
        let token = CancellationToken::new();
        let session = uuid::Uuid::new_v4();

        let poller = Poller::new(
            document_id,
            self.client.clone(),
            self.cache.clone(),
            self.config.clone(),
        );
        let join = tokio::spawn(run_poller(
            poller,
            token.clone(),
            gate.clone(),
            self.handles.clone(),
            self.cache.clone(),
            session,
        ));

        let handle = MonitorHandle {
            session,
            token,
            gate,
            join,
        };
        match entry {
            Entry::Occupied(mut finished) => shut_down(finished.insert(handle)),
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
            }
        }
        info!(doc_id = %document_id, "Started monitoring document");
        Ok(rx)
    }

    /// Stop polling a document. No event for it is delivered after this returns.
    pub fn stop_monitoring(&self, document_id: &str) -> bool {
        let Some((_, handle)) = self.handles.remove(document_id) else {
            return false;
        };
        shut_down(handle);
        self.cache.clear(document_id);
        debug!(doc_id = %document_id, "Stopped monitoring document");
        true
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_monitoring(&id);
        }
    }

    pub fn is_monitoring(&self, document_id: &str) -> bool {
        self.handles
            .get(document_id)
            .is_some_and(|handle| !handle.join.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|entry| !entry.value().join.is_finished())
            .count()
    }

    pub fn error_cache(&self) -> &ErrorCache {
        &self.cache
    }
}

impl<C: StatusClient> Drop for StatusMonitor<C> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn shut_down(handle: MonitorHandle) {
    handle.token.cancel();
    handle.gate.close();
    handle.join.abort();
}

async fn run_poller<C: StatusClient>(
    mut poller: Poller<C>,
    token: CancellationToken,
    gate: Arc<EventGate>,
    handles: Arc<DashMap<String, MonitorHandle>>,
    cache: Arc<ErrorCache>,
    session: uuid::Uuid,
) {
    loop {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            outcome = poller.poll_once() => outcome,
        };

        let step = poller.handle(outcome);
        for event in step.events {
            if !gate.emit(event) {
                return;
            }
        }

        let Some(delay) = step.next_poll else {
            break;
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    // Finished on its own: close the channel and forget this session
    gate.close();
    cache.clear(&poller.document_id);
    handles.remove_if(&poller.document_id, |_, handle| handle.session == session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::db::StageFlags;

    enum Reply {
        Status(DocumentStatus, f64),
        NotFound,
        Unavailable,
    }

    /// Answers from a per-document script; an exhausted script repeats its last reply
    #[derive(Default)]
    struct ScriptedStatus {
        scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: AtomicU32,
    }

    impl ScriptedStatus {
        fn with(document_id: &str, replies: Vec<Reply>) -> Self {
            let client = Self::default();
            client.script(document_id, replies);
            client
        }

        fn script(&self, document_id: &str, replies: Vec<Reply>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(document_id.to_string(), replies.into());
        }
    }

    fn report(document_id: &str, status: DocumentStatus, percentage: f64) -> DocumentStatusReport {
        DocumentStatusReport {
            document_id: document_id.to_string(),
            status,
            stage_flags: StageFlags::default(),
            percentage,
            error_message: (status == DocumentStatus::Error).then(|| "parser exploded".to_string()),
            recoverable: status == DocumentStatus::Error,
        }
    }

    #[async_trait]
    impl StatusClient for ScriptedStatus {
        async fn fetch_status(
            &self,
            document_id: &str,
        ) -> Result<DocumentStatusReport, MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(document_id.to_string()).or_default();
            let reply = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().map(|r| match r {
                    Reply::Status(s, p) => Reply::Status(*s, *p),
                    Reply::NotFound => Reply::NotFound,
                    Reply::Unavailable => Reply::Unavailable,
                })
            };
            match reply {
                Some(Reply::Status(status, percentage)) => {
                    Ok(report(document_id, status, percentage))
                }
                Some(Reply::NotFound) => Err(MonitorError::NotFound {
                    document_id: document_id.to_string(),
                }),
                Some(Reply::Unavailable) | None => Err(MonitorError::Status {
                    status: 503,
                    message: "unavailable".into(),
                }),
            }
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            base_interval_ms: 1_000,
            max_interval_ms: 30_000,
            jitter_ms: 500,
            max_retries: 5,
            global_timeout_secs: 300,
            error_cache_ttl_secs: 60,
            not_found_threshold: 3,
            stall_timeout_secs: 10,
        }
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_within_bounds_and_resets() {
        let client = Arc::new(ScriptedStatus::with("doc", vec![Reply::Unavailable]));
        let cache = Arc::new(ErrorCache::new(Duration::from_secs(60)));
        let mut config = config();
        config.max_retries = 10;
        let mut poller = Poller::new("doc", client.clone(), cache.clone(), config);

        for failures in 1..=6u32 {
            let step = poller.handle(PollOutcome::Failed(ProcessingError::Transient {
                message: "unavailable".into(),
            }));
            let delay = step.next_poll.unwrap().as_millis() as u64;
            let floor = (1_000u64 << failures).min(30_000);
            let ceiling = (1_000u64 << failures).saturating_add(500).min(30_000);
            assert!(
                (floor..=ceiling).contains(&delay),
                "failure {} gave {}ms",
                failures,
                delay
            );
        }

        let step = poller.handle(PollOutcome::Status(report(
            "doc",
            DocumentStatus::Processing,
            10.0,
        )));
        assert_eq!(step.next_poll, Some(Duration::from_secs(1)));
        assert!(cache.get("doc").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_cache_allows_one_call_per_window() {
        let client = Arc::new(ScriptedStatus::with("doc", vec![Reply::Unavailable]));
        let cache = Arc::new(ErrorCache::new(Duration::from_secs(60)));
        let mut poller = Poller::new("doc", client.clone(), cache.clone(), config());

        let first = poller.poll_once().await;
        assert!(matches!(first, PollOutcome::Failed(_)));
        let step = poller.handle(first);

        let second = poller.poll_once().await;
        assert!(matches!(second, PollOutcome::Waiting { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // Waiting reschedules for when the window ends
        let wait = poller.handle(second).next_poll.unwrap();
        assert!(wait <= step.next_poll.unwrap());

        tokio::time::advance(wait).await;
        assert!(matches!(poller.poll_once().await, PollOutcome::Failed(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_terminal_status() {
        let client = Arc::new(ScriptedStatus::with(
            "doc",
            vec![
                Reply::Status(DocumentStatus::Processing, 20.0),
                Reply::Unavailable,
                Reply::Status(DocumentStatus::Processing, 60.0),
                Reply::Status(DocumentStatus::Completed, 100.0),
            ],
        ));
        let monitor = StatusMonitor::new(client.clone(), config());
        let mut rx = monitor.start_monitoring("doc").unwrap();

        let events = collect(&mut rx).await;
        let percentages: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Progress(r) => Some(r.percentage),
                _ => None,
            })
            .collect();
        assert_eq!(percentages, vec![20.0, 60.0, 100.0]);
        assert!(matches!(events.last(), Some(MonitorEvent::Completed(_))));
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);

        tokio::task::yield_now().await;
        assert!(!monitor.is_monitoring("doc"));
        assert_eq!(monitor.active_count(), 0);
        assert!(monitor.error_cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_document_reports_its_error() {
        let client = Arc::new(ScriptedStatus::with(
            "doc",
            vec![Reply::Status(DocumentStatus::Error, 20.0)],
        ));
        let monitor = StatusMonitor::new(client, config());
        let mut rx = monitor.start_monitoring("doc").unwrap();

        let events = collect(&mut rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            MonitorEvent::Failed {
                document_id: "doc".into(),
                message: "parser exploded".into(),
                recoverable: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_escalates_after_threshold() {
        let client = Arc::new(ScriptedStatus::with("doc", vec![Reply::NotFound]));
        let mut config = config();
        config.max_retries = 10;
        let monitor = StatusMonitor::new(client.clone(), config);
        let mut rx = monitor.start_monitoring("doc").unwrap();

        let events = collect(&mut rx).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            MonitorEvent::Failed {
                message,
                recoverable,
                ..
            } => {
                assert!(!recoverable);
                assert!(message.contains("not found after 3 consecutive checks"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_streak_resets_on_other_errors() {
        let client = Arc::new(ScriptedStatus::with(
            "doc",
            vec![
                Reply::NotFound,
                Reply::NotFound,
                Reply::Unavailable,
                Reply::NotFound,
                Reply::Status(DocumentStatus::Completed, 100.0),
            ],
        ));
        let mut config = config();
        config.max_retries = 10;
        let monitor = StatusMonitor::new(client, config);
        let mut rx = monitor.start_monitoring("doc").unwrap();

        let events = collect(&mut rx).await;
        assert!(matches!(events.last(), Some(MonitorEvent::Completed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let client = Arc::new(ScriptedStatus::with("doc", vec![Reply::Unavailable]));
        let monitor = StatusMonitor::new(client.clone(), config());
        let mut rx = monitor.start_monitoring("doc").unwrap();

        let events = collect(&mut rx).await;
        match &events[..] {
            [MonitorEvent::Failed {
                message,
                recoverable,
                ..
            }] => {
                assert!(recoverable);
                assert!(message.starts_with("Gave up after 5 failed polls"));
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_timeout_without_success() {
        let client = Arc::new(ScriptedStatus::with("doc", vec![Reply::Unavailable]));
        let mut config = config();
        config.max_retries = 100;
        config.max_interval_ms = 4_000;
        config.global_timeout_secs = 20;
        let monitor = StatusMonitor::new(client, config);
        let mut rx = monitor.start_monitoring("doc").unwrap();

        let started = Instant::now();
        let events = collect(&mut rx).await;
        assert!(started.elapsed() > Duration::from_secs(20));
        match &events[..] {
            [MonitorEvent::Failed { message, .. }] => {
                assert!(message.starts_with("No successful status poll"));
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_is_reported_once() {
        let client = Arc::new(ScriptedStatus::with(
            "doc",
            vec![Reply::Status(DocumentStatus::Processing, 40.0)],
        ));
        let monitor = StatusMonitor::new(client, config());
        let mut rx = monitor.start_monitoring("doc").unwrap();

        // Poll every second; the stall timeout is 10s
        tokio::time::sleep(Duration::from_secs(30)).await;
        monitor.stop_monitoring("doc");

        let events = collect(&mut rx).await;
        let stalls: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::Stalled { .. }))
            .collect();
        assert_eq!(stalls.len(), 1);
        match stalls[0] {
            MonitorEvent::Stalled {
                percentage,
                stalled_for,
                ..
            } => {
                assert_eq!(*percentage, 40.0);
                assert!(*stalled_for >= Duration::from_secs(10));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_after_stop() {
        let client = Arc::new(ScriptedStatus::with(
            "doc",
            vec![Reply::Status(DocumentStatus::Processing, 10.0)],
        ));
        let monitor = StatusMonitor::new(client.clone(), config());
        let mut rx = monitor.start_monitoring("doc").unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(monitor.stop_monitoring("doc"));
        assert!(!monitor.stop_monitoring("doc"));
        let calls = client.calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let events = collect(&mut rx).await;
        assert_eq!(events.len(), calls as usize);
        assert_eq!(client.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_documents_are_independent() {
        let client = Arc::new(ScriptedStatus::default());
        client.script("gone", vec![Reply::NotFound]);
        client.script("fine", vec![
            Reply::Status(DocumentStatus::Processing, 50.0),
            Reply::Status(DocumentStatus::Completed, 100.0),
        ]);
        let mut config = config();
        config.max_retries = 10;
        let monitor = StatusMonitor::new(client, config);

        let mut gone = monitor.start_monitoring("gone").unwrap();
        let mut fine = monitor.start_monitoring("fine").unwrap();
        assert!(matches!(
            monitor.start_monitoring("fine"),
            Err(MonitorError::AlreadyMonitoring { .. })
        ));

        let fine_events = collect(&mut fine).await;
        assert!(matches!(fine_events.last(), Some(MonitorEvent::Completed(_))));
        let gone_events = collect(&mut gone).await;
        assert!(matches!(
            gone_events.last(),
            Some(MonitorEvent::Failed {
                recoverable: false,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let client = Arc::new(ScriptedStatus::default());
        for id in ["a", "b", "c"] {
            client.script(id, vec![Reply::Status(DocumentStatus::Processing, 5.0)]);
        }
        let monitor = StatusMonitor::new(client, config());
        let mut receivers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| monitor.start_monitoring(id).unwrap())
            .collect();
        assert_eq!(monitor.active_count(), 3);

        monitor.stop_all();
        assert_eq!(monitor.active_count(), 0);
        for rx in &mut receivers {
            // Closed: buffered events drain, then None
            while rx.recv().await.is_some() {}
        }

        // A stopped document can be monitored again
        assert!(monitor.start_monitoring("a").is_ok());
    }
}
