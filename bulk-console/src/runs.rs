use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use bulk::{
    BatchError, BatchRequest, BatchRunState, GateScope, OperationKind, PageFetcher, PauseGate,
    PauseHandle, ProgressUpdate, RunId, validate_request, walk,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::logging::{category_batch, phase_label};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Running => "running",
            RunPhase::Paused => "paused",
            RunPhase::Completed => "completed",
            RunPhase::Cancelled => "cancelled",
            RunPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Cancelled | RunPhase::Failed
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub operation: OperationKind,
    pub phase: RunPhase,
    pub batch_size: u32,
    pub totals: BatchRunState,
    pub started_unix_ms: u64,
    pub updated_unix_ms: u64,
    pub finished_unix_ms: Option<u64>,
    pub message: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StartRun {
    pub operation: OperationKind,
    pub request: BatchRequest,
    pub batch_size: Option<u32>,
}

/// Control result for pause, resume and cancel requests. `accepted` is false when the
/// request changed nothing: the run already finished, the gate was not in the required
/// state, or a pause targeted an explicit id list run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunControlOutcome {
    pub run_id: RunId,
    pub accepted: bool,
    pub paused: bool,
    pub phase: RunPhase,
}

struct RunRecord {
    snapshot: RunSnapshot,
    filter_based: bool,
    finished_seq: Option<u64>,
    done: watch::Receiver<bool>,
}

#[derive(Default)]
struct RunMetrics {
    runs_started_total: AtomicU64,
    runs_completed_total: AtomicU64,
    runs_failed_total: AtomicU64,
    runs_cancelled_total: AtomicU64,
    runs_pruned_total: AtomicU64,
    pages_folded_total: AtomicU64,
}

pub const DEFAULT_FINISHED_RUN_LIMIT: usize = 256;

/// State shared between the controller and the walks it spawned.
struct RunShared<F> {
    fetcher: F,
    gate: PauseGate,
    runs: RwLock<HashMap<RunId, RunRecord>>,
    default_batch_size: u32,
    finished_run_limit: usize,
    finished_seq: AtomicU64,
    started_at: Instant,
    metrics: RunMetrics,
}

/// Owns the runs started through it: their pause handles, progress and final outcome.
///
/// Pause registrations belong to the controller, not to the spawned walks. Dropping the last
/// clone force-resumes every run it paused so no walk waits forever. Only the newest
/// `finished_run_limit` terminal runs are kept; older ones are pruned as runs finish.
pub struct RunController<F> {
    shared: Arc<RunShared<F>>,
    scope: Arc<Mutex<GateScope>>,
}

impl<F> Clone for RunController<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<F> RunController<F>
where
    F: PageFetcher + 'static,
{
    pub fn new(fetcher: F, default_batch_size: u32) -> Self {
        Self::with_finished_run_limit(fetcher, default_batch_size, DEFAULT_FINISHED_RUN_LIMIT)
    }

    pub fn with_finished_run_limit(
        fetcher: F,
        default_batch_size: u32,
        finished_run_limit: usize,
    ) -> Self {
        let gate = PauseGate::new();
        let scope = gate.scope();
        Self {
            shared: Arc::new(RunShared {
                fetcher,
                gate,
                runs: RwLock::new(HashMap::new()),
                default_batch_size: default_batch_size.max(1),
                finished_run_limit: finished_run_limit.max(1),
                finished_seq: AtomicU64::new(0),
                started_at: Instant::now(),
                metrics: RunMetrics::default(),
            }),
            scope: Arc::new(Mutex::new(scope)),
        }
    }

    pub fn default_batch_size(&self) -> u32 {
        self.shared.default_batch_size
    }

    /// Validates and spawns a run. Returns the initial snapshot.
    pub fn start(&self, start: StartRun) -> Result<RunSnapshot, BatchError> {
        let batch_size = start.batch_size.unwrap_or(self.shared.default_batch_size);
        validate_request(start.operation, &start.request, batch_size)?;

        let run_id = RunId::new(Uuid::new_v4().to_string());
        let handle = self
            .scope
            .lock()
            .expect("gate scope lock poisoned")
            .register(run_id.clone());
        let (done_tx, done_rx) = watch::channel(false);
        let now = now_unix_ms();
        let snapshot = RunSnapshot {
            run_id: run_id.clone(),
            operation: start.operation,
            phase: RunPhase::Running,
            batch_size,
            totals: BatchRunState::default(),
            started_unix_ms: now,
            updated_unix_ms: now,
            finished_unix_ms: None,
            message: None,
        };
        let filter_based = start.request.is_filter_based();
        self.shared
            .runs
            .write()
            .expect("run registry lock poisoned")
            .insert(
                run_id.clone(),
                RunRecord {
                    snapshot: snapshot.clone(),
                    filter_based,
                    finished_seq: None,
                    done: done_rx,
                },
            );
        self.shared
            .metrics
            .runs_started_total
            .fetch_add(1, Ordering::Relaxed);
        info!(
            "{} started run_id={} operation={} batch_size={} filter_based={}",
            category_batch(),
            run_id,
            start.operation,
            batch_size,
            filter_based
        );

        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared
                .drive(handle, start.operation, start.request, batch_size)
                .await;
            let _ = done_tx.send(true);
        });

        Ok(snapshot)
    }

    /// Only filter-based runs can be paused; an explicit id list is a single page and never
    /// reaches a checkpoint.
    pub fn pause(&self, run_id: &RunId) -> Option<RunControlOutcome> {
        self.control(run_id, |gate, filter_based| filter_based && gate.pause(run_id))
    }

    pub fn resume(&self, run_id: &RunId) -> Option<RunControlOutcome> {
        self.control(run_id, |gate, _| gate.resume(run_id))
    }

    pub fn cancel(&self, run_id: &RunId) -> Option<RunControlOutcome> {
        self.control(run_id, |gate, _| gate.cancel(run_id))
    }

    pub fn is_paused(&self, run_id: &RunId) -> bool {
        self.shared.gate.is_paused(run_id)
    }

    pub fn snapshot(&self, run_id: &RunId) -> Option<RunSnapshot> {
        let guard = self.shared.runs.read().expect("run registry lock poisoned");
        guard
            .get(run_id)
            .map(|record| self.shared.observed(record.snapshot.clone()))
    }

    /// Snapshots of every known run, most recently started first.
    pub fn list(&self) -> Vec<RunSnapshot> {
        let mut runs = {
            let guard = self.shared.runs.read().expect("run registry lock poisoned");
            guard
                .values()
                .map(|record| self.shared.observed(record.snapshot.clone()))
                .collect::<Vec<_>>()
        };
        runs.sort_by(|lhs, rhs| rhs.started_unix_ms.cmp(&lhs.started_unix_ms));
        runs
    }

    /// Forgets a finished run. `Ok(None)` when the run is unknown; active runs are refused.
    pub fn remove(&self, run_id: &RunId) -> Result<Option<RunSnapshot>, BatchError> {
        let mut guard = self.shared.runs.write().expect("run registry lock poisoned");
        let Some(record) = guard.get(run_id) else {
            return Ok(None);
        };
        if !record.snapshot.phase.is_terminal() {
            return Err(BatchError::InvalidRequest(format!("run {run_id} is still active")));
        }
        let removed = guard.remove(run_id).map(|record| record.snapshot);
        info!("{} removed run_id={}", category_batch(), run_id);
        Ok(removed)
    }

    /// Waits until the run reaches a terminal phase.
    pub async fn wait(&self, run_id: &RunId) -> Option<RunSnapshot> {
        let mut done = {
            let guard = self.shared.runs.read().expect("run registry lock poisoned");
            guard.get(run_id)?.done.clone()
        };
        let _ = done.wait_for(|finished| *finished).await;
        self.snapshot(run_id)
    }

    /// Force-resumes every paused run and drops all pause registrations.
    pub fn shutdown(&self) -> usize {
        let released = self.shared.gate.release_all();
        info!(
            "{} released pause gates on shutdown resumed={}",
            category_batch(),
            released
        );
        released
    }

    pub fn metrics_text(&self) -> String {
        let (active, retained) = {
            let guard = self.shared.runs.read().expect("run registry lock poisoned");
            let active = guard
                .values()
                .filter(|record| !record.snapshot.phase.is_terminal())
                .count();
            (active, guard.len())
        };
        let metrics = &self.shared.metrics;
        format!(
            concat!(
                "bulk_console_uptime_seconds {}\n",
                "bulk_console_active_runs {}\n",
                "bulk_console_retained_runs {}\n",
                "bulk_console_runs_started_total {}\n",
                "bulk_console_runs_completed_total {}\n",
                "bulk_console_runs_failed_total {}\n",
                "bulk_console_runs_cancelled_total {}\n",
                "bulk_console_runs_pruned_total {}\n",
                "bulk_console_pages_folded_total {}\n"
            ),
            self.shared.started_at.elapsed().as_secs(),
            active,
            retained,
            metrics.runs_started_total.load(Ordering::Relaxed),
            metrics.runs_completed_total.load(Ordering::Relaxed),
            metrics.runs_failed_total.load(Ordering::Relaxed),
            metrics.runs_cancelled_total.load(Ordering::Relaxed),
            metrics.runs_pruned_total.load(Ordering::Relaxed),
            metrics.pages_folded_total.load(Ordering::Relaxed),
        )
    }

    fn control(
        &self,
        run_id: &RunId,
        apply: impl FnOnce(&PauseGate, bool) -> bool,
    ) -> Option<RunControlOutcome> {
        let (phase, filter_based) = {
            let guard = self.shared.runs.read().expect("run registry lock poisoned");
            let record = guard.get(run_id)?;
            (record.snapshot.phase, record.filter_based)
        };
        let accepted = !phase.is_terminal() && apply(&self.shared.gate, filter_based);
        let paused = self.shared.gate.is_paused(run_id);
        let phase = if !phase.is_terminal() && paused {
            RunPhase::Paused
        } else {
            phase
        };
        Some(RunControlOutcome {
            run_id: run_id.clone(),
            accepted,
            paused,
            phase,
        })
    }
}

impl<F> RunShared<F>
where
    F: PageFetcher,
{
    async fn drive(
        &self,
        handle: PauseHandle,
        operation: OperationKind,
        request: BatchRequest,
        batch_size: u32,
    ) {
        let run_id = handle.run_id().clone();
        let outcome = walk(
            &self.fetcher,
            operation,
            request,
            batch_size,
            &handle,
            |update: &ProgressUpdate<'_>| self.record_progress(&run_id, update),
        )
        .await;
        self.gate.remove(&run_id);

        let (phase, message) = match outcome {
            Ok(_) => {
                self.metrics
                    .runs_completed_total
                    .fetch_add(1, Ordering::Relaxed);
                (RunPhase::Completed, None)
            }
            Err(err) if err.is_cancelled() => {
                self.metrics
                    .runs_cancelled_total
                    .fetch_add(1, Ordering::Relaxed);
                (RunPhase::Cancelled, None)
            }
            Err(err) => {
                self.metrics
                    .runs_failed_total
                    .fetch_add(1, Ordering::Relaxed);
                warn!("{} run_id={} failed: {err}", category_batch(), run_id);
                (RunPhase::Failed, Some(err.to_string()))
            }
        };

        let mut guard = self.runs.write().expect("run registry lock poisoned");
        if let Some(record) = guard.get_mut(&run_id) {
            let now = now_unix_ms();
            record.snapshot.phase = phase;
            record.snapshot.message = message;
            record.snapshot.totals.has_more = false;
            record.snapshot.updated_unix_ms = now;
            record.snapshot.finished_unix_ms = Some(now);
            record.finished_seq = Some(self.finished_seq.fetch_add(1, Ordering::Relaxed));
            info!(
                "{} run_id={} {} successful={} failed={} pages={}",
                category_batch(),
                run_id,
                phase_label(phase),
                record.snapshot.totals.successful,
                record.snapshot.totals.failed,
                record.snapshot.totals.pages
            );
        }
        let pruned = prune_finished(&mut guard, self.finished_run_limit);
        if pruned > 0 {
            self.metrics
                .runs_pruned_total
                .fetch_add(pruned as u64, Ordering::Relaxed);
        }
    }

    fn record_progress(&self, run_id: &RunId, update: &ProgressUpdate<'_>) {
        self.metrics
            .pages_folded_total
            .fetch_add(1, Ordering::Relaxed);
        let mut guard = self.runs.write().expect("run registry lock poisoned");
        if let Some(record) = guard.get_mut(run_id) {
            record.snapshot.totals.fold(update.page);
            record.snapshot.updated_unix_ms = now_unix_ms();
        }
    }

    fn observed(&self, mut snapshot: RunSnapshot) -> RunSnapshot {
        if snapshot.phase == RunPhase::Running && self.gate.is_paused(&snapshot.run_id) {
            snapshot.phase = RunPhase::Paused;
        }
        snapshot
    }
}

/// Drops the oldest finished runs beyond `limit`. Active runs are never pruned.
fn prune_finished(runs: &mut HashMap<RunId, RunRecord>, limit: usize) -> usize {
    let mut finished = runs
        .iter()
        .filter_map(|(run_id, record)| record.finished_seq.map(|seq| (seq, run_id.clone())))
        .collect::<Vec<_>>();
    if finished.len() <= limit {
        return 0;
    }
    finished.sort_unstable();
    let excess = finished.len() - limit;
    for (_, run_id) in finished.into_iter().take(excess) {
        runs.remove(&run_id);
    }
    excess
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use bulk::{FilterClause, PageResult};

    use super::*;

    struct QueueFetcher {
        pages: Mutex<VecDeque<Option<PageResult>>>,
        hold: tokio::sync::Semaphore,
    }

    impl QueueFetcher {
        fn new(pages: Vec<Option<PageResult>>, permits: usize) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                hold: tokio::sync::Semaphore::new(permits),
            }
        }
    }

    impl PageFetcher for QueueFetcher {
        async fn fetch_page(
            &self,
            _operation: OperationKind,
            _request: &BatchRequest,
            _page_size: u32,
        ) -> Result<Option<PageResult>, BatchError> {
            self.hold
                .acquire()
                .await
                .expect("semaphore should stay open")
                .forget();
            Ok(self.pages.lock().expect("lock").pop_front().flatten())
        }
    }

    fn page(successful: u64, cursor: Option<&str>) -> Option<PageResult> {
        Some(PageResult {
            successful,
            failed: 0,
            failed_invocation_ids: Vec::new(),
            has_more: cursor.is_some(),
            last_created_at: cursor.map(ToString::to_string),
        })
    }

    fn filter_run(operation: OperationKind) -> StartRun {
        StartRun {
            operation,
            request: BatchRequest::by_filters(vec![FilterClause::new().with("status", "running")]),
            batch_size: None,
        }
    }

    #[tokio::test]
    async fn completed_run_reports_cumulative_totals() {
        let controller = RunController::new(
            QueueFetcher::new(vec![page(5, Some("c1")), page(3, None)], 10),
            5,
        );
        let snapshot = controller
            .start(filter_run(OperationKind::Purge))
            .expect("run should start");
        assert_eq!(snapshot.phase, RunPhase::Running);
        assert_eq!(snapshot.batch_size, 5);

        let finished = controller
            .wait(&snapshot.run_id)
            .await
            .expect("run should be known");
        assert_eq!(finished.phase, RunPhase::Completed);
        assert_eq!(finished.totals.successful, 8);
        assert_eq!(finished.totals.pages, 2);
        assert!(finished.finished_unix_ms.is_some());
        assert!(controller.metrics_text().contains("bulk_console_runs_completed_total 1\n"));
    }

    #[tokio::test]
    async fn invalid_run_is_rejected_without_registration() {
        let controller = RunController::new(QueueFetcher::new(Vec::new(), 0), 5);
        let err = controller
            .start(StartRun {
                batch_size: Some(0),
                ..filter_run(OperationKind::Cancel)
            })
            .expect_err("zero batch size should be rejected");
        assert!(matches!(err, BatchError::InvalidRequest(_)));
        assert!(controller.list().is_empty());
    }

    #[tokio::test]
    async fn paused_run_shows_paused_phase_and_cancels() {
        let controller = RunController::new(
            QueueFetcher::new(vec![page(1, Some("c1")), page(1, None)], 0),
            1,
        );
        let snapshot = controller
            .start(filter_run(OperationKind::Cancel))
            .expect("run should start");
        let run_id = snapshot.run_id.clone();

        let paused = controller.pause(&run_id).expect("run should be known");
        assert!(paused.accepted);
        assert_eq!(paused.phase, RunPhase::Paused);
        assert_eq!(
            controller.snapshot(&run_id).expect("snapshot").phase,
            RunPhase::Paused
        );

        controller.shared.fetcher.hold.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cancelled = controller.cancel(&run_id).expect("run should be known");
        assert!(cancelled.accepted);

        let finished = controller.wait(&run_id).await.expect("run should be known");
        assert_eq!(finished.phase, RunPhase::Cancelled);
        assert_eq!(finished.totals.successful, 1);
        assert!(!controller.is_paused(&run_id));

        let late = controller.resume(&run_id).expect("run should be known");
        assert!(!late.accepted);
        assert_eq!(late.phase, RunPhase::Cancelled);
    }

    #[tokio::test]
    async fn shutdown_force_resumes_paused_runs() {
        let controller = RunController::new(
            QueueFetcher::new(vec![page(2, Some("c1")), page(2, None)], 10),
            1,
        );
        let snapshot = controller
            .start(filter_run(OperationKind::Resume))
            .expect("run should start");
        controller.pause(&snapshot.run_id);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.shutdown(), 1);

        let finished = controller
            .wait(&snapshot.run_id)
            .await
            .expect("run should be known");
        assert_eq!(finished.phase, RunPhase::Completed);
        assert_eq!(finished.totals.successful, 4);
    }

    #[tokio::test]
    async fn unknown_run_controls_return_none() {
        let controller = RunController::new(QueueFetcher::new(Vec::new(), 0), 1);
        let run_id = RunId::from("nope");
        assert!(controller.pause(&run_id).is_none());
        assert!(controller.snapshot(&run_id).is_none());
        assert!(controller.wait(&run_id).await.is_none());
    }

    fn failing(successful: u64, ids: &[&str], cursor: Option<&str>) -> Option<PageResult> {
        Some(PageResult {
            successful,
            failed: ids.len() as u64,
            failed_invocation_ids: ids.iter().map(|id| id.to_string()).collect(),
            has_more: cursor.is_some(),
            last_created_at: cursor.map(ToString::to_string),
        })
    }

    fn id_run(operation: OperationKind) -> StartRun {
        StartRun {
            operation,
            request: BatchRequest::by_ids(["inv_1", "inv_2"]),
            batch_size: None,
        }
    }

    #[tokio::test]
    async fn snapshot_totals_track_failed_ids_across_pages() {
        let controller = RunController::new(
            QueueFetcher::new(
                vec![
                    failing(2, &["inv_a", "inv_b"], Some("c1")),
                    failing(1, &["inv_c"], Some("c2")),
                    failing(4, &[], None),
                ],
                10,
            ),
            3,
        );
        let snapshot = controller
            .start(filter_run(OperationKind::Kill))
            .expect("run should start");

        let finished = controller
            .wait(&snapshot.run_id)
            .await
            .expect("run should be known");
        assert_eq!(finished.totals.successful, 7);
        assert_eq!(finished.totals.failed, 3);
        assert_eq!(
            finished.totals.failed_invocation_ids,
            vec!["inv_a", "inv_b", "inv_c"]
        );
        assert_eq!(finished.totals.pages, 3);
        assert_eq!(finished.totals.last_created_at.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn pause_is_refused_for_explicit_id_runs() {
        let controller = RunController::new(QueueFetcher::new(vec![page(2, None)], 0), 5);
        let snapshot = controller
            .start(id_run(OperationKind::Kill))
            .expect("run should start");

        let paused = controller
            .pause(&snapshot.run_id)
            .expect("run should be known");
        assert!(!paused.accepted);
        assert!(!paused.paused);
        assert_eq!(paused.phase, RunPhase::Running);

        controller.shared.fetcher.hold.add_permits(1);
        let finished = controller
            .wait(&snapshot.run_id)
            .await
            .expect("run should be known");
        assert_eq!(finished.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn finished_runs_beyond_the_limit_are_pruned() {
        let pages = (0..5).map(|_| page(1, None)).collect::<Vec<_>>();
        let controller = RunController::with_finished_run_limit(QueueFetcher::new(pages, 10), 5, 2);

        let mut run_ids = Vec::new();
        for _ in 0..5 {
            let snapshot = controller
                .start(id_run(OperationKind::Purge))
                .expect("run should start");
            let finished = controller
                .wait(&snapshot.run_id)
                .await
                .expect("latest finished run should be retained");
            assert_eq!(finished.phase, RunPhase::Completed);
            run_ids.push(snapshot.run_id);
        }

        let retained = controller.list();
        assert_eq!(retained.len(), 2);
        assert!(controller.snapshot(&run_ids[0]).is_none());
        assert!(controller.snapshot(&run_ids[3]).is_some());
        assert!(controller.snapshot(&run_ids[4]).is_some());
        let metrics = controller.metrics_text();
        assert!(metrics.contains("bulk_console_retained_runs 2\n"));
        assert!(metrics.contains("bulk_console_runs_pruned_total 3\n"));
    }

    #[tokio::test]
    async fn remove_forgets_finished_runs_and_refuses_active_ones() {
        let controller = RunController::new(QueueFetcher::new(vec![page(1, None)], 0), 5);
        let snapshot = controller
            .start(id_run(OperationKind::Cancel))
            .expect("run should start");

        let err = controller
            .remove(&snapshot.run_id)
            .expect_err("active run should not be removable");
        assert!(matches!(err, BatchError::InvalidRequest(_)));

        controller.shared.fetcher.hold.add_permits(1);
        controller
            .wait(&snapshot.run_id)
            .await
            .expect("run should be known");
        let removed = controller
            .remove(&snapshot.run_id)
            .expect("finished run should be removable")
            .expect("run should be known");
        assert_eq!(removed.phase, RunPhase::Completed);
        assert!(controller.list().is_empty());
        assert!(
            controller
                .remove(&snapshot.run_id)
                .expect("unknown run is not an error")
                .is_none()
        );
    }

    #[tokio::test]
    async fn dropping_the_controller_force_resumes_its_paused_runs() {
        let controller = RunController::new(
            QueueFetcher::new(vec![page(2, Some("c1")), page(2, None)], 10),
            1,
        );
        let snapshot = controller
            .start(filter_run(OperationKind::Cancel))
            .expect("run should start");
        let shared = controller.shared.clone();
        let handle = shared
            .gate
            .handle(&snapshot.run_id)
            .expect("run should hold a pause handle");
        assert!(
            controller
                .pause(&snapshot.run_id)
                .expect("run should be known")
                .accepted
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_paused());

        drop(controller);
        assert!(!handle.is_paused());
        assert!(!handle.is_cancelled());
        assert!(shared.gate.is_empty());

        let mut done = shared
            .runs
            .read()
            .expect("lock")
            .get(&snapshot.run_id)
            .expect("run should be known")
            .done
            .clone();
        tokio::time::timeout(Duration::from_secs(2), done.wait_for(|finished| *finished))
            .await
            .expect("walk should finish after teardown")
            .expect("done flag should stay open");
        let guard = shared.runs.read().expect("lock");
        let record = guard.get(&snapshot.run_id).expect("run should be known");
        assert_eq!(record.snapshot.phase, RunPhase::Completed);
        assert_eq!(record.snapshot.totals.successful, 4);
    }
}
