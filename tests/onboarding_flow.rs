//! End-to-end tests for the parallel onboarding sync workflow.
//!
//! These drive the orchestrator against the in-memory repository and
//! configurable importer doubles, covering terminal-status convergence,
//! failure isolation, cooperative cancellation and the retry contract.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use storesync::{
    ImportError, ImportOutcome, Importer, ImporterSet, InMemoryStoreRepository,
    OnboardingOrchestrator, OrchestratorConfig, OverallSyncStatus, PhaseStatusKind, Store,
    StoreRepository, SyncEvent, SyncPhase, SyncStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configurable importer double. Optionally signals when a call begins and
/// parks until released, so tests can hold a phase mid-flight.
#[derive(Default)]
struct MockImporter {
    records: u64,
    status: Option<String>,
    fail_with: Option<String>,
    started: Option<Arc<Notify>>,
    release: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl MockImporter {
    fn succeeding(records: u64) -> Arc<Self> {
        Arc::new(Self {
            records,
            ..Default::default()
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        })
    }

    fn gated(records: u64) -> (Arc<Self>, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let importer = Arc::new(Self {
            records,
            started: Some(Arc::clone(&started)),
            release: Some(Arc::clone(&release)),
            ..Default::default()
        });
        (importer, started, release)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Importer for MockImporter {
    async fn run(&self, _store_id: Uuid) -> Result<ImportOutcome, ImportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(started) = &self.started {
            started.notify_one();
        }
        if let Some(release) = &self.release {
            release.notified().await;
        }
        if let Some(message) = &self.fail_with {
            return Err(ImportError::Api(message.clone()));
        }
        let mut outcome = ImportOutcome::records(self.records);
        if let Some(status) = &self.status {
            outcome = outcome.with_status(status.clone());
        }
        Ok(outcome)
    }
}

/// The seven doubles, all succeeding unless a test swaps one out.
struct Mocks {
    products: Arc<MockImporter>,
    historical: Arc<MockImporter>,
    financial: Arc<MockImporter>,
    gap: Arc<MockImporter>,
    commissions: Arc<MockImporter>,
    returns: Arc<MockImporter>,
    qa: Arc<MockImporter>,
}

impl Default for Mocks {
    fn default() -> Self {
        Self {
            products: MockImporter::succeeding(25),
            historical: Arc::new(MockImporter {
                records: 1200,
                status: Some("COMPLETED".to_string()),
                ..Default::default()
            }),
            financial: MockImporter::succeeding(310),
            gap: MockImporter::succeeding(4),
            commissions: MockImporter::succeeding(96),
            returns: MockImporter::succeeding(18),
            qa: MockImporter::succeeding(42),
        }
    }
}

impl Mocks {
    fn importer_set(&self) -> ImporterSet {
        ImporterSet {
            products: self.products.clone(),
            historical: self.historical.clone(),
            financial: self.financial.clone(),
            gap: self.gap.clone(),
            commissions: self.commissions.clone(),
            returns: self.returns.clone(),
            qa: self.qa.clone(),
        }
    }
}

fn rig(mocks: &Mocks) -> (Arc<InMemoryStoreRepository>, OnboardingOrchestrator, Uuid) {
    let repo = Arc::new(InMemoryStoreRepository::new());
    let store_id = Uuid::new_v4();
    repo.insert(Store::new(store_id, "Test Storefront"));
    let orchestrator = OnboardingOrchestrator::new(
        repo.clone(),
        mocks.importer_set(),
        OrchestratorConfig::default(),
    );
    (repo, orchestrator, store_id)
}

async fn wait_for_terminal(repo: &InMemoryStoreRepository, store_id: Uuid) -> Store {
    for _ in 0..500 {
        if let Some(store) = repo.find(store_id).await.unwrap()
            && store.overall_sync_status.is_some_and(|s| s.is_terminal())
        {
            return store;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached a terminal sync status");
}

async fn wait_for_overall(
    repo: &InMemoryStoreRepository,
    store_id: Uuid,
    expected: OverallSyncStatus,
) -> Store {
    for _ in 0..500 {
        if let Some(store) = repo.find(store_id).await.unwrap()
            && store.overall_sync_status == Some(expected)
        {
            return store;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached {:?}", expected);
}

async fn wait_for_phase(
    repo: &InMemoryStoreRepository,
    store_id: Uuid,
    phase: SyncPhase,
    expected: PhaseStatusKind,
) {
    for _ in 0..500 {
        if let Some(store) = repo.find(store_id).await.unwrap()
            && store
                .sync_phases
                .as_ref()
                .is_some_and(|b| b.status_of(phase) == expected)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("phase {} never reached {:?}", phase, expected);
}

fn phase_status(store: &Store, phase: SyncPhase) -> PhaseStatusKind {
    store
        .sync_phases
        .as_ref()
        .map(|b| b.status_of(phase))
        .unwrap_or(PhaseStatusKind::Pending)
}

#[tokio::test]
async fn all_phases_succeed_end_to_end() {
    init_tracing();
    let mocks = Mocks::default();
    let (repo, orchestrator, store_id) = rig(&mocks);

    orchestrator.start_onboarding(store_id);
    let store = wait_for_terminal(&repo, store_id).await;

    assert_eq!(store.overall_sync_status, Some(OverallSyncStatus::Completed));
    assert_eq!(store.sync_status, Some(SyncStatus::Completed));
    assert!(store.initial_sync_completed);
    assert!(store.sync_error_message.is_none());
    for phase in SyncPhase::ALL {
        assert_eq!(phase_status(&store, phase), PhaseStatusKind::Completed);
    }

    // Historical importer bookkeeping lands on the record.
    assert_eq!(store.historical_sync_status.as_deref(), Some("COMPLETED"));
    assert!(store.historical_sync_date.is_some());

    let progress = orchestrator.progress(store_id).await.unwrap();
    assert_eq!(progress.percentage, 100.0);

    for mock in [
        &mocks.products,
        &mocks.historical,
        &mocks.financial,
        &mocks.gap,
        &mocks.commissions,
        &mocks.returns,
        &mocks.qa,
    ] {
        assert_eq!(mock.calls(), 1);
    }
}

#[tokio::test]
async fn historical_failure_yields_partial_complete_and_the_chain_continues() {
    init_tracing();
    let mocks = Mocks {
        historical: MockImporter::failing("settlement endpoint returned 502"),
        ..Default::default()
    };
    let (repo, orchestrator, store_id) = rig(&mocks);

    orchestrator.start_onboarding(store_id);
    let store = wait_for_terminal(&repo, store_id).await;

    assert_eq!(
        store.overall_sync_status,
        Some(OverallSyncStatus::PartialComplete)
    );
    assert_eq!(store.sync_status, Some(SyncStatus::PartialComplete));
    assert!(store.initial_sync_completed);

    let board = store.sync_phases.as_ref().unwrap();
    assert_eq!(board.status_of(SyncPhase::Historical), PhaseStatusKind::Failed);
    let message = board
        .get(SyncPhase::Historical)
        .unwrap()
        .error_message
        .clone()
        .unwrap();
    assert!(message.contains("settlement endpoint returned 502"));

    // The chain proceeded past the failure.
    for phase in [SyncPhase::Financial, SyncPhase::Gap, SyncPhase::Commissions] {
        assert_eq!(board.status_of(phase), PhaseStatusKind::Completed);
    }
    assert_eq!(mocks.financial.calls(), 1);
    assert_eq!(mocks.gap.calls(), 1);
    assert_eq!(mocks.commissions.calls(), 1);
    assert_eq!(board.status_of(SyncPhase::Returns), PhaseStatusKind::Completed);
    assert_eq!(board.status_of(SyncPhase::Qa), PhaseStatusKind::Completed);
}

#[tokio::test]
async fn fatal_products_failure_aborts_the_run_and_leaves_products_active() {
    init_tracing();
    let mocks = Mocks {
        products: MockImporter::failing("catalog API unreachable"),
        ..Default::default()
    };
    let (repo, orchestrator, store_id) = rig(&mocks);

    orchestrator.start_onboarding(store_id);
    let store = wait_for_terminal(&repo, store_id).await;

    assert_eq!(store.overall_sync_status, Some(OverallSyncStatus::Failed));
    assert_eq!(store.sync_status, Some(SyncStatus::Failed));
    assert!(!store.initial_sync_completed);
    assert!(
        store
            .sync_error_message
            .as_deref()
            .unwrap()
            .contains("catalog API unreachable")
    );

    // The catalog phase is never marked FAILED: the run dies with the
    // entry still ACTIVE and nothing downstream ever starts.
    assert_eq!(phase_status(&store, SyncPhase::Products), PhaseStatusKind::Active);
    for phase in [
        SyncPhase::Historical,
        SyncPhase::Financial,
        SyncPhase::Gap,
        SyncPhase::Commissions,
        SyncPhase::Returns,
        SyncPhase::Qa,
    ] {
        assert_eq!(phase_status(&store, phase), PhaseStatusKind::Pending);
    }
    assert_eq!(mocks.historical.calls(), 0);
    assert_eq!(mocks.returns.calls(), 0);
    assert_eq!(mocks.qa.calls(), 0);
}

#[tokio::test]
async fn cancellation_during_products_skips_the_entire_fan_out() {
    init_tracing();
    let (products, started, release) = MockImporter::gated(25);
    let mocks = Mocks {
        products,
        ..Default::default()
    };
    let (repo, orchestrator, store_id) = rig(&mocks);

    orchestrator.start_onboarding(store_id);
    started.notified().await;

    // The catalog import is mid-flight; cancelling now must not preempt
    // it, only stop the phases that come after.
    orchestrator.request_cancel(store_id);
    release.notify_one();

    let store = wait_for_terminal(&repo, store_id).await;
    assert_eq!(store.overall_sync_status, Some(OverallSyncStatus::Cancelled));
    assert_eq!(store.sync_status, Some(SyncStatus::Cancelled));
    assert!(store.initial_sync_completed);

    assert_eq!(phase_status(&store, SyncPhase::Products), PhaseStatusKind::Completed);
    for phase in SyncPhase::CRITICAL_CHAIN {
        assert_eq!(phase_status(&store, phase), PhaseStatusKind::Pending);
    }
    assert_eq!(phase_status(&store, SyncPhase::Returns), PhaseStatusKind::Pending);
    assert_eq!(phase_status(&store, SyncPhase::Qa), PhaseStatusKind::Pending);
    assert_eq!(mocks.historical.calls(), 0);
    assert_eq!(mocks.returns.calls(), 0);
    assert_eq!(mocks.qa.calls(), 0);

    let progress = orchestrator.progress(store_id).await.unwrap();
    assert_eq!(progress.percentage, 10.0);
}

#[tokio::test]
async fn cancellation_does_not_preempt_an_active_phase() {
    init_tracing();
    let (historical, started, release) = MockImporter::gated(1200);
    let mocks = Mocks {
        historical,
        ..Default::default()
    };
    let (repo, orchestrator, store_id) = rig(&mocks);

    orchestrator.start_onboarding(store_id);
    started.notified().await;

    // Let the independent tasks drain first so the flag can only affect
    // the chain.
    wait_for_phase(&repo, store_id, SyncPhase::Returns, PhaseStatusKind::Completed).await;
    wait_for_phase(&repo, store_id, SyncPhase::Qa, PhaseStatusKind::Completed).await;

    orchestrator.request_cancel(store_id);
    release.notify_one();

    let store = wait_for_terminal(&repo, store_id).await;
    assert_eq!(store.overall_sync_status, Some(OverallSyncStatus::Cancelled));

    // The in-flight phase ran to completion; the boundary check stopped
    // everything after it.
    assert_eq!(phase_status(&store, SyncPhase::Historical), PhaseStatusKind::Completed);
    for phase in [SyncPhase::Financial, SyncPhase::Gap, SyncPhase::Commissions] {
        assert_eq!(phase_status(&store, phase), PhaseStatusKind::Pending);
    }
    assert_eq!(mocks.financial.calls(), 0);
    assert_eq!(mocks.gap.calls(), 0);
    assert_eq!(mocks.commissions.calls(), 0);
    assert_eq!(phase_status(&store, SyncPhase::Returns), PhaseStatusKind::Completed);
    assert_eq!(phase_status(&store, SyncPhase::Qa), PhaseStatusKind::Completed);
}

/// Importer that records overlapping executions through a shared flag.
struct ChainProbe {
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

#[async_trait]
impl Importer for ChainProbe {
    async fn run(&self, _store_id: Uuid) -> Result<ImportOutcome, ImportError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.busy.store(false, Ordering::SeqCst);
        Ok(ImportOutcome::records(1))
    }
}

#[tokio::test]
async fn chain_phases_never_overlap() {
    init_tracing();
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let probe = |busy: &Arc<AtomicBool>, overlaps: &Arc<AtomicUsize>| -> Arc<dyn Importer> {
        Arc::new(ChainProbe {
            busy: Arc::clone(busy),
            overlaps: Arc::clone(overlaps),
        })
    };

    let defaults = Mocks::default();
    let importers = ImporterSet {
        products: defaults.products.clone(),
        historical: probe(&busy, &overlaps),
        financial: probe(&busy, &overlaps),
        gap: probe(&busy, &overlaps),
        commissions: probe(&busy, &overlaps),
        returns: defaults.returns.clone(),
        qa: defaults.qa.clone(),
    };

    let repo = Arc::new(InMemoryStoreRepository::new());
    let store_id = Uuid::new_v4();
    repo.insert(Store::new(store_id, "Chain Store"));
    let orchestrator =
        OnboardingOrchestrator::new(repo.clone(), importers, OrchestratorConfig::default());

    orchestrator.start_onboarding(store_id);
    let store = wait_for_terminal(&repo, store_id).await;

    assert_eq!(store.overall_sync_status, Some(OverallSyncStatus::Completed));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_is_rejected_while_a_sync_is_in_progress() {
    let mocks = Mocks::default();
    let (repo, orchestrator, store_id) = rig(&mocks);

    let mut store = repo.find(store_id).await.unwrap().unwrap();
    store.overall_sync_status = Some(OverallSyncStatus::InProgress);
    repo.save(&store).await.unwrap();

    let result = orchestrator.retry(store_id).await;
    assert!(matches!(result, Err(storesync::RetryError::InProgress(_))));
    assert_eq!(mocks.products.calls(), 0);
}

#[tokio::test]
async fn retry_is_rejected_when_the_legacy_status_is_in_flight() {
    let mocks = Mocks::default();
    let (repo, orchestrator, store_id) = rig(&mocks);

    let mut store = repo.find(store_id).await.unwrap().unwrap();
    store.overall_sync_status = None;
    store.sync_status = Some(SyncStatus::SyncingHistorical);
    repo.save(&store).await.unwrap();

    let result = orchestrator.retry(store_id).await;
    assert!(matches!(result, Err(storesync::RetryError::InProgress(_))));
}

#[tokio::test]
async fn retry_is_rejected_after_a_completed_initial_sync() {
    let mocks = Mocks::default();
    let (repo, orchestrator, store_id) = rig(&mocks);

    let mut store = repo.find(store_id).await.unwrap().unwrap();
    store.overall_sync_status = Some(OverallSyncStatus::Completed);
    store.initial_sync_completed = true;
    repo.save(&store).await.unwrap();

    let result = orchestrator.retry(store_id).await;
    assert!(matches!(
        result,
        Err(storesync::RetryError::AlreadyCompleted(_))
    ));
}

#[tokio::test]
async fn retry_is_rejected_for_an_unknown_store() {
    let mocks = Mocks::default();
    let (_repo, orchestrator, _store_id) = rig(&mocks);

    let result = orchestrator.retry(Uuid::new_v4()).await;
    assert!(matches!(
        result,
        Err(storesync::RetryError::StoreNotFound(_))
    ));
}

#[tokio::test]
async fn retry_from_partial_complete_reruns_with_a_fresh_board() {
    init_tracing();
    let mocks = Mocks::default();
    let (repo, orchestrator, store_id) = rig(&mocks);

    // Leave behind the state of an earlier partially-failed run.
    let mut store = repo.find(store_id).await.unwrap().unwrap();
    let mut board = storesync::PhaseBoard::new();
    board.apply(SyncPhase::Products, storesync::PhaseState::completed());
    board.apply(SyncPhase::Historical, storesync::PhaseState::failed("old failure"));
    store.sync_phases = Some(board);
    store.overall_sync_status = Some(OverallSyncStatus::PartialComplete);
    store.sync_status = Some(SyncStatus::PartialComplete);
    store.initial_sync_completed = true;
    repo.save(&store).await.unwrap();

    orchestrator.retry(store_id).await.unwrap();
    let store = wait_for_overall(&repo, store_id, OverallSyncStatus::Completed).await;

    let board = store.sync_phases.as_ref().unwrap();
    for phase in SyncPhase::ALL {
        assert_eq!(board.status_of(phase), PhaseStatusKind::Completed);
    }
    assert!(board.get(SyncPhase::Historical).unwrap().error_message.is_none());
    assert_eq!(store.sync_status, Some(SyncStatus::Completed));
}

/// Historical importer that parks only for one specific store.
struct HangFor {
    target: Uuid,
    release: Arc<Notify>,
}

#[async_trait]
impl Importer for HangFor {
    async fn run(&self, store_id: Uuid) -> Result<ImportOutcome, ImportError> {
        if store_id == self.target {
            self.release.notified().await;
        }
        Ok(ImportOutcome::records(10))
    }
}

#[tokio::test]
async fn concurrent_stores_never_block_each_other() {
    init_tracing();
    let repo = Arc::new(InMemoryStoreRepository::new());
    let store_a = Uuid::new_v4();
    let store_b = Uuid::new_v4();
    repo.insert(Store::new(store_a, "Store A"));
    repo.insert(Store::new(store_b, "Store B"));

    let release_a = Arc::new(Notify::new());
    let defaults = Mocks::default();
    let importers = ImporterSet {
        historical: Arc::new(HangFor {
            target: store_a,
            release: Arc::clone(&release_a),
        }),
        products: defaults.products.clone(),
        financial: defaults.financial.clone(),
        gap: defaults.gap.clone(),
        commissions: defaults.commissions.clone(),
        returns: defaults.returns.clone(),
        qa: defaults.qa.clone(),
    };

    let orchestrator =
        OnboardingOrchestrator::new(repo.clone(), importers, OrchestratorConfig::default());

    orchestrator.start_onboarding(store_a);
    wait_for_phase(&repo, store_a, SyncPhase::Historical, PhaseStatusKind::Active).await;

    // Store B runs to completion while store A sits mid-chain.
    orchestrator.start_onboarding(store_b);
    let store = wait_for_terminal(&repo, store_b).await;
    assert_eq!(store.overall_sync_status, Some(OverallSyncStatus::Completed));

    let still_running = repo.find(store_a).await.unwrap().unwrap();
    assert_eq!(
        still_running.overall_sync_status,
        Some(OverallSyncStatus::InProgress)
    );

    release_a.notify_one();
    let store = wait_for_terminal(&repo, store_a).await;
    assert_eq!(store.overall_sync_status, Some(OverallSyncStatus::Completed));
}

#[tokio::test]
async fn event_stream_reports_the_run_lifecycle() {
    init_tracing();
    let mocks = Mocks::default();
    let repo = Arc::new(InMemoryStoreRepository::new());
    let store_id = Uuid::new_v4();
    repo.insert(Store::new(store_id, "Event Store"));

    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = OnboardingOrchestrator::new(
        repo.clone(),
        mocks.importer_set(),
        OrchestratorConfig::default(),
    )
    .with_event_channel(tx);

    orchestrator.start_onboarding(store_id);

    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event stream stalled")
            .expect("event channel closed early");
        let finished = matches!(event, SyncEvent::RunFinished { .. });
        events.push(event);
        if finished {
            break;
        }
    }

    assert!(matches!(events.first(), Some(SyncEvent::RunStarted { .. })));
    for phase in SyncPhase::ALL {
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::PhaseCompleted { phase: p, .. } if *p == phase
        )));
    }
    assert!(matches!(
        events.last(),
        Some(SyncEvent::RunFinished {
            outcome: OverallSyncStatus::Completed,
            ..
        })
    ));
}
