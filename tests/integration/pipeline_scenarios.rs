//! End-to-end pipeline behaviour against in-process fakes.
//!
//! Each test wires an `Orchestrator` to a scripted backend, a recording draft
//! sink and either an in-memory or file-backed ledger and cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;

use draftpilot::budget::{
    BudgetConfig, DegradePolicy, LedgerError, LedgerFile, LedgerResult, LedgerStore,
    MemoryLedgerStore, ModelTier, Period, TierKind, TierSet, UsageLedger,
};
use draftpilot::cache::ContentCache;
use draftpilot::contacts::{ContactRecord, ContactSource, Importance, SourceError, SourceResult};
use draftpilot::drafts::{DraftRequest, DraftResult, DraftSink};
use draftpilot::generation::{
    BackendError, GenerationBackend, GenerationOutput, GenerationRequest, ParsedTokenUsage,
};
use draftpilot::pipeline::{
    ContactState, NoopObserver, Orchestrator, PipelineConfig, RunSummary, SkipReason,
};
use draftpilot::PipelineError;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Backend that bills a fixed amount per model and can be told to fail.
#[derive(Clone, Default)]
struct ScriptedBackend {
    calls: Arc<Mutex<Vec<GenerationRequest>>>,
    costs: HashMap<String, f64>,
    fail_when_prompt_contains: Option<String>,
}

impl ScriptedBackend {
    fn with_cost(mut self, model: &str, cost: f64) -> Self {
        self.costs.insert(model.to_string(), cost);
        self
    }

    fn failing_on(mut self, marker: &str) -> Self {
        self.fail_when_prompt_contains = Some(marker.to_string());
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    fn models_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .map(|r| r.model.clone())
            .collect()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        if let Some(marker) = &self.fail_when_prompt_contains {
            if request.prompt.contains(marker.as_str()) {
                return Err(BackendError::Api {
                    status: 503,
                    message: "model overloaded".to_string(),
                });
            }
        }

        let mut calls = self.calls.lock().expect("lock");
        calls.push(request.clone());
        Ok(GenerationOutput {
            text: format!("Email #{} from {}", calls.len(), request.model),
            usage: ParsedTokenUsage::actual(None, 100, "scripted"),
            reported_cost: self.costs.get(&request.model).copied(),
        })
    }
}

/// Sink that remembers every draft.
#[derive(Clone, Default)]
struct RecordingSink {
    drafts: Arc<Mutex<Vec<DraftRequest>>>,
}

impl RecordingSink {
    fn drafts(&self) -> Vec<DraftRequest> {
        self.drafts.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DraftSink for RecordingSink {
    async fn create_draft(&self, draft: &DraftRequest) -> DraftResult<String> {
        let mut drafts = self.drafts.lock().expect("lock");
        drafts.push(draft.clone());
        Ok(format!("draft-{}", drafts.len()))
    }
}

struct StaticSource(Vec<ContactRecord>);

#[async_trait]
impl ContactSource for StaticSource {
    async fn list_contacts(&self) -> SourceResult<Vec<ContactRecord>> {
        Ok(self.0.clone())
    }
}

struct OfflineSource;

#[async_trait]
impl ContactSource for OfflineSource {
    async fn list_contacts(&self) -> SourceResult<Vec<ContactRecord>> {
        Err(SourceError::Unavailable("spreadsheet not reachable".to_string()))
    }
}

/// Ledger store whose writes start failing after `successful_saves` saves.
#[derive(Clone)]
struct FlakyLedgerStore {
    inner: MemoryLedgerStore,
    saves: Arc<AtomicUsize>,
    successful_saves: usize,
}

impl FlakyLedgerStore {
    fn failing_after(successful_saves: usize) -> Self {
        Self {
            inner: MemoryLedgerStore::new(),
            saves: Arc::new(AtomicUsize::new(0)),
            successful_saves,
        }
    }
}

impl LedgerStore for FlakyLedgerStore {
    fn load(&self) -> LedgerResult<Option<LedgerFile>> {
        self.inner.load()
    }

    fn save(&self, ledger: &LedgerFile) -> LedgerResult<()> {
        let attempt = self.saves.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.successful_saves {
            return Err(LedgerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(ledger)
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const STANDARD_MODEL: &str = "small-model";
const PREMIUM_MODEL: &str = "large-model";

fn october() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).expect("date")
}

fn period(year: i32, month: u32) -> Period {
    Period::new(year, month).expect("period")
}

fn tiers(standard_estimate: f64, premium_estimate: f64) -> TierSet {
    TierSet::new(
        ModelTier::new(STANDARD_MODEL).with_estimated_cost(standard_estimate),
        ModelTier::new(PREMIUM_MODEL).with_estimated_cost(premium_estimate),
    )
}

fn vip(name: &str, context: &str) -> ContactRecord {
    ContactRecord::new(
        name,
        format!("{}@example.com", name.to_lowercase()),
        context,
        Importance::Vip,
    )
}

fn standard(name: &str, context: &str) -> ContactRecord {
    ContactRecord::new(
        name,
        format!("{}@example.com", name.to_lowercase()),
        context,
        Importance::Standard,
    )
}

fn orchestrator(
    config: PipelineConfig,
    ledger: UsageLedger,
    cache: ContentCache,
    backend: &ScriptedBackend,
    sink: &RecordingSink,
) -> Orchestrator {
    Orchestrator::new(
        config,
        ledger,
        cache,
        Box::new(backend.clone()),
        Box::new(sink.clone()),
    )
    .with_clock(october)
}

fn assert_accounting(summary: &RunSummary) {
    assert_eq!(
        summary.generated + summary.cache_hits + summary.skipped_budget + summary.skipped_error,
        summary.processed(),
        "every processed contact is counted exactly once"
    );
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scenario_a_third_vip_exceeds_budget() {
    let backend = ScriptedBackend::default().with_cost(PREMIUM_MODEL, 4.0);
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(3.0, 4.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(10.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts = vec![
        vip("Ann", "Renewal offer"),
        vip("Ben", "Keynote invite"),
        vip("Cat", "Board meeting"),
    ];

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    assert_eq!(summary.generated, 2);
    assert_eq!(summary.skipped_budget, 1);
    assert!((summary.run_cost - 8.0).abs() < 1e-9);
    assert!((summary.remaining_budget - 2.0).abs() < 1e-9);

    let third = &summary.outcomes[2];
    assert_eq!(third.state, ContactState::Skipped);
    match &third.skip_reason {
        Some(SkipReason::Budget(skip)) => {
            assert!(skip.to_string().contains("budget exceeded"));
        }
        other => panic!("expected budget skip, got {:?}", other),
    }

    assert_eq!(backend.models_called(), vec![PREMIUM_MODEL, PREMIUM_MODEL]);
    assert_eq!(sink.drafts().len(), 2);
    assert_eq!(orchestrator.ledger().usage(period(2026, 10)).expect("usage").calls_made, 2);
    assert_accounting(&summary);
}

#[tokio::test]
async fn test_scenario_b_second_run_hits_cache() {
    let temp_dir = TempDir::new().expect("temp dir");
    let ledger_path = temp_dir.path().join("api_usage.json");
    let cache_path = temp_dir.path().join("cache.json");
    let budget = BudgetConfig::default().with_monthly_limit(10.0);
    let config = PipelineConfig::default().with_tiers(tiers(0.5, 1.0));
    let contacts = vec![standard("Dan", "Quarterly check-in")];

    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 0.25);
    let sink = RecordingSink::default();

    let first = {
        let mut orchestrator = orchestrator(
            config.clone(),
            UsageLedger::open_file(budget.clone(), &ledger_path).expect("ledger"),
            ContentCache::open(&cache_path).expect("cache"),
            &backend,
            &sink,
        );
        orchestrator
            .run(&StaticSource(contacts.clone()))
            .await
            .expect("first run")
    };

    let mut orchestrator = orchestrator(
        config,
        UsageLedger::open_file(budget, &ledger_path).expect("ledger"),
        ContentCache::open(&cache_path).expect("cache"),
        &backend,
        &sink,
    );
    let second = orchestrator
        .run(&StaticSource(contacts))
        .await
        .expect("second run");

    assert_eq!(first.generated, 1);
    assert_eq!(second.generated, 0);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.run_cost, 0.0);
    assert_eq!(second.outcomes[0].state, ContactState::Drafted);
    assert_eq!(backend.call_count(), 1);

    let drafts = sink.drafts();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].body, drafts[1].body);

    let usage = orchestrator.ledger().usage(period(2026, 10)).expect("usage");
    assert_eq!(usage.calls_made, 1);
    assert!((usage.total_cost - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_scenario_c_backend_failure_is_skipped_without_charge() {
    let backend = ScriptedBackend::default()
        .with_cost(STANDARD_MODEL, 0.5)
        .failing_on("Broken request");
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(0.5, 1.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(10.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts = vec![
        standard("Xavier", "Broken request"),
        standard("Wendy", "Partnership follow-up"),
    ];

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    let failed = &summary.outcomes[0];
    assert_eq!(failed.state, ContactState::Skipped);
    assert_eq!(failed.cost, 0.0);
    assert!(matches!(failed.skip_reason, Some(SkipReason::BackendError(ref m)) if m.contains("503")));

    assert_eq!(summary.outcomes[1].state, ContactState::Drafted);
    assert_eq!(summary.skipped_error, 1);
    assert_eq!(summary.generated, 1);
    assert!(summary.halted.is_none());

    let usage = orchestrator.ledger().usage(period(2026, 10)).expect("usage");
    assert_eq!(usage.calls_made, 1);
    assert!((usage.total_cost - 0.5).abs() < 1e-9);
    assert!(orchestrator.cache().len() == 1);
    assert_accounting(&summary);
}

#[tokio::test]
async fn test_scenario_d_ledger_failure_halts_new_generation() {
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 0.5);
    let sink = RecordingSink::default();
    let ledger = UsageLedger::open(
        BudgetConfig::default().with_monthly_limit(10.0),
        Box::new(FlakyLedgerStore::failing_after(0)),
    )
    .expect("ledger");
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(0.5, 1.0)),
        ledger,
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts = vec![standard("Yara", "Launch recap"), standard("Zane", "Invoice query")];

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    let y = &summary.outcomes[0];
    assert_eq!(y.state, ContactState::Drafted);
    assert!((y.cost - 0.5).abs() < 1e-9);

    let z = &summary.outcomes[1];
    assert_eq!(z.state, ContactState::Skipped);
    assert_eq!(z.skip_reason, Some(SkipReason::PersistenceHalted));

    assert_eq!(backend.call_count(), 1);
    assert_eq!(sink.drafts().len(), 1);
    assert_eq!(sink.drafts()[0].to, "yara@example.com");

    let halted = summary.halted.as_deref().expect("halted");
    assert!(halted.contains("disk full"));
    assert!(summary.format().contains("HALTED"));

    // The charge is still held in memory for a later flush.
    assert!((orchestrator.ledger().spent(period(2026, 10)) - 0.5).abs() < 1e-9);
    assert_accounting(&summary);
}

#[tokio::test]
async fn test_cache_hits_are_served_after_halt() {
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 0.5);
    let sink = RecordingSink::default();
    let ledger = UsageLedger::open(
        BudgetConfig::default().with_monthly_limit(10.0),
        Box::new(FlakyLedgerStore::failing_after(0)),
    )
    .expect("ledger");
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(0.5, 1.0)),
        ledger,
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts = vec![
        standard("Yara", "Launch recap"),
        standard("Zane", "Invoice query"),
        standard("Yara", "Launch recap"),
    ];

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    assert_eq!(summary.generated, 1);
    assert_eq!(summary.skipped_error, 1);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(summary.outcomes[2].state, ContactState::Drafted);
    assert_eq!(backend.call_count(), 1);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rerun_makes_no_new_calls_or_charges() {
    let backend = ScriptedBackend::default()
        .with_cost(STANDARD_MODEL, 0.5)
        .with_cost(PREMIUM_MODEL, 1.0);
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(0.5, 1.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(10.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let source = StaticSource(vec![
        vip("Ann", "Renewal"),
        standard("Bob", "Catch up"),
        standard("Cal", "Welcome aboard"),
    ]);

    let first = orchestrator.run(&source).await.expect("first");
    let spent_after_first = orchestrator.ledger().spent(period(2026, 10));
    let calls_after_first = backend.call_count();

    let second = orchestrator.run(&source).await.expect("second");

    assert_eq!(first.generated, 3);
    assert_eq!(second.generated, 0);
    assert_eq!(second.cache_hits, 3);
    assert_eq!(second.run_cost, 0.0);
    assert_eq!(backend.call_count(), calls_after_first);
    assert_eq!(orchestrator.ledger().spent(period(2026, 10)), spent_after_first);
}

#[tokio::test]
async fn test_identical_email_and_context_generate_once() {
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 0.5);
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(0.5, 1.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(10.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts = vec![
        ContactRecord::new("Eve", "eve@example.com", "Contract renewal", Importance::Standard),
        ContactRecord::new("Eve", " EVE@example.com", "Contract  renewal ", Importance::Standard),
    ];

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    assert_eq!(backend.call_count(), 1);
    assert_eq!(summary.generated, 1);
    assert_eq!(summary.cache_hits, 1);
    let drafts = sink.drafts();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].body, drafts[1].body);
}

#[tokio::test]
async fn test_changed_context_regenerates() {
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 0.5);
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(0.5, 1.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(10.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );

    orchestrator
        .run(&StaticSource(vec![standard("Fay", "First draft")]))
        .await
        .expect("first");
    let summary = orchestrator
        .run(&StaticSource(vec![standard("Fay", "Revised context")]))
        .await
        .expect("second");

    assert_eq!(summary.generated, 1);
    assert_eq!(summary.cache_hits, 0);
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn test_overshoot_is_bounded_by_one_call() {
    // Actual cost exceeds the admission estimate, so the last admitted call
    // can push spend past the limit, but only once.
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 1.5);
    let sink = RecordingSink::default();
    let limit = 4.0;
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(1.0, 2.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(limit)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts: Vec<_> = (0..8)
        .map(|i| standard(&format!("User{}", i), &format!("Context {}", i)))
        .collect();

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    let spent = orchestrator.ledger().spent(period(2026, 10));
    assert_eq!(summary.generated, 3);
    assert_eq!(summary.skipped_budget, 5);
    assert!(spent <= limit + 1.5);
    assert_eq!(summary.remaining_budget, 0.0);
    assert_accounting(&summary);
}

#[tokio::test]
async fn test_estimate_only_tiers_are_charged_their_estimate() {
    // No per-token pricing and no cost from the backend: each call is
    // charged the configured per-call estimate.
    let backend = ScriptedBackend::default();
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(4.0, 4.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(10.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts: Vec<_> = (0..10)
        .map(|i| standard(&format!("Lead{}", i), &format!("Pitch {}", i)))
        .collect();

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    assert_eq!(summary.generated, 2);
    assert_eq!(summary.skipped_budget, 8);
    assert!((summary.run_cost - 8.0).abs() < 1e-9);
    assert!((orchestrator.ledger().spent(period(2026, 10)) - 8.0).abs() < 1e-9);
    assert!(summary.outcomes.iter().filter(|o| o.is_generated()).all(|o| o.cost == 4.0));
    assert_eq!(backend.call_count(), 2);
    assert_accounting(&summary);
}

#[tokio::test]
async fn test_mixed_run_accounting() {
    let backend = ScriptedBackend::default()
        .with_cost(STANDARD_MODEL, 1.0)
        .with_cost(PREMIUM_MODEL, 2.0)
        .failing_on("unreachable");
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default().with_tiers(tiers(1.0, 2.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(4.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts = vec![
        vip("Gus", "Strategy"),
        standard("Hal", "unreachable"),
        standard("Gus", "Strategy"),
        standard("Ida", "Intro"),
        vip("Jon", "Pricing"),
        standard("Kim", "Recap"),
    ];

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    // Gus premium (2.0), Hal fails, Gus cached, Ida standard (1.0),
    // Jon degraded to standard (1.0), Kim skipped with nothing left.
    assert_eq!(summary.generated, 3);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(summary.skipped_error, 1);
    assert_eq!(summary.skipped_budget, 1);
    assert_eq!(summary.degraded, 1);
    assert_eq!(summary.outcomes[4].tier, Some(TierKind::Standard));
    assert!((summary.run_cost - 4.0).abs() < 1e-9);
    assert_accounting(&summary);
}

#[tokio::test]
async fn test_skip_policy_refuses_degrade() {
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 1.0);
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default()
            .with_tiers(tiers(1.0, 5.0))
            .with_degrade_policy(DegradePolicy::Skip),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(3.0)),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );

    let summary = orchestrator
        .run(&StaticSource(vec![vip("Lea", "Gala invite"), standard("Max", "Hello")]))
        .await
        .expect("run");

    assert_eq!(summary.skipped_budget, 1);
    assert_eq!(summary.generated, 1);
    assert_eq!(backend.models_called(), vec![STANDARD_MODEL]);
}

#[tokio::test]
async fn test_batch_limit_leaves_rest_unprocessed() {
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 0.1);
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default()
            .with_tiers(tiers(0.1, 0.2))
            .with_batch_limit(2),
        UsageLedger::in_memory(BudgetConfig::default()),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );
    let contacts: Vec<_> = (0..5)
        .map(|i| standard(&format!("Row{}", i), "Same context"))
        .collect();

    let summary = orchestrator.run(&StaticSource(contacts)).await.expect("run");

    assert_eq!(summary.total_contacts, 5);
    assert_eq!(summary.processed(), 2);
    assert_eq!(summary.not_processed, 3);
    assert_eq!(backend.call_count(), 2);
    assert_accounting(&summary);
}

#[tokio::test]
async fn test_new_month_restores_budget() {
    let today = Arc::new(Mutex::new(
        NaiveDate::from_ymd_opt(2026, 10, 31).expect("date"),
    ));
    let clock_date = Arc::clone(&today);

    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 3.0);
    let sink = RecordingSink::default();
    let mut orchestrator = Orchestrator::new(
        PipelineConfig::default().with_tiers(tiers(3.0, 6.0)),
        UsageLedger::in_memory(BudgetConfig::default().with_monthly_limit(5.0)),
        ContentCache::in_memory(),
        Box::new(backend.clone()),
        Box::new(sink.clone()),
    )
    .with_clock(move || *clock_date.lock().expect("lock"));

    let october_run = orchestrator
        .run(&StaticSource(vec![standard("Ned", "One"), standard("Oli", "Two")]))
        .await
        .expect("october");
    assert_eq!(october_run.generated, 1);
    assert_eq!(october_run.skipped_budget, 1);
    assert_eq!(october_run.period, period(2026, 10));

    *today.lock().expect("lock") = NaiveDate::from_ymd_opt(2026, 11, 1).expect("date");

    let november_run = orchestrator
        .run(&StaticSource(vec![standard("Oli", "Two")]))
        .await
        .expect("november");
    assert_eq!(november_run.generated, 1);
    assert_eq!(november_run.period, period(2026, 11));
    assert!((november_run.remaining_budget - 2.0).abs() < 1e-9);

    let ledger = orchestrator.ledger();
    assert!((ledger.spent(period(2026, 10)) - 3.0).abs() < 1e-9);
    assert!((ledger.spent(period(2026, 11)) - 3.0).abs() < 1e-9);
    assert!(sink.drafts()[1].subject.ends_with("2026-11-01"));
}

#[tokio::test]
async fn test_source_failure_is_reported() {
    let backend = ScriptedBackend::default();
    let sink = RecordingSink::default();
    let mut orchestrator = orchestrator(
        PipelineConfig::default(),
        UsageLedger::in_memory(BudgetConfig::default()),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );

    let result = orchestrator.run(&OfflineSource).await;

    assert!(matches!(result, Err(PipelineError::SourceUnavailable(_))));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_draft_subject_uses_prefix_and_date() {
    let backend = ScriptedBackend::default().with_cost(STANDARD_MODEL, 0.1);
    let sink = RecordingSink::default();
    let mut config = PipelineConfig::default().with_tiers(tiers(0.1, 0.2));
    config.subject_prefix = "Follow-up".to_string();
    let mut orchestrator = orchestrator(
        config,
        UsageLedger::in_memory(BudgetConfig::default()),
        ContentCache::in_memory(),
        &backend,
        &sink,
    );

    let summary = orchestrator
        .process(&[standard("Pia", "Demo recap")], &mut NoopObserver)
        .await;

    assert_eq!(summary.outcomes[0].draft_id.as_deref(), Some("draft-1"));
    let drafts = sink.drafts();
    assert_eq!(drafts[0].to, "pia@example.com");
    assert_eq!(drafts[0].subject, "Follow-up for Pia - 2026-10-18");
    assert_eq!(drafts[0].body, "Email #1 from small-model");
}
