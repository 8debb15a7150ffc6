//! Per-contact generation pipeline.
//!
//! Contacts are processed one at a time in source order. For each one the
//! orchestrator consults the cache, then the ledger and selector, calls the
//! backend, records the charge, caches the content, and saves a draft.

use chrono::{NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use super::summary::{generate_run_id, ContactOutcome, ContactState, RunSummary, SkipReason};
use crate::budget::{Charge, DegradePolicy, ModelSelector, Period, Selection, TierSet, UsageLedger};
use crate::cache::{ContentCache, Fingerprint, GeneratedContent};
use crate::contacts::{ContactRecord, ContactSource};
use crate::drafts::{DraftRequest, DraftSink};
use crate::error::{PersistenceError, PipelineResult};
use crate::generation::{GenerationBackend, GenerationRequest};

/// Settings the orchestrator needs, injected at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub tiers: TierSet,
    pub on_degrade: DegradePolicy,
    pub temperature: f32,
    /// Subject is `"<prefix> for <first_name> - <date>"`
    pub subject_prefix: String,
    /// Maximum contacts per run
    pub batch_limit: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiers: TierSet::default(),
            on_degrade: DegradePolicy::default(),
            temperature: 0.7,
            subject_prefix: "Email".to_string(),
            batch_limit: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_tiers(mut self, tiers: TierSet) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_degrade_policy(mut self, policy: DegradePolicy) -> Self {
        self.on_degrade = policy;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }
}

/// Receives progress as a batch runs.
pub trait RunObserver {
    fn on_start(&mut self, _contacts: usize) {}
    fn on_contact(&mut self, _outcome: &ContactOutcome) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

/// Coordinates the ledger, cache, backend and draft sink for a batch.
pub struct Orchestrator {
    config: PipelineConfig,
    selector: ModelSelector,
    ledger: UsageLedger,
    cache: ContentCache,
    backend: Box<dyn GenerationBackend>,
    sink: Box<dyn DraftSink>,
    clock: Clock,
    halted: Option<String>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .field("cache_entries", &self.cache.len())
            .field("halted", &self.halted)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        ledger: UsageLedger,
        cache: ContentCache,
        backend: Box<dyn GenerationBackend>,
        sink: Box<dyn DraftSink>,
    ) -> Self {
        let selector = ModelSelector::new(config.tiers.clone(), config.on_degrade);
        Self {
            config,
            selector,
            ledger,
            cache,
            backend,
            sink,
            clock: Box::new(|| Utc::now().date_naive()),
            halted: None,
        }
    }

    /// Replace the date source used for the budget period and draft subjects.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Reason new generation was stopped, if it was.
    ///
    /// A halt lasts for the lifetime of the orchestrator.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// List contacts from `source` and process them.
    pub async fn run(&mut self, source: &dyn ContactSource) -> PipelineResult<RunSummary> {
        self.run_with_observer(source, &mut NoopObserver).await
    }

    pub async fn run_with_observer(
        &mut self,
        source: &dyn ContactSource,
        observer: &mut dyn RunObserver,
    ) -> PipelineResult<RunSummary> {
        let contacts = source.list_contacts().await.map_err(|err| {
            error!(error = %err, "contact source unavailable");
            err
        })?;
        Ok(self.process(&contacts, observer).await)
    }

    /// Process an already listed batch.
    pub async fn process(
        &mut self,
        contacts: &[ContactRecord],
        observer: &mut dyn RunObserver,
    ) -> RunSummary {
        let run_id = generate_run_id();
        let started_at = Utc::now();
        let total = contacts.len();
        let limit = self.config.batch_limit.unwrap_or(total).min(total);

        let period = Period::containing((self.clock)());
        let status = self.ledger.status(period);
        info!(
            %run_id,
            %period,
            contacts = total,
            remaining = self.ledger.get_remaining_budget(period),
            %status,
            "starting batch"
        );
        if status.should_warn() {
            warn!(%period, %status, spent = self.ledger.spent(period), "monthly budget is running low");
        }
        if limit < total {
            info!(limit, not_processed = total - limit, "batch limit reached");
        }

        observer.on_start(limit);
        let mut outcomes = Vec::with_capacity(limit);
        for contact in &contacts[..limit] {
            let outcome = self.process_contact(contact).await;
            observer.on_contact(&outcome);
            outcomes.push(outcome);
        }

        if let Err(err) = self.ledger.flush() {
            error!(error = %err, "final ledger flush failed");
            self.halt(err.into());
        }
        if let Err(err) = self.cache.flush() {
            error!(error = %err, "final cache flush failed");
            self.halt(err.into());
        }

        let period = Period::containing((self.clock)());
        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            period,
            total_contacts: total,
            not_processed: total - limit,
            generated: 0,
            cache_hits: 0,
            skipped_budget: 0,
            skipped_error: 0,
            degraded: 0,
            draft_failures: 0,
            run_cost: 0.0,
            remaining_budget: self.ledger.get_remaining_budget(period),
            budget_status: self.ledger.status(period),
            halted: self.halted.clone(),
            outcomes,
        };
        summary.tally();

        info!(
            run_id = %summary.run_id,
            generated = summary.generated,
            cache_hits = summary.cache_hits,
            skipped_budget = summary.skipped_budget,
            skipped_error = summary.skipped_error,
            run_cost = summary.run_cost,
            remaining = summary.remaining_budget,
            "batch finished"
        );
        summary
    }

    async fn process_contact(&mut self, contact: &ContactRecord) -> ContactOutcome {
        let date = (self.clock)();
        let period = Period::containing(date);
        let fingerprint = Fingerprint::for_contact(contact);
        let mut outcome = ContactOutcome {
            email: contact.email.clone(),
            first_name: contact.first_name.clone(),
            fingerprint: fingerprint.to_string(),
            state: ContactState::Pending,
            cache_hit: false,
            tier: None,
            model: None,
            cost: 0.0,
            degraded: false,
            skip_reason: None,
            draft_id: None,
            draft_error: None,
        };

        if let Some(content) = self.cache.lookup(&fingerprint).cloned() {
            info!(
                email = %contact.email,
                fingerprint = fingerprint.short(),
                model = %content.model_used,
                "cache hit"
            );
            outcome.state = ContactState::CacheHit;
            outcome.cache_hit = true;
            outcome.tier = Some(content.tier);
            outcome.model = Some(content.model_used);
            self.emit_draft(contact, &content.body, date, &mut outcome).await;
            return outcome;
        }

        if self.halted.is_some() {
            info!(email = %contact.email, "skipping generation after persistence failure");
            return skip(outcome, SkipReason::PersistenceHalted);
        }

        let remaining = self.ledger.get_remaining_budget(period);
        let kind = match self.selector.select(contact, remaining) {
            Selection::Proceed(kind) => kind,
            Selection::Degrade(kind) => {
                warn!(
                    email = %contact.email,
                    remaining,
                    tier = %kind,
                    "budget degraded: premium tier unaffordable"
                );
                outcome.degraded = true;
                kind
            }
            Selection::Skip(reason) => {
                info!(email = %contact.email, %period, %reason, "skipping contact");
                return skip(outcome, SkipReason::Budget(reason));
            }
        };
        let tier = self.selector.tiers().get(kind).clone();
        debug!(email = %contact.email, %kind, model = %tier.model, remaining, "selected tier");

        outcome.state = ContactState::Generating;
        outcome.tier = Some(kind);
        outcome.model = Some(tier.model.clone());

        let request =
            GenerationRequest::for_contact(contact, kind, &tier, self.config.temperature);
        let output = match self.backend.generate(&request).await {
            Ok(output) => output,
            Err(err) => {
                warn!(email = %contact.email, model = %tier.model, error = %err, "generation failed");
                return skip(outcome, SkipReason::BackendError(err.to_string()));
            }
        };

        let tokens = output.output_tokens();
        let cost = output
            .reported_cost
            .unwrap_or_else(|| tier.charge_for(tokens));
        outcome.state = ContactState::Generated;
        outcome.cost = cost;
        info!(
            email = %contact.email,
            tier = %kind,
            tokens,
            token_source = %output.usage.source,
            cost,
            "generated email"
        );

        let charge = Charge::new(cost)
            .with_model(tier.model.clone())
            .with_output_tokens(tokens);
        if let Err(err) = self.ledger.record_charge(period, charge) {
            error!(email = %contact.email, cost, error = %err, "failed to persist charge");
            self.halt(err.into());
        }

        let content = GeneratedContent {
            body: output.text,
            model_used: tier.model.clone(),
            tier: kind,
            token_count: tokens,
            cost,
            generated_at: Utc::now(),
        };
        let body = content.body.clone();
        if let Err(err) = self.cache.store(fingerprint, content) {
            error!(email = %contact.email, error = %err, "failed to persist cache entry");
            self.halt(err.into());
        }

        self.emit_draft(contact, &body, date, &mut outcome).await;
        outcome
    }

    /// Save the draft; sink failures are recorded on the outcome only.
    async fn emit_draft(
        &self,
        contact: &ContactRecord,
        body: &str,
        date: NaiveDate,
        outcome: &mut ContactOutcome,
    ) {
        let draft = DraftRequest::for_contact(contact, body, &self.config.subject_prefix, date);
        match self.sink.create_draft(&draft).await {
            Ok(id) => {
                outcome.state = ContactState::Drafted;
                outcome.draft_id = Some(id);
            }
            Err(err) => {
                warn!(email = %contact.email, error = %err, "failed to create draft");
                debug!(
                    email = %contact.email,
                    subject = %draft.subject,
                    body = %draft.body,
                    "undelivered draft"
                );
                outcome.draft_error = Some(err.to_string());
            }
        }
    }

    fn halt(&mut self, err: PersistenceError) {
        if self.halted.is_none() {
            error!(error = %err, "halting new generation for the rest of the run");
            self.halted = Some(err.to_string());
        }
    }
}

fn skip(mut outcome: ContactOutcome, reason: SkipReason) -> ContactOutcome {
    outcome.state = ContactState::Skipped;
    outcome.skip_reason = Some(reason);
    outcome
}
