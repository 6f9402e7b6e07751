//! The classification run.
//!
//! A run loads the candidate table, drops every company that is already
//! catalogued or checkpointed, and sends the rest through a decorated
//! [`ClassifyProvider`]. Outcomes go to a single [`Recorder`]:
//!
//! - success: the name is checkpointed; eligible companies also get a row
//!   in the output table,
//! - failure (retries exhausted or fatal): the name goes to the error log
//!   and is *not* checkpointed, so reprocessing can pick it up.
//!
//! Store writes happen as each outcome arrives. An accepted name is only
//! checkpointed once the output table holding its row has been saved, so
//! an interrupted run never skips a company whose row was lost.
//!
//! With one provider the run is sequential and keeps input order. With
//! several, one worker per provider pulls from a bounded queue and the
//! recorder drains a results channel.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FilesConfig};
use crate::providers::{BatchPause, ClassifyProvider, QuotaWindow, RateLimiter, decorate};
use crate::store::{NameLog, NameSet};
use crate::table::{self, OutputRow, OutputTable};
use crate::telemetry;
use crate::types::{ClassificationResult, CompanyRecord};
use crate::{CartographeError, Result};

/// Terminal outcome of one company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Classified as a Gen-AI startup; a row was added to the output table.
    Accepted,
    /// Classified, but not eligible for the output table.
    Rejected,
    /// No valid classification; logged to the error store.
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Rejected => "rejected",
            Outcome::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed)
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Candidate companies after deduplication.
    pub considered: usize,
    /// Candidates already catalogued or checkpointed.
    pub skipped: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl RunReport {
    /// Companies that received a valid classification.
    pub fn classified(&self) -> usize {
        self.accepted + self.rejected
    }

    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accepted => self.accepted += 1,
            Outcome::Rejected => self.rejected += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Single writer of the checkpoint, error and output stores.
pub struct Recorder {
    checkpoint: NameLog,
    checkpointed: NameSet,
    errors: Option<NameLog>,
    output: OutputTable,
    output_path: PathBuf,
    save_every: usize,
    // Accepted names whose rows are not saved yet.
    pending: Vec<String>,
    report: RunReport,
}

impl Recorder {
    /// Open the stores named in `files`.
    ///
    /// The checkpoint is compacted first. The output table starts from the
    /// output file when it exists, else from the existing table.
    pub fn open(files: &FilesConfig, save_every: Option<usize>) -> Result<Self> {
        let checkpoint = NameLog::new(&files.checkpoint);
        let checkpointed = checkpoint.compact()?;
        let output = OutputTable::load_first_existing(&[
            files.output.as_path(),
            files.existing.as_path(),
        ])?;
        info!(
            checkpointed = checkpointed.len(),
            output_rows = output.len(),
            "opened stores"
        );
        Ok(Self {
            checkpoint,
            checkpointed,
            errors: Some(NameLog::new(&files.errors)),
            output,
            output_path: files.output.clone(),
            save_every: save_every.unwrap_or(1).max(1),
            pending: Vec::new(),
            report: RunReport::default(),
        })
    }

    /// Stop appending failures to the error log.
    ///
    /// Reprocessing rewrites that file itself once it is done.
    pub fn without_error_log(mut self) -> Self {
        self.errors = None;
        self
    }

    /// Names checkpointed so far, this run included.
    pub fn checkpointed(&self) -> &NameSet {
        &self.checkpointed
    }

    pub fn output(&self) -> &OutputTable {
        &self.output
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub(crate) fn report_mut(&mut self) -> &mut RunReport {
        &mut self.report
    }

    /// Bring one company to its terminal outcome.
    ///
    /// Only store I/O errors are returned; a classification failure is an
    /// outcome, not an error.
    pub fn record(
        &mut self,
        company: &CompanyRecord,
        result: Result<ClassificationResult>,
    ) -> Result<Outcome> {
        let outcome = match result {
            Ok(classification) if classification.is_eligible() => {
                self.output
                    .append(&OutputRow::new(company, &classification));
                self.pending.push(company.name.clone());
                info!(
                    company = %company.name,
                    layer = ?classification.layer,
                    category = classification.category.as_deref().unwrap_or(""),
                    "added Gen-AI startup"
                );
                if self.pending.len() >= self.save_every {
                    self.save()?;
                }
                Outcome::Accepted
            }
            Ok(classification) => {
                self.mark_done(&company.name)?;
                debug!(
                    company = %company.name,
                    is_startup = classification.is_startup,
                    is_gen_ai_startup = classification.is_gen_ai_startup,
                    "not a Gen-AI startup"
                );
                Outcome::Rejected
            }
            Err(e) => {
                error!(company = %company.name, error = %e, class = ?e.class(), "classification failed");
                if let Some(errors) = &self.errors {
                    errors.append(&company.name)?;
                }
                Outcome::Failed
            }
        };
        self.report.count(outcome);
        metrics::counter!(telemetry::COMPANIES_TOTAL, "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }

    fn mark_done(&mut self, name: &str) -> Result<()> {
        if self.checkpointed.insert(name) {
            self.checkpoint.append(name)?;
        }
        Ok(())
    }

    /// Save the output table, then checkpoint the names it now holds.
    pub fn save(&mut self) -> Result<()> {
        self.output.save(&self.output_path)?;
        for name in std::mem::take(&mut self.pending) {
            self.mark_done(&name)?;
        }
        Ok(())
    }

    /// Final save. Returns the run's counters.
    pub fn finish(mut self) -> Result<RunReport> {
        self.save()?;
        info!(
            path = %self.output_path.display(),
            rows = self.output.len(),
            "saved output table"
        );
        Ok(self.report)
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Companies left to classify.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub todo: Vec<CompanyRecord>,
    pub considered: usize,
    pub skipped_existing: usize,
    pub skipped_checkpointed: usize,
}

impl RunPlan {
    pub fn skipped(&self) -> usize {
        self.skipped_existing + self.skipped_checkpointed
    }
}

/// Candidates minus catalogued names minus checkpointed names, input order kept.
pub fn plan_todo(
    candidates: Vec<CompanyRecord>,
    existing: &NameSet,
    checkpointed: &NameSet,
) -> RunPlan {
    let mut plan = RunPlan {
        considered: candidates.len(),
        ..RunPlan::default()
    };
    for company in candidates {
        if existing.contains(&company.name) {
            plan.skipped_existing += 1;
        } else if checkpointed.contains(&company.name) {
            plan.skipped_checkpointed += 1;
        } else {
            plan.todo.push(company);
        }
    }
    plan
}

/// Load both input tables and plan against `checkpointed`.
pub fn load_plan(files: &FilesConfig, checkpointed: &NameSet) -> Result<RunPlan> {
    let candidates = table::load_companies(&files.new)?;
    let existing: NameSet = if files.existing.exists() {
        table::load_companies(&files.existing)?
            .into_iter()
            .map(|c| c.name)
            .collect()
    } else {
        warn!(path = %files.existing.display(), "existing table not found, nothing to exclude");
        NameSet::new()
    };

    let plan = plan_todo(candidates, &existing, checkpointed);
    info!(
        considered = plan.considered,
        already_catalogued = plan.skipped_existing,
        already_checkpointed = plan.skipped_checkpointed,
        todo = plan.todo.len(),
        "planned run"
    );
    Ok(plan)
}

// ============================================================================
// Execution
// ============================================================================

/// Classify one company, warning when there is nothing to go on.
pub async fn classify_one(
    provider: &dyn ClassifyProvider,
    company: &CompanyRecord,
) -> Result<ClassificationResult> {
    if !company.has_description() {
        warn!(company = %company.name, "no description, classifying from the name alone");
    }
    provider.classify(company).await
}

/// Classify `todo` one at a time, in order.
pub async fn run_sequential(
    todo: &[CompanyRecord],
    provider: &dyn ClassifyProvider,
    recorder: &mut Recorder,
) -> Result<()> {
    for (i, company) in todo.iter().enumerate() {
        info!(company = %company.name, index = i + 1, total = todo.len(), "classifying");
        let result = classify_one(provider, company).await;
        recorder.record(company, result)?;
    }
    Ok(())
}

type Classified = (CompanyRecord, Result<ClassificationResult>);

/// Classify `todo` with one worker per provider.
///
/// Completion order is not input order. The recorder stays on the calling
/// task and is the only writer of the stores.
pub async fn run_parallel(
    todo: Vec<CompanyRecord>,
    providers: Vec<Arc<dyn ClassifyProvider>>,
    recorder: &mut Recorder,
) -> Result<()> {
    if providers.is_empty() {
        return Err(CartographeError::NoCredentials);
    }
    let workers = providers.len();
    let total = todo.len();

    let (queue_tx, queue_rx) = mpsc::channel::<CompanyRecord>(workers * 2);
    let (result_tx, result_rx) = mpsc::channel::<Classified>(workers * 2);

    let feeder = tokio::spawn(async move {
        for company in todo {
            if queue_tx.send(company).await.is_err() {
                break; // workers gone
            }
        }
    });

    let queue = Arc::new(Mutex::new(queue_rx));
    let handles: Vec<_> = providers
        .into_iter()
        .enumerate()
        .map(|(id, provider)| {
            tokio::spawn(worker(id, provider, Arc::clone(&queue), result_tx.clone()))
        })
        .collect();
    drop(result_tx);

    let mut done = 0usize;
    let mut results = ReceiverStream::new(result_rx);
    while let Some((company, result)) = results.next().await {
        done += 1;
        debug!(company = %company.name, done, total, "outcome received");
        if let Err(e) = recorder.record(&company, result) {
            feeder.abort();
            handles.iter().for_each(|h| h.abort());
            return Err(e);
        }
    }

    for joined in join_all(handles).await {
        if let Err(e) = joined {
            warn!(error = %e, "worker task ended abnormally");
        }
    }
    Ok(())
}

async fn worker(
    id: usize,
    provider: Arc<dyn ClassifyProvider>,
    queue: Arc<Mutex<mpsc::Receiver<CompanyRecord>>>,
    results: mpsc::Sender<Classified>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(company) = next else { break };
        debug!(worker = id, company = %company.name, "classifying");
        let result = classify_one(provider.as_ref(), &company).await;
        if results.send((company, result)).await.is_err() {
            break; // recorder gone
        }
    }
    debug!(worker = id, "worker finished");
}

/// Run already-decorated providers over the planned work.
///
/// One provider runs sequentially; more run in parallel.
pub async fn execute(
    config: &Config,
    providers: Vec<Arc<dyn ClassifyProvider>>,
) -> Result<RunReport> {
    let mut recorder = Recorder::open(&config.files, config.output.save_every)?;
    let plan = load_plan(&config.files, recorder.checkpointed())?;
    recorder.report_mut().considered = plan.considered;
    recorder.report_mut().skipped = plan.skipped();

    match providers.len() {
        0 => return Err(CartographeError::NoCredentials),
        1 => run_sequential(&plan.todo, providers[0].as_ref(), &mut recorder).await?,
        n => {
            info!(workers = n, "running in parallel");
            run_parallel(plan.todo, providers, &mut recorder).await?
        }
    }

    let report = recorder.finish()?;
    info!(
        considered = report.considered,
        skipped = report.skipped,
        classified = report.classified(),
        accepted = report.accepted,
        rejected = report.rejected,
        failed = report.failed,
        "run complete"
    );
    Ok(report)
}

/// Full run against the Gemini API.
///
/// Parallel mode needs more than one key and either `parallel` or a
/// configured worker count above one. Sequential runs pause every
/// `batch_size` calls; parallel workers share one per-minute quota window.
pub async fn run(config: &Config, api_keys: &[String], parallel: bool) -> Result<RunReport> {
    let first_key = api_keys.first().ok_or(CartographeError::NoCredentials)?;
    let workers = config.workers.count.min(api_keys.len());
    let wants_parallel = parallel || config.workers.count > 1;

    let providers: Vec<Arc<dyn ClassifyProvider>> = if wants_parallel && workers > 1 {
        let limiter: Arc<dyn RateLimiter> =
            Arc::new(QuotaWindow::per_minute(config.rate_limit.quota_per_minute));
        api_keys
            .iter()
            .take(workers)
            .map(|key| {
                decorate(
                    Arc::new(config.gemini_client(key)),
                    Arc::clone(&limiter),
                    config.retry_config(),
                )
            })
            .collect()
    } else {
        if wants_parallel {
            warn!(keys = api_keys.len(), "parallel run needs several keys, running sequentially");
        }
        vec![sequential_provider(config, first_key)]
    };

    execute(config, providers).await
}

/// Gemini client for `api_key`, paused every `batch_size` calls and retried.
pub fn sequential_provider(config: &Config, api_key: &str) -> Arc<dyn ClassifyProvider> {
    let limiter = Arc::new(BatchPause::new(
        config.rate_limit.batch_size,
        config.batch_pause(),
    ));
    decorate(
        Arc::new(config.gemini_client(api_key)),
        limiter,
        config.retry_config(),
    )
}
