//! Error-store reprocessing.
//!
//! Takes the names logged as failures, retries up to `max_per_run` of them
//! through the normal classification path and rewrites the error file with
//! whatever is still unresolved. Names that reached the checkpoint some
//! other way are dropped from the error file without a call.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::{self, Recorder};
use crate::providers::ClassifyProvider;
use crate::store::{NameLog, NameSet};
use crate::table;
use crate::types::CompanyRecord;
use crate::Result;

/// What to reprocess.
#[derive(Debug, Clone)]
pub struct ReprocessOptions {
    pub error_file: PathBuf,
    pub max_per_run: usize,
}

impl ReprocessOptions {
    /// The configured error file and cap.
    pub fn from_config(config: &Config) -> Self {
        Self {
            error_file: config.files.errors.clone(),
            max_per_run: config.reprocess.max_per_run,
        }
    }
}

/// Counters for one reprocessing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReprocessReport {
    /// Distinct names in the error file before the pass.
    pub logged: usize,
    /// Names dropped because they were already checkpointed.
    pub reconciled: usize,
    pub attempted: usize,
    pub succeeded: usize,
    /// Successes that were added to the output table.
    pub accepted: usize,
    pub still_failed: usize,
    /// Names left in the error file.
    pub remaining: usize,
}

/// Retry logged failures and rewrite the error file.
///
/// The rewritten file keeps first-seen order and holds the original names
/// minus this pass's successes minus names already checkpointed.
pub async fn reprocess(
    config: &Config,
    provider: &dyn ClassifyProvider,
    options: &ReprocessOptions,
) -> Result<ReprocessReport> {
    let error_log = NameLog::new(&options.error_file);
    let logged = error_log.load()?;
    let mut report = ReprocessReport {
        logged: logged.len(),
        ..ReprocessReport::default()
    };
    if logged.is_empty() {
        info!(path = %options.error_file.display(), "error file is empty, nothing to reprocess");
        return Ok(report);
    }

    let mut recorder =
        Recorder::open(&config.files, config.output.save_every)?.without_error_log();

    let reconciled: NameSet = logged
        .iter()
        .filter(|name| recorder.checkpointed().contains(name))
        .collect();
    report.reconciled = reconciled.len();
    let batch: Vec<String> = logged
        .iter()
        .filter(|name| !reconciled.contains(name))
        .take(options.max_per_run)
        .map(str::to_string)
        .collect();
    info!(
        logged = report.logged,
        reconciled = report.reconciled,
        batch = batch.len(),
        max_per_run = options.max_per_run,
        "reprocessing failures"
    );

    let files = &config.files;
    let descriptions = table::description_index(&[
        files.new.as_path(),
        files.existing.as_path(),
        files.output.as_path(),
    ]);

    let mut succeeded = NameSet::new();
    for (i, name) in batch.iter().enumerate() {
        let description = descriptions.get(name).cloned().unwrap_or_default();
        if description.is_empty() {
            warn!(company = %name, "no description found in any table");
        }
        let company = CompanyRecord::new(name.as_str(), description);
        info!(company = %name, index = i + 1, total = batch.len(), "reprocessing");

        let result = pipeline::classify_one(provider, &company).await;
        let outcome = recorder.record(&company, result)?;
        report.attempted += 1;
        if outcome.is_success() {
            succeeded.insert(name.as_str());
        }
    }

    let run = recorder.finish()?;
    report.succeeded = succeeded.len();
    report.accepted = run.accepted;
    report.still_failed = run.failed;

    let remaining = remaining_failures(&logged, &succeeded, &reconciled);
    error_log.rewrite(remaining.iter().copied())?;
    report.remaining = remaining.len();

    info!(
        succeeded = report.succeeded,
        still_failed = report.still_failed,
        accepted = report.accepted,
        remaining = report.remaining,
        "reprocessing complete"
    );
    Ok(report)
}

/// `logged` minus both sets, in `logged` order.
fn remaining_failures<'a>(
    logged: &'a NameSet,
    succeeded: &NameSet,
    reconciled: &NameSet,
) -> Vec<&'a str> {
    logged
        .iter()
        .filter(|name| !succeeded.contains(name) && !reconciled.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_keeps_order_and_drops_resolved() {
        let logged: NameSet = ["d", "a", "c", "b"].into_iter().collect();
        let succeeded: NameSet = ["a"].into_iter().collect();
        let reconciled: NameSet = ["b"].into_iter().collect();
        assert_eq!(
            remaining_failures(&logged, &succeeded, &reconciled),
            vec!["d", "c"]
        );
    }
}
