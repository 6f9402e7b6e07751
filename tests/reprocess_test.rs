//! Error-store reprocessing over temp files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use cartographe::config::{
    Config, FilesConfig, ModelConfig, OutputConfig, RateLimitConfig, ReprocessConfig,
    RetrySection, WorkersConfig,
};
use cartographe::reprocess::{ReprocessOptions, reprocess};
use cartographe::{
    CartographeError, ClassificationResult, ClassifyProvider, CompanyRecord, OutputTable, Result,
};
use tempfile::TempDir;

/// Succeeds for the listed names (eligible or not), fails for the rest.
struct MockProvider {
    eligible: Vec<&'static str>,
    rejected: Vec<&'static str>,
    seen: Mutex<Vec<CompanyRecord>>,
}

impl MockProvider {
    fn new(eligible: &[&'static str], rejected: &[&'static str]) -> Self {
        Self {
            eligible: eligible.to_vec(),
            rejected: rejected.to_vec(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    fn descriptions(&self) -> HashMap<String, String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.name.clone(), c.description.clone()))
            .collect()
    }
}

fn result(eligible: bool) -> ClassificationResult {
    ClassificationResult {
        is_startup: true,
        is_startup_confidence: 80.0,
        is_gen_ai_startup: eligible,
        is_gen_ai_startup_confidence: 75.0,
        layer: None,
        layer_confidence: 0.0,
        category: None,
        category_confidence: 0.0,
        is_linked_to_france: false,
        is_linked_to_france_confidence: 60.0,
        startup_rationale: None,
        gen_ai_rationale: None,
    }
}

#[async_trait]
impl ClassifyProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn classify(&self, company: &CompanyRecord) -> Result<ClassificationResult> {
        self.seen.lock().unwrap().push(company.clone());
        let name = company.name.as_str();
        if self.eligible.contains(&name) {
            Ok(result(true))
        } else if self.rejected.contains(&name) {
            Ok(result(false))
        } else {
            Err(CartographeError::Parse("no JSON block found".into()))
        }
    }
}

fn setup(errors: &str, checkpoint: &str) -> (TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let files = FilesConfig {
        existing: dir.path().join("existing.csv"),
        new: dir.path().join("new.csv"),
        output: dir.path().join("output.csv"),
        checkpoint: dir.path().join("checkpoint.txt"),
        errors: dir.path().join("errors.txt"),
    };
    fs::write(
        &files.new,
        "Company Name;Description\nGamma;Voice agents for clinics\nAlpha;Synthetic data\n",
    )
    .unwrap();
    fs::write(
        &files.existing,
        "Company Name,Description\nDelta,Retail analytics\n",
    )
    .unwrap();
    fs::write(&files.errors, errors).unwrap();
    fs::write(&files.checkpoint, checkpoint).unwrap();

    let config = Config {
        model: ModelConfig {
            name: "gemini-test".into(),
            base_url: None,
            temperature: None,
            max_output_tokens: None,
            search_grounding: false,
        },
        files,
        retry: RetrySection {
            max_retries: 1,
            base_delay_secs: 0.0,
            backoff_multiplier: 1.0,
            max_delay_secs: None,
        },
        rate_limit: RateLimitConfig {
            batch_size: 10,
            pause_secs: 0.0,
            quota_per_minute: 100,
        },
        workers: WorkersConfig { count: 1 },
        reprocess: ReprocessConfig { max_per_run: 50 },
        output: OutputConfig::default(),
    };
    (dir, config)
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

#[tokio::test]
async fn reprocess_resolves_successes_and_rewrites_error_file() {
    let (_dir, config) = setup("Gamma\nAlpha\nGamma\nDone\nDelta\n", "Done\n");
    let provider = MockProvider::new(&["Gamma"], &["Delta"]);

    let report = reprocess(&config, &provider, &ReprocessOptions::from_config(&config))
        .await
        .unwrap();

    assert_eq!(provider.calls(), vec!["Gamma", "Alpha", "Delta"]);
    assert_eq!(report.logged, 4);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.still_failed, 1);
    assert_eq!(report.remaining, 1);

    assert_eq!(read(&config.files.errors), "Alpha\n");
    assert_eq!(read(&config.files.checkpoint), "Done\nGamma\nDelta\n");

    // The output table starts from the existing table.
    let output = OutputTable::load(&config.files.output).unwrap();
    assert_eq!(output.len(), 2);
    assert!(output.contains("Delta"));
    assert!(output.contains("Gamma"));
}

#[tokio::test]
async fn descriptions_come_from_any_table() {
    let (_dir, config) = setup("Gamma\nDelta\nNowhere\n", "");
    let provider = MockProvider::new(&["Gamma", "Delta", "Nowhere"], &[]);

    reprocess(&config, &provider, &ReprocessOptions::from_config(&config))
        .await
        .unwrap();

    let descriptions = provider.descriptions();
    assert_eq!(descriptions["Gamma"], "Voice agents for clinics");
    assert_eq!(descriptions["Delta"], "Retail analytics");
    // Missing everywhere: still classified, with an empty description.
    assert_eq!(descriptions["Nowhere"], "");
}

#[tokio::test]
async fn resolved_names_do_not_come_back() {
    let (_dir, config) = setup("Gamma\nAlpha\n", "");
    let options = ReprocessOptions::from_config(&config);

    let first = MockProvider::new(&["Gamma"], &[]);
    reprocess(&config, &first, &options).await.unwrap();
    assert_eq!(read(&config.files.errors), "Alpha\n");

    let second = MockProvider::new(&["Gamma", "Alpha"], &[]);
    let report = reprocess(&config, &second, &options).await.unwrap();
    assert_eq!(second.calls(), vec!["Alpha"]);
    assert_eq!(report.remaining, 0);
    assert_eq!(read(&config.files.errors), "");

    let third = MockProvider::new(&[], &[]);
    let report = reprocess(&config, &third, &options).await.unwrap();
    assert!(third.calls().is_empty());
    assert_eq!(report.logged, 0);

    let output = OutputTable::load(&config.files.output).unwrap();
    assert!(output.contains("Gamma"));
    assert!(output.contains("Alpha"));
    assert_eq!(output.len(), 3);
}

#[tokio::test]
async fn max_per_run_caps_attempts_and_keeps_the_rest() {
    let (_dir, config) = setup("A\nB\nC\nD\nE\n", "");
    let provider = MockProvider::new(&["B"], &[]);
    let options = ReprocessOptions {
        max_per_run: 2,
        ..ReprocessOptions::from_config(&config)
    };

    let report = reprocess(&config, &provider, &options).await.unwrap();

    assert_eq!(provider.calls(), vec!["A", "B"]);
    assert_eq!(report.attempted, 2);
    assert_eq!(read(&config.files.errors), "A\nC\nD\nE\n");
}

#[tokio::test]
async fn custom_error_file_is_used() {
    let (dir, config) = setup("", "");
    let custom = dir.path().join("older_errors.txt");
    fs::write(&custom, "Gamma\n").unwrap();
    let provider = MockProvider::new(&["Gamma"], &[]);
    let options = ReprocessOptions {
        error_file: custom.clone(),
        max_per_run: 10,
    };

    reprocess(&config, &provider, &options).await.unwrap();

    assert_eq!(fs::read_to_string(&custom).unwrap(), "");
    assert_eq!(read(&config.files.checkpoint), "Gamma\n");
}
