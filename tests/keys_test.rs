use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cartographe::keys::{self, KeyState, PROBE_INTERVAL};
use cartographe::{
    CartographeError, ClassificationResult, ClassifyProvider, CompanyRecord, Result,
};
use tokio::time::Instant;

/// Probe outcome chosen by key prefix.
struct KeyedProbe {
    key: String,
}

#[async_trait]
impl ClassifyProvider for KeyedProbe {
    fn name(&self) -> &str {
        "keyed-probe"
    }

    async fn classify(&self, _company: &CompanyRecord) -> Result<ClassificationResult> {
        Err(CartographeError::NotImplemented("classify"))
    }

    async fn probe(&self) -> Result<()> {
        match self.key.split('-').next() {
            Some("good") => Ok(()),
            Some("busy") => Err(CartographeError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            }),
            Some("bad") => Err(CartographeError::AuthenticationFailed),
            _ => Err(CartographeError::Api {
                status: 500,
                message: "backend unavailable".into(),
            }),
        }
    }
}

fn factory(key: &str) -> Arc<dyn ClassifyProvider> {
    Arc::new(KeyedProbe {
        key: key.to_string(),
    })
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn probes_every_key_and_recommends_settings() {
    let keys = keys(&[
        "good-0000000001",
        "busy-0000000002",
        "bad-00000000003",
        "flaky-000000004",
        "good-0000000005",
    ]);

    let start = Instant::now();
    let report = keys::check_keys(&keys, factory).await.unwrap();

    // One pause between consecutive probes, none after the last.
    assert_eq!(start.elapsed(), PROBE_INTERVAL * 4);

    let states: Vec<&KeyState> = report.statuses.iter().map(|s| &s.state).collect();
    assert_eq!(states[0], &KeyState::Valid);
    assert_eq!(states[1], &KeyState::RateLimited);
    assert_eq!(states[2], &KeyState::Rejected);
    assert!(matches!(states[3], KeyState::Failed(reason) if reason.contains("500")));
    assert_eq!(states[4], &KeyState::Valid);

    assert_eq!(report.usable(), 3);
    assert_eq!(report.recommended_workers(), 3);
    assert_eq!(report.recommended_quota_per_minute(), 45);
}

#[tokio::test]
async fn statuses_mask_keys() {
    let report = keys::check_keys(&keys(&["good-secret-key-1234"]), factory)
        .await
        .unwrap();
    let status = &report.statuses[0];
    assert_eq!(status.index, 1);
    assert_eq!(status.masked, "good...1234");
    assert!(!status.masked.contains("secret"));
}

#[tokio::test]
async fn no_keys_is_an_error() {
    let err = keys::check_keys(&[], factory).await.unwrap_err();
    assert!(matches!(err, CartographeError::NoCredentials));
}

#[tokio::test]
async fn no_usable_key_recommends_nothing() {
    let report = keys::check_keys(&keys(&["bad-1"]), factory).await.unwrap();
    assert_eq!(report.usable(), 0);
    assert_eq!(report.recommended_workers(), 0);
    assert_eq!(report.recommended_quota_per_minute(), 0);
}
