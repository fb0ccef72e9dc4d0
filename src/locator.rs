//! Finding the most recent published patch.
//!
//! Patches are published at most once per calendar day under a dated URL.
//! We walk backwards from today over a small window, issuing one HEAD
//! request at a time; the first date that answers 2xx wins. A transport
//! error on one date is logged and the scan moves on to the next older one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::PatchConfig;
use crate::error::PatchError;
use crate::proxy::ProxyConfig;

/// One dated URL checked in the window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCandidate {
    pub date: NaiveDate,
    pub url: String,
}

/// Answer from checking a single URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// 2xx response: the archive exists
    Found,
    /// Any other HTTP status
    Missing(u16),
}

/// Existence check for a candidate URL
#[async_trait]
pub trait UrlCheck: Send + Sync {
    /// Err means a transport-level failure (DNS, TLS, timeout, ...)
    async fn check(&self, url: &str) -> Result<CheckOutcome>;
}

/// HEAD checker backed by reqwest
pub struct HttpCheck {
    client: reqwest::Client,
}

impl HttpCheck {
    /// Build a client with the configured user agent and per-request
    /// timeout, routed through `proxy` when one is set.
    pub fn new(config: &PatchConfig, proxy: &ProxyConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.check_timeout)
            .timeout(config.check_timeout);

        if let Some(uri) = &proxy.uri {
            builder = builder.proxy(
                reqwest::Proxy::all(uri).with_context(|| format!("Invalid proxy: {}", uri))?,
            );
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlCheck for HttpCheck {
    async fn check(&self, url: &str) -> Result<CheckOutcome> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .with_context(|| format!("HEAD {} failed", url))?;

        let status = response.status();
        if status.is_success() {
            Ok(CheckOutcome::Found)
        } else {
            Ok(CheckOutcome::Missing(status.as_u16()))
        }
    }
}

/// Checks dated URLs to find the newest reachable patch.
pub struct PatchLocator<'a, P: UrlCheck> {
    config: &'a PatchConfig,
    checker: &'a P,
}

impl<'a, P: UrlCheck> PatchLocator<'a, P> {
    pub fn new(config: &'a PatchConfig, checker: &'a P) -> Self {
        Self { config, checker }
    }

    /// Candidates for `today` and the preceding days, newest first.
    pub fn candidates(&self, today: NaiveDate, window_days: u32) -> Vec<PatchCandidate> {
        (0..window_days)
            .filter_map(|i| today.checked_sub_days(Days::new(i as u64)))
            .map(|date| PatchCandidate {
                date,
                url: self.config.patch_url(date),
            })
            .collect()
    }

    /// Find the most recent reachable patch in the window ending at `today`.
    pub async fn locate(&self, today: NaiveDate, window_days: u32) -> Result<PatchCandidate> {
        for candidate in self.candidates(today, window_days) {
            println!("Checking for patch: {}", candidate.url);

            match self.checker.check(&candidate.url).await {
                Ok(CheckOutcome::Found) => {
                    info!("Found patch for {}", candidate.date);
                    println!("Found patch: {}", candidate.url);
                    return Ok(candidate);
                }
                Ok(CheckOutcome::Missing(status)) => {
                    debug!("No patch for {} (HTTP {})", candidate.date, status);
                }
                Err(e) => {
                    warn!("Check for {} failed, trying older date: {:#}", candidate.date, e);
                }
            }
        }

        Err(PatchError::PatchNotFound { window_days }.into())
    }

    /// Locate using the configured window and today's UTC date.
    pub async fn locate_latest(&self) -> Result<PatchCandidate> {
        self.locate(Utc::now().date_naive(), self.config.window_days)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted checker: per-URL outcome, records call order
    struct FakeCheck {
        answers: HashMap<String, Result<CheckOutcome, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCheck {
        fn new(answers: Vec<(String, Result<CheckOutcome, String>)>) -> Self {
            Self {
                answers: answers.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UrlCheck for FakeCheck {
        async fn check(&self, url: &str) -> Result<CheckOutcome> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.answers.get(url) {
                Some(Ok(outcome)) => Ok(*outcome),
                Some(Err(msg)) => Err(anyhow::anyhow!("{}", msg)),
                None => Ok(CheckOutcome::Missing(404)),
            }
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_config() -> PatchConfig {
        PatchConfig {
            release_host: "https://example.test/releases".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_candidates_newest_first_across_month() {
        let config = test_config();
        let checker = FakeCheck::new(vec![]);
        let locator = PatchLocator::new(&config, &checker);

        let dates: Vec<_> = locator
            .candidates(day(2025, 3, 1), 3)
            .into_iter()
            .map(|c| c.date)
            .collect();
        assert_eq!(dates, vec![day(2025, 3, 1), day(2025, 2, 28), day(2025, 2, 27)]);
    }

    #[tokio::test]
    async fn test_locate_prefers_most_recent() {
        let config = test_config();
        let checker = FakeCheck::new(vec![
            (config.patch_url(day(2025, 5, 9)), Ok(CheckOutcome::Found)),
            (config.patch_url(day(2025, 5, 8)), Ok(CheckOutcome::Found)),
        ]);
        let locator = PatchLocator::new(&config, &checker);

        let found = locator.locate(day(2025, 5, 10), 3).await.unwrap();
        assert_eq!(found.date, day(2025, 5, 9));
        assert_eq!(
            found.url,
            "https://example.test/releases/patch-2025-05-09/patch-2025-05-09.7z"
        );

        // Stops at the first hit: 05-08 never checked
        assert_eq!(checker.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_locate_not_found_in_window() {
        let config = test_config();
        // Reachable, but outside the window
        let checker = FakeCheck::new(vec![(
            config.patch_url(day(2025, 5, 6)),
            Ok(CheckOutcome::Found),
        )]);
        let locator = PatchLocator::new(&config, &checker);

        let err = locator.locate(day(2025, 5, 10), 3).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchError>(),
            Some(PatchError::PatchNotFound { window_days: 3 })
        ));
        assert_eq!(checker.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_locate_continues_after_transport_error() {
        let config = test_config();
        let checker = FakeCheck::new(vec![
            (
                config.patch_url(day(2025, 5, 10)),
                Err("connection reset".into()),
            ),
            (config.patch_url(day(2025, 5, 9)), Ok(CheckOutcome::Missing(404))),
            (config.patch_url(day(2025, 5, 8)), Ok(CheckOutcome::Found)),
        ]);
        let locator = PatchLocator::new(&config, &checker);

        let found = locator.locate(day(2025, 5, 10), 3).await.unwrap();
        assert_eq!(found.date, day(2025, 5, 8));
        assert_eq!(checker.calls().len(), 3);
    }

    #[test]
    fn test_http_check_builds_with_proxy() {
        let config = test_config();
        let proxy = ProxyConfig {
            uri: Some("http://127.0.0.1:7890".into()),
        };
        assert!(HttpCheck::new(&config, &proxy).is_ok());
        assert!(HttpCheck::new(&config, &ProxyConfig::default()).is_ok());
    }
}
