//! Concrete fetcher for the FFCAM reservation availability endpoint.
//!
//! The reservation frontend does not expose a JSON API; availability is
//! embedded in the booking page as a `globalAvailability = {...};` script
//! assignment. The fetcher posts the structure id as a form body, extracts
//! that assignment, and parses the JSON object into a [`Snapshot`].

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;

use crate::date::WatchDate;
use crate::error::FetchError;
use crate::fetch::SnapshotFetcher;
use crate::snapshot::{AvailabilityCount, Snapshot};

/// Upstream endpoint configuration.
#[derive(Debug, Clone)]
pub struct FfcamConfig {
    /// Booking page URL.
    pub endpoint: String,
    /// Structure id posted as the form body, selecting the hut.
    pub structure: String,
    /// Upper bound on one fetch, enforced at the HTTP client level.
    pub timeout: Duration,
}

impl Default for FfcamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://centrale.ffcam.fr/index.php".to_string(),
            structure: "BK_STRUCTURE:30".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Fetches availability snapshots from the FFCAM booking frontend.
pub struct FfcamFetcher {
    cfg: FfcamConfig,
    http: Client,
    availability: Regex,
}

impl FfcamFetcher {
    /// Build a fetcher for the given endpoint.
    #[must_use]
    pub fn new(cfg: FfcamConfig) -> Self {
        let http = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            cfg,
            http,
            availability: Regex::new(r"globalAvailability = (.*?);")
                .expect("availability pattern is valid"),
        }
    }

    fn extract(&self, body: &str) -> Result<Snapshot, FetchError> {
        let raw = self
            .availability
            .captures(body)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| FetchError::Parse {
                message: "availability marker not found in response body".to_string(),
            })?
            .as_str();

        let counts: BTreeMap<WatchDate, AvailabilityCount> =
            serde_json::from_str(raw).map_err(|err| FetchError::Parse {
                message: format!("availability object is not valid JSON: {err}"),
            })?;

        Ok(Snapshot::new(counts))
    }

    fn request_error(&self, err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                duration_ms: self.cfg.timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }
        } else {
            FetchError::Request {
                message: err.to_string(),
            }
        }
    }
}

impl SnapshotFetcher for FfcamFetcher {
    fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        let resp = self
            .http
            .post(&self.cfg.endpoint)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(format!("structure={}", self.cfg.structure))
            .send()
            .map_err(|err| self.request_error(&err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = resp.text().map_err(|err| self.request_error(&err))?;
        self.extract(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SlotStatus;

    fn fetcher() -> FfcamFetcher {
        FfcamFetcher::new(FfcamConfig::default())
    }

    fn date(s: &str) -> WatchDate {
        s.parse().unwrap()
    }

    #[test]
    fn extracts_embedded_availability_object() {
        let body = concat!(
            "<html><script>var x = 1;\n",
            r#"globalAvailability = {"2024-07-10": 0, "2024-07-11": 3};"#,
            "\nmore();</script></html>"
        );

        let snapshot = fetcher().extract(body).unwrap();
        assert_eq!(snapshot.status(date("2024-07-10")), SlotStatus::Full);
        assert_eq!(snapshot.status(date("2024-07-11")), SlotStatus::Open(3));
        assert_eq!(snapshot.status(date("2024-07-12")), SlotStatus::Unlisted);
    }

    #[test]
    fn body_without_marker_is_a_parse_error() {
        let err = fetcher().extract("<html>maintenance page</html>").unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }

    #[test]
    fn malformed_availability_object_is_a_parse_error() {
        let err = fetcher()
            .extract("globalAvailability = {not json at all};")
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }

    #[test]
    fn empty_availability_object_is_an_empty_snapshot() {
        let snapshot = fetcher().extract("globalAvailability = {};").unwrap();
        assert!(snapshot.is_empty());
    }
}
