use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tracing::{error, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// Source of page bodies. The crawl loop only sees this seam.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Blocking GET with a fixed User-Agent, a timeout and bounded retries.
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpFetcher {
            client,
            max_retries: cfg.max_retries,
            base_backoff: cfg.base_backoff,
        })
    }

    fn fetch_once(&self, url: &Url) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.text().map_err(|e| FetchError::Transport(e.to_string()))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = parse_http_url(url)?;
        with_retry(self.max_retries, self.base_backoff, url, || self.fetch_once(&parsed))
    }
}

/// Only absolute http(s) URLs are fetchable.
pub fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}

/// Run `op` once plus up to `max_retries` more times, sleeping
/// `base * 2^attempt` between attempts. Permanent errors are returned as-is.
pub fn with_retry<T>(
    max_retries: u32,
    base: Duration,
    label: &str,
    mut op: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt = 0u32;
    loop {
        let err = match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_permanent() => {
                error!("Giving up on {} after {} attempts: {}", label, attempt + 1, e);
                return Err(e);
            }
            Err(e) => e,
        };

        if attempt >= max_retries {
            error!("Giving up on {} after {} attempts: {}", label, attempt + 1, err);
            return Err(FetchError::RetriesExhausted {
                attempts: attempt + 1,
                last: Box::new(err),
            });
        }

        let backoff = base.saturating_mul(2u32.saturating_pow(attempt));
        warn!(
            "Request failed for {} (attempt {}/{}): {}, backing off {:.1}s",
            label,
            attempt + 1,
            max_retries + 1,
            err,
            backoff.as_secs_f64()
        );
        std::thread::sleep(backoff);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn permanent_failure_is_logged() {
        let buf = LogBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let out: Result<(), _> = tracing::subscriber::with_default(subscriber, || {
            with_retry(3, Duration::ZERO, "https://x/404", || Err(FetchError::Status(404)))
        });
        assert!(matches!(out, Err(FetchError::Status(404))));

        let logged = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("ERROR"), "{}", logged);
        assert!(logged.contains("https://x/404"));
        assert!(logged.contains("http status 404"));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let out = with_retry(3, Duration::ZERO, "t", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(FetchError::Status(503))
            } else {
                Ok("body")
            }
        });
        assert_eq!(out.unwrap(), "body");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausts_retries() {
        let calls = Cell::new(0);
        let out: Result<(), _> = with_retry(2, Duration::ZERO, "t", || {
            calls.set(calls.get() + 1);
            Err(FetchError::Transport("connection reset".into()))
        });
        assert_eq!(calls.get(), 3);
        assert!(matches!(out, Err(FetchError::RetriesExhausted { attempts: 3, .. })));
    }

    #[test]
    fn permanent_errors_not_retried() {
        let calls = Cell::new(0);
        let out: Result<(), _> = with_retry(5, Duration::ZERO, "t", || {
            calls.set(calls.get() + 1);
            Err(FetchError::Status(404))
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(out, Err(FetchError::Status(404))));
    }

    #[test]
    fn malformed_url_fails_without_network() {
        let cfg = FetchConfig {
            user_agent: "test".into(),
            timeout: Duration::from_secs(1),
            max_retries: 3,
            base_backoff: Duration::ZERO,
        };
        let fetcher = HttpFetcher::new(&cfg).unwrap();
        assert!(matches!(fetcher.fetch("not a url"), Err(FetchError::InvalidUrl { .. })));
        assert!(matches!(fetcher.fetch("ftp://example.com/x"), Err(FetchError::InvalidUrl { .. })));
        assert!(matches!(fetcher.fetch(""), Err(FetchError::InvalidUrl { .. })));
    }
}
