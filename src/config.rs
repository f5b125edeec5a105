//! Run settings: pacing, retry policy, endpoints and probe policy.

use std::time::Duration;

use log::debug;
use rand::Rng;
use thiserror::Error;

use crate::secondary::{AmbiguityPolicy, MarkerSet};

/// Default number of concurrent workers. Kept small to stay under the
/// service's rate tolerance.
pub const DEFAULT_WORKERS: usize = 3;

/// Default upstream host.
pub const DEFAULT_BASE_URL: &str = "https://www.instagram.com";

/// A setting that cannot be used.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Lower bound above upper bound, or a negative / non-finite bound.
    #[error("invalid delay range {min}..{max} seconds")]
    DelayRange {
        /// Lower bound in seconds.
        min: f64,
        /// Upper bound in seconds.
        max: f64,
    },
    /// Zero workers.
    #[error("worker count must be at least 1")]
    Workers,
    /// Proxy URL with an unsupported scheme.
    #[error("invalid proxy `{0}`, expected http://, https://, socks4:// or socks5://")]
    Proxy(String),
}

/// A closed range a random pause is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    /// No pause at all.
    pub const ZERO: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// A range between two durations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DelayRange`] when `min > max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::DelayRange {
                min: min.as_secs_f64(),
                max: max.as_secs_f64(),
            });
        }
        Ok(Self { min, max })
    }

    /// A range given in (fractional) seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DelayRange`] for negative, non-finite or
    /// inverted bounds.
    pub fn from_secs_f64(min: f64, max: f64) -> Result<Self, ConfigError> {
        let bad = ConfigError::DelayRange { min, max };
        let min = Duration::try_from_secs_f64(min).map_err(|_| bad.clone())?;
        let max = Duration::try_from_secs_f64(max).map_err(|_| bad)?;
        Self::new(min, max)
    }

    /// Lower bound.
    #[must_use]
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw a duration uniformly from the range.
    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Sleep the current thread for a sampled duration.
    pub fn pause(&self) {
        let delay = self.sample();
        if delay.is_zero() {
            return;
        }
        debug!("applying random delay: {:.2} seconds", delay.as_secs_f64());
        std::thread::sleep(delay);
    }
}

/// How the structured-endpoint probe retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per handle.
    pub max_attempts: u32,
    /// Backoff after a 403/429.
    pub blocked_backoff: DelayRange,
    /// Backoff after a transport fault.
    pub network_backoff: DelayRange,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            blocked_backoff: DelayRange {
                min: Duration::from_secs(3),
                max: Duration::from_secs(6),
            },
            network_backoff: DelayRange {
                min: Duration::from_secs(2),
                max: Duration::from_secs(4),
            },
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping.
    #[must_use]
    pub fn without_backoff(self) -> Self {
        Self {
            blocked_backoff: DelayRange::ZERO,
            network_backoff: DelayRange::ZERO,
            ..self
        }
    }
}

/// URLs the probes talk to, derived from one base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    /// Endpoints rooted at `base` (trailing slashes ignored).
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// The host root.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Page that hands out the anti-forgery cookie.
    #[must_use]
    pub fn landing(&self) -> String {
        format!("{}/", self.base)
    }

    /// Structured availability endpoint.
    #[must_use]
    pub fn check(&self) -> String {
        format!("{}/api/v1/users/check_username/", self.base)
    }

    /// Referer the check endpoint expects.
    #[must_use]
    pub fn signup_referer(&self) -> String {
        format!("{}/accounts/web_create_ajax/attempt/", self.base)
    }

    /// Public profile page for `name`.
    #[must_use]
    pub fn profile(&self, name: &str) -> String {
        format!("{}/{name}/", self.base)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Everything a run needs.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Concurrent workers.
    pub workers: usize,
    /// Pause after a decisive primary answer.
    pub request_delay: DelayRange,
    /// Pause a worker takes between tasks.
    pub pacing: DelayRange,
    /// Primary probe retries.
    pub retry: RetryPolicy,
    /// Whether the structured endpoint is tried first.
    pub use_primary: bool,
    /// Upstream URLs.
    pub endpoints: Endpoints,
    /// Timeout for landing and check requests.
    pub primary_timeout: Duration,
    /// Timeout for profile page requests.
    pub profile_timeout: Duration,
    /// Upstream proxy URL.
    pub proxy: Option<String>,
    /// Page markers for the profile heuristic.
    pub markers: MarkerSet,
    /// What an ambiguous profile page means.
    pub ambiguity: AmbiguityPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            request_delay: DelayRange {
                min: Duration::from_secs(2),
                max: Duration::from_secs(5),
            },
            pacing: DelayRange {
                min: Duration::from_millis(500),
                max: Duration::from_millis(1500),
            },
            retry: RetryPolicy::default(),
            use_primary: true,
            endpoints: Endpoints::default(),
            primary_timeout: Duration::from_secs(10),
            profile_timeout: Duration::from_secs(15),
            proxy: None,
            markers: MarkerSet::default(),
            ambiguity: AmbiguityPolicy::default(),
        }
    }
}

impl Settings {
    /// Reject settings a run cannot use.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Workers);
        }
        if let Some(proxy) = &self.proxy {
            validate_proxy(proxy)?;
        }
        Ok(())
    }
}

/// Accept only proxy schemes the HTTP client can speak.
///
/// # Errors
///
/// Returns [`ConfigError::Proxy`] for any other scheme.
pub fn validate_proxy(proxy: &str) -> Result<(), ConfigError> {
    const SCHEMES: [&str; 4] = ["http://", "https://", "socks4://", "socks5://"];
    if SCHEMES.iter().any(|scheme| proxy.starts_with(scheme)) {
        Ok(())
    } else {
        Err(ConfigError::Proxy(proxy.to_string()))
    }
}
