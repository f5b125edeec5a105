//! Combining the structured-endpoint probe with the profile-page fallback.

use std::fmt;
use std::sync::Arc;

use log::{info, warn};

use crate::config::{DelayRange, Settings};
use crate::outcome::{Availability, CheckOutcome, Method, Verdict};
use crate::primary::PrimaryProbe;
use crate::secondary::SecondaryProbe;
use crate::session::Transport;
use crate::validate::CandidateName;

/// One way of finding out whether a handle is free.
pub trait Probe: Send + Sync {
    /// Look the handle up. Never panics on odd upstream responses; those
    /// come back as [`Verdict::Unknown`].
    fn probe(&self, name: &CandidateName) -> Verdict;
}

/// Error type a [`Check`] may fail with.
pub type CheckFailure = Box<dyn std::error::Error + Send + Sync>;

/// Something that turns a valid handle into a final outcome.
///
/// The batch dispatcher only depends on this, so a run can be driven by
/// a stub in tests.
pub trait Check: Send + Sync {
    /// Produce the outcome for `name`.
    ///
    /// # Errors
    ///
    /// An error is recorded as an error outcome for this handle only.
    fn check(&self, name: &CandidateName) -> Result<CheckOutcome, CheckFailure>;
}

/// Runs the primary probe, then the fallback when it cannot decide.
pub struct Checker {
    primary: Box<dyn Probe>,
    secondary: Box<dyn Probe>,
    use_primary: bool,
    request_delay: DelayRange,
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker")
            .field("use_primary", &self.use_primary)
            .field("request_delay", &self.request_delay)
            .finish_non_exhaustive()
    }
}

impl Checker {
    /// Combine two arbitrary probes. Primary is enabled, no delay.
    pub fn new(primary: Box<dyn Probe>, secondary: Box<dyn Probe>) -> Self {
        Self {
            primary,
            secondary,
            use_primary: true,
            request_delay: DelayRange::ZERO,
        }
    }

    /// The real probes over `transport`, configured from `settings`.
    pub fn from_settings(transport: Arc<dyn Transport>, settings: &Settings) -> Self {
        let primary = PrimaryProbe::new(
            Arc::clone(&transport),
            settings.endpoints.clone(),
            settings.primary_timeout,
        )
        .with_retry(settings.retry);
        let secondary = SecondaryProbe::new(
            transport,
            settings.endpoints.clone(),
            settings.profile_timeout,
        )
        .with_markers(settings.markers.clone())
        .with_policy(settings.ambiguity);
        Self::new(Box::new(primary), Box::new(secondary))
            .with_primary(settings.use_primary)
            .with_request_delay(settings.request_delay)
    }

    /// Enable or skip the primary probe.
    #[must_use]
    pub fn with_primary(mut self, enabled: bool) -> Self {
        self.use_primary = enabled;
        self
    }

    /// Pause applied after a decisive primary answer.
    #[must_use]
    pub fn with_request_delay(mut self, delay: DelayRange) -> Self {
        self.request_delay = delay;
        self
    }

    /// Decide availability for a valid handle.
    ///
    /// Always decisive: an answer the fallback cannot settle counts as
    /// taken.
    pub fn check_name(&self, name: &CandidateName) -> CheckOutcome {
        info!("checking {name}");

        if self.use_primary {
            match self.primary.probe(name) {
                Verdict::Available(detail) => {
                    self.request_delay.pause();
                    return CheckOutcome::decided(
                        name.as_str(),
                        Availability::Available,
                        detail,
                        Method::Primary,
                    );
                }
                Verdict::Taken(detail) => {
                    self.request_delay.pause();
                    return CheckOutcome::decided(
                        name.as_str(),
                        Availability::Taken,
                        detail,
                        Method::Primary,
                    );
                }
                Verdict::Unknown(reason) => {
                    info!("{name}: primary inconclusive ({reason}), falling back to profile page");
                }
            }
        }

        let (availability, detail) = match self.secondary.probe(name) {
            Verdict::Available(detail) => (Availability::Available, detail),
            Verdict::Taken(detail) => (Availability::Taken, detail),
            Verdict::Unknown(reason) => {
                warn!("{name}: no decisive answer ({reason}), counting as taken");
                (Availability::Taken, format!("undetermined: {reason}"))
            }
        };
        CheckOutcome::decided(name.as_str(), availability, detail, Method::Secondary)
    }
}

impl Check for Checker {
    fn check(&self, name: &CandidateName) -> Result<CheckOutcome, CheckFailure> {
        Ok(self.check_name(name))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::error::{ProbeError, TransportError};

    struct Scripted {
        verdict: Verdict,
        calls: Arc<AtomicUsize>,
    }

    impl Probe for Scripted {
        fn probe(&self, _name: &CandidateName) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    fn scripted(verdict: Verdict) -> (Box<dyn Probe>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Scripted {
                verdict,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }

    fn name(raw: &str) -> CandidateName {
        CandidateName::parse(raw).unwrap()
    }

    fn unknown() -> Verdict {
        Verdict::Unknown(ProbeError::ExhaustedRetries {
            what: "primary",
            attempts: 3,
            last: None,
        })
    }

    #[test]
    fn decisive_primary_skips_fallback() {
        let (primary, primary_calls) = scripted(Verdict::Available("api".into()));
        let (secondary, secondary_calls) = scripted(Verdict::Taken("page".into()));
        let outcome = Checker::new(primary, secondary).check_name(&name("alice"));

        assert_eq!(outcome.availability, Availability::Available);
        assert_eq!(outcome.method, Method::Primary);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn primary_taken_is_final() {
        let (primary, _) = scripted(Verdict::Taken("api".into()));
        let (secondary, secondary_calls) = scripted(Verdict::Available("page".into()));
        let outcome = Checker::new(primary, secondary).check_name(&name("bob"));

        assert_eq!(outcome.availability, Availability::Taken);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_primary_falls_back() {
        let (primary, _) = scripted(unknown());
        let (secondary, secondary_calls) = scripted(Verdict::Available("404".into()));
        let outcome = Checker::new(primary, secondary).check_name(&name("carol"));

        assert_eq!(outcome.availability, Availability::Available);
        assert_eq!(outcome.method, Method::Secondary);
        assert_eq!(outcome.detail, "404");
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_primary_is_never_entered() {
        let (primary, primary_calls) = scripted(Verdict::Available("api".into()));
        let (secondary, secondary_calls) = scripted(Verdict::Taken("page".into()));
        let checker = Checker::new(primary, secondary).with_primary(false);

        for raw in ["a1", "b2", "c3"] {
            let outcome = checker.check_name(&name(raw));
            assert_eq!(outcome.method, Method::Secondary);
        }
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn residual_unknown_counts_as_taken() {
        let (primary, _) = scripted(unknown());
        let (secondary, _) = scripted(Verdict::Unknown(
            TransportError::Network("connection reset".into()).into(),
        ));
        let outcome = Checker::new(primary, secondary).check_name(&name("dave"));

        assert_eq!(outcome.availability, Availability::Taken);
        assert!(outcome.detail.contains("connection reset"), "{}", outcome.detail);
        assert_eq!(outcome.name, "dave");
    }

    fn request_delay() -> DelayRange {
        DelayRange::from_secs_f64(0.2, 0.2).unwrap()
    }

    #[test]
    fn decisive_primary_waits_out_the_request_delay() {
        let (primary, _) = scripted(Verdict::Taken("api".into()));
        let (secondary, _) = scripted(Verdict::Available("page".into()));
        let checker = Checker::new(primary, secondary).with_request_delay(request_delay());

        let started = Instant::now();
        let outcome = checker.check_name(&name("erin"));
        let elapsed = started.elapsed();

        assert_eq!(outcome.method, Method::Primary);
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    }

    #[test]
    fn fallback_answer_skips_the_request_delay() {
        let (primary, _) = scripted(unknown());
        let (secondary, _) = scripted(Verdict::Available("404".into()));
        let checker = Checker::new(primary, secondary).with_request_delay(request_delay());

        let started = Instant::now();
        let outcome = checker.check_name(&name("frank"));
        let elapsed = started.elapsed();

        assert_eq!(outcome.method, Method::Secondary);
        assert!(elapsed < Duration::from_millis(200), "{elapsed:?}");
    }

    #[test]
    fn checker_is_send_sync() {
        fn assert_normal<T: Sized + Send + Sync>() {}
        assert_normal::<Checker>();
    }
}
