use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use handle_avail::batch::Dispatcher;
use handle_avail::check::{Check, CheckFailure, Checker};
use handle_avail::config::{DelayRange, RetryPolicy, Settings};
use handle_avail::error::TransportError;
use handle_avail::outcome::{Availability, CheckOutcome, Method};
use handle_avail::results::ResultSet;
use handle_avail::session::{Reply, Session, Transport};
use handle_avail::validate::CandidateName;

type ApiReply = Box<dyn Fn(&str) -> Reply + Send + Sync>;

/// An in-memory stand-in for the service, optionally behind a broken proxy.
struct FakeService {
    proxied: AtomicBool,
    proxy_clears: AtomicUsize,
    proxy_failures: AtomicUsize,
    landing_hits: AtomicUsize,
    api_hits: AtomicUsize,
    profile_hits: AtomicUsize,
    api: ApiReply,
    profiles: HashMap<String, Reply>,
}

impl FakeService {
    fn new(api: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            proxied: AtomicBool::new(false),
            proxy_clears: AtomicUsize::new(0),
            proxy_failures: AtomicUsize::new(0),
            landing_hits: AtomicUsize::new(0),
            api_hits: AtomicUsize::new(0),
            profile_hits: AtomicUsize::new(0),
            api: Box::new(api),
            profiles: HashMap::new(),
        }
    }

    fn behind_broken_proxy(self) -> Self {
        self.proxied.store(true, Ordering::SeqCst);
        self
    }

    fn with_profile(mut self, name: &str, reply: Reply) -> Self {
        self.profiles.insert(name.to_string(), reply);
        self
    }

    fn through_proxy(&self) -> Result<(), TransportError> {
        if self.proxied.load(Ordering::SeqCst) {
            self.proxy_failures.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::Proxy("connection refused".into()));
        }
        Ok(())
    }
}

impl Transport for FakeService {
    fn get(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        _timeout: Duration,
    ) -> Result<Reply, TransportError> {
        self.through_proxy()?;
        let path = url.trim_start_matches("https://www.instagram.com");
        if path == "/" {
            self.landing_hits.fetch_add(1, Ordering::SeqCst);
            return Ok(Reply::new(200, "<html></html>").with_cookie("csrftoken", "tok"));
        }
        self.profile_hits.fetch_add(1, Ordering::SeqCst);
        let name = path.trim_matches('/');
        Ok(self
            .profiles
            .get(name)
            .cloned()
            .unwrap_or_else(|| Reply::new(404, "")))
    }

    fn post_form(
        &self,
        _url: &str,
        _headers: &[(&str, &str)],
        form: &[(&str, &str)],
        _timeout: Duration,
    ) -> Result<Reply, TransportError> {
        self.through_proxy()?;
        self.api_hits.fetch_add(1, Ordering::SeqCst);
        let username = form
            .iter()
            .find(|(k, _)| *k == "username")
            .map(|(_, v)| *v)
            .unwrap_or_default();
        Ok((self.api)(username))
    }

    fn clear_proxy(&self) {
        self.proxy_clears.fetch_add(1, Ordering::SeqCst);
        self.proxied.store(false, Ordering::SeqCst);
    }
}

fn quick_settings() -> Settings {
    Settings {
        request_delay: DelayRange::ZERO,
        pacing: DelayRange::ZERO,
        retry: RetryPolicy::default().without_backoff(),
        ..Settings::default()
    }
}

fn free_if_prefixed(name: &str) -> Reply {
    if name.starts_with("free") {
        Reply::new(200, r#"{"available":true}"#)
    } else {
        Reply::new(200, r#"{"available":false}"#)
    }
}

fn name(raw: &str) -> CandidateName {
    CandidateName::parse(raw).unwrap()
}

#[test]
fn proxy_failure_demotes_to_direct_and_still_decides() {
    let service = Arc::new(FakeService::new(free_if_prefixed).behind_broken_proxy());
    let checker = Checker::from_settings(Arc::clone(&service) as Arc<dyn Transport>, &quick_settings());

    let mut results = ResultSet::new();
    let report = Dispatcher::new(&checker)
        .with_workers(1)
        .run(&["free.one", "taken_two", "free3"], &mut results);

    assert_eq!(report.recorded, 3);
    assert_eq!(service.proxy_clears.load(Ordering::SeqCst), 1);
    assert_eq!(service.proxy_failures.load(Ordering::SeqCst), 1);
    assert_eq!(results.available().len(), 2);
    assert_eq!(results.unavailable().len(), 1);
    assert!(results.iter().all(|o| o.method == Method::Primary));
}

#[test]
fn throttled_api_falls_back_to_profile_pages() {
    let owned = r#"<script>{"username":"owner","biography":"","profile_pic_url":""}</script>"#;
    let service = Arc::new(
        FakeService::new(|_| Reply::new(429, "")).with_profile("owner", Reply::new(200, owned)),
    );
    let checker = Checker::from_settings(Arc::clone(&service) as Arc<dyn Transport>, &quick_settings());

    let ghost = checker.check_name(&name("ghost"));
    let owner = checker.check_name(&name("owner"));

    assert_eq!(ghost.availability, Availability::Available);
    assert_eq!(ghost.method, Method::Secondary);
    assert_eq!(owner.availability, Availability::Taken);
    assert_eq!(owner.method, Method::Secondary);
    // three attempts per handle before giving up on the api
    assert_eq!(service.api_hits.load(Ordering::SeqCst), 6);
    assert_eq!(service.profile_hits.load(Ordering::SeqCst), 2);
}

#[test]
fn decisive_api_answer_never_reads_the_profile() {
    let service = Arc::new(FakeService::new(free_if_prefixed));
    let checker = Checker::from_settings(Arc::clone(&service) as Arc<dyn Transport>, &quick_settings());

    let outcome = checker.check_name(&name("freebie"));
    assert_eq!(outcome.availability, Availability::Available);
    assert_eq!(outcome.detail, "available (api)");
    assert_eq!(service.api_hits.load(Ordering::SeqCst), 1);
    assert_eq!(service.profile_hits.load(Ordering::SeqCst), 0);
}

#[test]
fn api_disabled_goes_straight_to_profiles() {
    let service = Arc::new(FakeService::new(free_if_prefixed));
    let settings = Settings {
        use_primary: false,
        ..quick_settings()
    };
    let checker = Checker::from_settings(Arc::clone(&service) as Arc<dyn Transport>, &settings);

    let mut results = ResultSet::new();
    Dispatcher::new(&checker)
        .with_workers(2)
        .run(&["free1", "free2", "free3"], &mut results);

    assert_eq!(service.api_hits.load(Ordering::SeqCst), 0);
    assert_eq!(service.landing_hits.load(Ordering::SeqCst), 0);
    assert_eq!(service.profile_hits.load(Ordering::SeqCst), 3);
    assert!(results.iter().all(|o| o.method == Method::Secondary));
}

#[test]
fn profile_only_run_drops_a_broken_proxy() {
    let service = Arc::new(FakeService::new(free_if_prefixed).behind_broken_proxy());
    let settings = Settings {
        use_primary: false,
        ..quick_settings()
    };
    let checker = Checker::from_settings(Arc::clone(&service) as Arc<dyn Transport>, &settings);

    let mut results = ResultSet::new();
    Dispatcher::new(&checker)
        .with_workers(1)
        .run(&["ghost1", "ghost2"], &mut results);

    assert_eq!(service.proxy_clears.load(Ordering::SeqCst), 1);
    assert_eq!(results.available().len(), 2);
    assert!(
        results
            .iter()
            .all(|o| !o.detail.starts_with("undetermined")),
        "{results:?}"
    );
}

#[test]
fn throttled_api_reports_rate_limiting_before_fallback() {
    use handle_avail::check::Probe;
    use handle_avail::error::ProbeError;
    use handle_avail::outcome::Verdict;
    use handle_avail::primary::PrimaryProbe;

    let service = Arc::new(FakeService::new(|_| Reply::new(429, "")));
    let settings = quick_settings();
    let probe = PrimaryProbe::new(
        Arc::clone(&service) as Arc<dyn Transport>,
        settings.endpoints.clone(),
        settings.primary_timeout,
    )
    .with_retry(settings.retry);

    let Verdict::Unknown(reason) = probe.probe(&name("busy")) else {
        panic!("a throttled api never decides");
    };
    assert!(matches!(reason.last_failure(), ProbeError::RateLimited(429)));
    assert!(reason.to_string().contains("primary exhausted after 3 attempts"));
}

#[test]
fn undecidable_handle_is_counted_as_taken() {
    let service = Arc::new(
        FakeService::new(|_| Reply::new(500, "")).with_profile("murky", Reply::new(503, "")),
    );
    let checker = Checker::from_settings(Arc::clone(&service) as Arc<dyn Transport>, &quick_settings());

    let outcome = checker.check_name(&name("murky"));
    assert_eq!(outcome.availability, Availability::Taken);
    assert!(outcome.detail.starts_with("undetermined"), "{}", outcome.detail);
}

struct Mixed;

impl Check for Mixed {
    fn check(&self, name: &CandidateName) -> Result<CheckOutcome, CheckFailure> {
        match name.as_str() {
            "c1" => Ok(CheckOutcome::decided(
                "c1",
                Availability::Available,
                "stub",
                Method::Primary,
            )),
            "c2" => Ok(CheckOutcome::decided(
                "c2",
                Availability::Taken,
                "stub",
                Method::Primary,
            )),
            _ => panic!("boom"),
        }
    }
}

#[test]
fn worker_fault_is_recorded_as_an_error() {
    let mut results = ResultSet::new();
    Dispatcher::new(&Mixed).run(&["c1", "c2", "c3"], &mut results);

    assert_eq!(results.available()[0].name, "c1");
    assert_eq!(results.unavailable()[0].name, "c2");
    assert_eq!(results.errors()[0].name, "c3");
    let stats = results.stats();
    assert_eq!(stats.total, 3);
    assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
}

#[test]
fn session_rejects_unknown_proxy_scheme() {
    assert!(Session::new(Some("ftp://example.com:21")).is_err());
    assert!(Session::new(None).unwrap().proxy().is_none());
}

#[test]
#[ignore] // requires network access
fn well_known_handle_is_taken() {
    let session = Arc::new(Session::direct());
    let checker = Checker::from_settings(session, &quick_settings());
    let outcome = checker.check_name(&name("instagram"));
    assert_eq!(outcome.availability, Availability::Taken);
}
