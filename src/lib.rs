#![warn(missing_docs, missing_debug_implementations)]

//! Check whether account handles are free on an Instagram-style service.
//!
//! Each handle is validated locally, then looked up with two independent
//! strategies: the structured signup check endpoint (with a fresh
//! anti-forgery token per attempt, bounded retries and jittered backoff)
//! and, when that cannot decide, a heuristic read of the public profile
//! page. A [`batch::Dispatcher`] runs the combination over many handles on
//! a small pool of worker threads, pacing requests and isolating faults, and
//! files every outcome into a [`results::ResultSet`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use handle_avail::batch::Dispatcher;
//! use handle_avail::check::Checker;
//! use handle_avail::config::Settings;
//! use handle_avail::results::ResultSet;
//! use handle_avail::session::Session;
//!
//! let settings = Settings::default();
//! let session = Arc::new(Session::new(settings.proxy.as_deref()).unwrap());
//! let checker = Checker::from_settings(session, &settings);
//!
//! let mut results = ResultSet::new();
//! Dispatcher::new(&checker)
//!     .with_workers(settings.workers)
//!     .with_pacing(settings.pacing)
//!     .run(&["some.handle", "another_one"], &mut results);
//!
//! let stats = results.stats();
//! println!("{} available of {}", stats.available, stats.total);
//! ```

pub mod batch;
pub mod check;
pub mod config;
pub mod error;
pub mod export;
pub mod outcome;
pub mod primary;
pub mod results;
pub mod secondary;
pub mod session;
pub mod source;
pub mod validate;
