#![forbid(unsafe_code)]

//! Core domain model and live workout session engine for Repset.
//!
//! This crate provides:
//! - Plan and session snapshot types
//! - Superset-aware set sequencing
//! - Session lifecycle controller with rest and workout timers
//! - Template back-propagation
//! - Companion watch mirror and its wire records
//! - Persistence (plan document, session log, timer anchors)
//! - History queries, progress comparison and CSV export

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod clock;
pub mod sequencing;
pub mod rest_timer;
pub mod services;
pub mod store;
pub mod template;
pub mod events;
pub mod controller;
pub mod watch;
pub mod history;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use clock::{Clock, SystemClock, TickHandle, Ticker};
pub use controller::SessionController;
pub use events::{HealthSyncStatus, SessionEvent, SessionObserver};
pub use sequencing::AdvanceDecision;
pub use services::{Services, Store};
pub use store::{FileAnchorStore, FileStore};
pub use template::apply_session_to_routine;
