//! Alert handling for the Vigil engine.
//!
//! Observations from the tracker and recognition layers are merged into
//! per-track [`AlertRecord`]s by [`AlertLifecycle`], which decides whether
//! a change is worth pushing to subscribers through the [`EventHub`].
//!
//! [`AlertRecord`]: vigil_models::AlertRecord

pub mod error;
pub mod hub;
pub mod images;
pub mod lifecycle;
mod metrics;
pub mod repository;
pub mod retention;

pub use error::{AlertError, AlertResult};
pub use hub::EventHub;
pub use images::{ImageRefs, ImageStore};
pub use lifecycle::{AlertLifecycle, AlertObservation, LifecycleOutcome, Transition};
pub use repository::{AlertQuery, AlertRepository, InMemoryAlertRepository};
pub use retention::{cleanup_capture_dirs, run_retention, RetentionReport};
