//! Face recognition decision layer.
//!
//! - [`FaceDatabase`]: in-process registry of normalised embeddings
//! - [`RecognitionClient`]: HTTP client for a CompreFace-style backend
//! - [`FaceMatcher`]: the "match this face" capability, local or remote
//! - [`AlertCooldownManager`]: per (camera, subject) re-alert suppression
//! - [`RecognitionGateway`]: bounded-concurrency matching plus alert decisions

pub mod client;
pub mod config;
pub mod cooldown;
pub mod database;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod matcher;
mod metrics;
pub mod types;

pub use client::{RecognitionClient, RecognitionClientConfig};
pub use config::RecognizerConfig;
pub use cooldown::{AlertCooldownManager, CooldownSubject};
pub use database::{DatabaseStats, FaceDatabase, PersonFeatures};
pub use error::{RecognitionError, RecognitionResult};
pub use gate::ConcurrencyGate;
pub use gateway::{AlertDecision, GatewayStats, Recognition, RecognitionGateway};
pub use matcher::{FaceEmbedder, FaceMatcher, LocalMatcher, RemoteMatcher, SubjectIdentity};
