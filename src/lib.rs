//! A background job engine.
//!
//! Jobs are queued in one of two queues (durable or in-memory), claimed and
//! run by a pool of consumers, and may be cancelled until a consumer claims
//! them, either on the caller's thread or on a dedicated background thread.
//! Consumers are woken through a [`timer::DispatchTimer`], which can defer
//! and batch wake-ups or re-check the queues periodically.
pub mod background;
pub mod cancel;
pub mod config;
mod consumer;
pub mod error;
pub mod manager;
pub mod queue;
pub mod timer;
pub mod types;

pub use cancel::{CancelCallback, CancelOutcome, CancellationCoordinator};
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use manager::{JobManager, ManagerStats};
pub use types::{Job, JobId, Params};
