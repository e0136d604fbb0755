//! Long-running pipeline tasks.
//!
//! - [`sampler::SamplingWorker`]: sensor producer, paced by [`crate::coordination::SamplePeriod`]
//! - [`persistence::PersistenceWorker`]: buffer consumer and storage state machine

pub mod persistence;
pub mod sampler;

pub use persistence::{PersistencePhase, PersistenceStats, PersistenceWorker};
pub use sampler::{SampleOutcome, SamplingWorker};
