//! Download orchestration: the provider chain executor and the progress
//! updater that keeps the status message alive during long downloads.

pub mod executor;
pub mod progress;

pub use executor::{classify_error, ChainExecutor, ChainFailure, ErrorClass, ProviderAttempt};
pub use progress::ProgressHandle;
