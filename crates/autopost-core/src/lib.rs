//! # Autopost Core
//!
//! Shared foundation for the Autopost dispatch engine: the task data model,
//! the configuration system, the error type, and the boundary traits
//! (`Sender`, `NotifySink`) that keep transport details out of the engine.

pub mod config;
pub mod error;
pub mod task;
pub mod traits;

pub use config::{AutopostConfig, EngineConfig, NotifyConfig, RetryPolicy, TelegramConfig};
pub use error::{AutopostError, Result};
pub use task::{Destination, Payload, SendOutcome, Task, TaskDefinition};
pub use traits::{NotifySink, Sender};
