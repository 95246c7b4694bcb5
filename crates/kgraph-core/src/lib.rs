//! Configuration, task queue and the `GraphService` facade.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod queue;
pub mod service;

pub use config::Config;
pub use error::{Result, ServiceError};
pub use service::GraphService;
