pub mod bom;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod merge;
pub mod model;
pub mod platform;
pub mod processing;
pub mod publish;
pub mod reference;
pub mod resolve;
pub mod traits;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types for convenience
pub use config::{ConfigError, ProcessingConfig, RootSource};
pub use error::TransportError;
pub use executor::*;
pub use model::*;
pub use traits::*;
pub use transport::*;
