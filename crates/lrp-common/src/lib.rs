//! Common types for the LRP bridge: model, errors, vocabulary and configuration

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod labels;
pub mod model;
pub mod quantity;
pub mod telemetry;

pub use config::OperatorConfig;
pub use error::Error;
pub use model::{
    HealthCheck, HealthCheckType, Instance, InstanceState, Lrp, LrpIdentifier, LrpMetadata,
    PrivateRegistry, VolumeMount,
};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
