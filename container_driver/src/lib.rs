//! Container driver implementations for the provisioner.
//!
//! This crate provides implementations of the `ContainerDriver` trait:
//! - `MockDriver`: In-memory mock for testing (default)
//! - `DockerDriver`: Docker Engine API through bollard (`docker` feature, default)

#[cfg(feature = "mock-driver")]
pub mod mock;

#[cfg(feature = "docker")]
pub mod docker;

// Re-export common types
pub use container_driver_interface::{
    ContainerDriver, ContainerHandle, ContainerSpec, DriverError, DriverResult,
};

#[cfg(feature = "mock-driver")]
pub use mock::{MockDriver, MockOperation};

#[cfg(feature = "docker")]
pub use docker::{DockerDriver, DockerDriverConfig};
