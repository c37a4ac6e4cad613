//! Provisioning engine: readiness gating, the instance lifecycle and the
//! HTTP surface in front of it.
//!
//! ```text
//! POST /start/:kind ──► LifecycleManager::provision
//!                           │ create ─► start ─► address   (ContainerDriver)
//!                           │ wait_ready                   (ReadinessProber)
//!                           │ seed                         (PresetRegistry)
//!                           ▼
//!                       instance table ◄── POST /stop
//! ```

pub mod lifecycle;
pub mod readiness;

#[cfg(feature = "rest-api")]
pub mod api;

pub use lifecycle::{
    Instance, InstanceView, LifecycleConfig, LifecycleManager, ProvisionFailure, RetryPolicy,
};
pub use readiness::ReadinessProber;
