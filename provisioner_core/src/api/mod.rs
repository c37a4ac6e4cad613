//! REST API module for the provisioner.
//!
//! Provides HTTP endpoints for starting and stopping preset containers.
//!
//! # Endpoints
//!
//! ## Instances
//! - `POST /start/:kind` - Provision a preset; body `{"options": {...}, "preset": {...}}`
//! - `POST /stop` - Stop and remove an instance; body `{"id": "..."}`
//! - `GET /instances` - List running instances
//! - `GET /instances/:id` - Get a running instance
//!
//! ## Server
//! - `GET /presets` - List the preset kinds that can be provisioned
//! - `GET /health` - Liveness
//!
//! A successful start answers `{"id", "host", "ports": {name: {"protocol", "port"}}}`.
//! Failures answer `{"error", "code", "details"?}`; provisioning failures
//! carry the tail of the container output in `details.container_logs`.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use provisioner_core::api::{ApiServer, ApiServerConfig, ApiState};
//! use provisioner_core::LifecycleManager;
//! # use container_driver_interface::ContainerDriver;
//! # fn driver() -> Arc<dyn ContainerDriver> { unimplemented!() }
//! use preset_registry::PresetRegistry;
//!
//! let lifecycle = LifecycleManager::new(driver(), Arc::new(PresetRegistry::builtin()));
//! let server = ApiServer::new(ApiServerConfig::default(), ApiState::new(lifecycle));
//! server
//!     .serve_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::{build_router, ApiServer, ApiServerConfig, DEFAULT_API_PORT};
pub use state::ApiState;
