//! Preset registry for the provisioner.
//!
//! Maps every [`PresetKind`](provisioner_shared_types::PresetKind) to a
//! [`PresetHandler`] that knows the image to run, the ports to publish, how
//! to tell the service is healthy and how to load seed data into it.
//!
//! Seeding talks to each service through its native client:
//! - SQL family: `tokio-postgres`, `mysql_async`, `tiberius`
//! - Mongo: `mongodb`
//! - Redis / Memcached: `redis`, `memcache`
//! - RabbitMQ / Kafka: `lapin`, `rskafka`
//! - Splunk, Localstack, Elasticsearch, k3s: HTTP via `reqwest`

pub mod error;
pub mod handler;
pub mod presets;
pub mod registry;
pub mod seed_files;

pub use error::{PresetMismatch, ProbeFailure, SeedError};
pub use handler::{ImageSpec, PresetHandler};
pub use registry::PresetRegistry;
