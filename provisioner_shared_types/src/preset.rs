//! Preset definitions.
//!
//! A [`Preset`] describes one flavour of backing service together with the
//! data it should be seeded with. Exactly one variant is active per request
//! and each variant only carries the fields meaningful for its kind; fields
//! belonging to other kinds are ignored when decoding.
//!
//! Field names are snake_case; the camelCase spellings used by some clients
//! are accepted as aliases.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

/// The closed set of supported backing services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Mongo,
    Mysql,
    Mariadb,
    Mssql,
    Postgres,
    Redis,
    Memcached,
    Splunk,
    Localstack,
    Rabbitmq,
    Kafka,
    Elastic,
    Kubernetes,
    Cockroachdb,
}

impl PresetKind {
    pub const ALL: [PresetKind; 14] = [
        PresetKind::Mongo,
        PresetKind::Mysql,
        PresetKind::Mariadb,
        PresetKind::Mssql,
        PresetKind::Postgres,
        PresetKind::Redis,
        PresetKind::Memcached,
        PresetKind::Splunk,
        PresetKind::Localstack,
        PresetKind::Rabbitmq,
        PresetKind::Kafka,
        PresetKind::Elastic,
        PresetKind::Kubernetes,
        PresetKind::Cockroachdb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PresetKind::Mongo => "mongo",
            PresetKind::Mysql => "mysql",
            PresetKind::Mariadb => "mariadb",
            PresetKind::Mssql => "mssql",
            PresetKind::Postgres => "postgres",
            PresetKind::Redis => "redis",
            PresetKind::Memcached => "memcached",
            PresetKind::Splunk => "splunk",
            PresetKind::Localstack => "localstack",
            PresetKind::Rabbitmq => "rabbitmq",
            PresetKind::Kafka => "kafka",
            PresetKind::Elastic => "elastic",
            PresetKind::Kubernetes => "kubernetes",
            PresetKind::Cockroachdb => "cockroachdb",
        }
    }
}

impl fmt::Display for PresetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresetKind {
    type Err = ProvisionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let normalized = name.to_ascii_lowercase();
        let kind = match normalized.as_str() {
            "k3s" => PresetKind::Kubernetes,
            "cockroach" => PresetKind::Cockroachdb,
            "elasticsearch" => PresetKind::Elastic,
            other => PresetKind::ALL
                .into_iter()
                .find(|kind| kind.as_str() == other)
                .ok_or_else(|| ProvisionError::PresetNotFound(name.to_string()))?,
        };
        Ok(kind)
    }
}

// ============================================================================
// Per-kind preset payloads
// ============================================================================

/// MongoDB; `data_path` holds one sub-directory per database and one
/// line-delimited JSON file per collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoPreset {
    pub version: Option<String>,
    #[serde(alias = "dataPath")]
    pub data_path: Option<PathBuf>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Shared by MySQL and MariaDB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlPreset {
    pub version: Option<String>,
    pub db: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub queries: Vec<String>,
    #[serde(alias = "queriesFiles")]
    pub queries_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MssqlPreset {
    pub version: Option<String>,
    pub db: Option<String>,
    pub password: Option<String>,
    /// Acceptance of the SQL Server EULA; must be `true`.
    pub license: bool,
    pub queries: Vec<String>,
    #[serde(alias = "queriesFiles")]
    pub queries_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresPreset {
    pub version: Option<String>,
    pub db: Option<String>,
    /// Extra superuser created next to `postgres`.
    pub user: Option<String>,
    pub password: Option<String>,
    pub queries: Vec<String>,
    #[serde(alias = "queriesFiles")]
    pub queries_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CockroachdbPreset {
    pub version: Option<String>,
    pub db: Option<String>,
    pub queries: Vec<String>,
    #[serde(alias = "queriesFiles")]
    pub queries_files: Vec<PathBuf>,
}

/// Redis; `values` accepts any JSON scalar and stores its string form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisPreset {
    pub version: Option<String>,
    pub values: BTreeMap<String, serde_json::Value>,
    /// Base64 encoded binary values.
    #[serde(alias = "byteValues")]
    pub byte_values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemcachedPreset {
    pub version: Option<String>,
    pub values: BTreeMap<String, String>,
    /// Base64 encoded binary values.
    #[serde(alias = "byteValues")]
    pub byte_values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplunkPreset {
    pub version: Option<String>,
    pub values: Vec<SplunkEvent>,
    /// Line-delimited [`SplunkEvent`] records, ingested before `values`.
    #[serde(alias = "valuesFile")]
    pub values_file: Option<PathBuf>,
    #[serde(alias = "acceptLicense")]
    pub accept_license: bool,
    #[serde(alias = "adminPassword")]
    pub admin_password: Option<String>,
}

/// One event sent to the Splunk HTTP event collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplunkEvent {
    pub event: String,
    pub index: String,
    pub source: String,
    pub sourcetype: String,
    /// Seconds since the epoch.
    pub time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalstackPreset {
    pub version: Option<String>,
    /// Sub-services to enable, e.g. `s3`, `sqs`.
    pub services: Vec<String>,
    /// Top-level directories become buckets.
    #[serde(alias = "s3Path")]
    pub s3_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RabbitmqPreset {
    pub version: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub queues: Vec<String>,
    pub messages: Vec<QueueMessage>,
    #[serde(alias = "messagesFiles")]
    pub messages_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueMessage {
    pub queue: String,
    #[serde(alias = "contentType")]
    pub content_type: Option<String>,
    #[serde(alias = "string_body", alias = "stringBody")]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaPreset {
    pub version: Option<String>,
    pub topics: Vec<String>,
    pub messages: Vec<TopicMessage>,
    #[serde(alias = "messagesFiles")]
    pub messages_files: Vec<PathBuf>,
    /// Topics that need more than one partition.
    #[serde(alias = "topicConfigs")]
    pub topic_configs: Vec<TopicConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    #[serde(alias = "Topic")]
    pub topic: String,
    #[serde(alias = "numPartitions", alias = "NumPartitions")]
    pub num_partitions: i32,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            num_partitions: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicMessage {
    pub topic: String,
    pub key: Option<String>,
    pub value: String,
    /// Nanoseconds since the epoch; defaults to the publish time.
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticPreset {
    pub version: Option<String>,
    /// Line-delimited JSON documents, indexed under the file stem.
    #[serde(alias = "inputFiles")]
    pub input_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesPreset {
    pub version: Option<String>,
    /// Host port of the API server; published 1:1.
    pub port: Option<u16>,
}

// ============================================================================
// The tagged union
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Preset {
    Mongo(MongoPreset),
    Mysql(MysqlPreset),
    Mariadb(MysqlPreset),
    Mssql(MssqlPreset),
    Postgres(PostgresPreset),
    Redis(RedisPreset),
    Memcached(MemcachedPreset),
    Splunk(SplunkPreset),
    Localstack(LocalstackPreset),
    Rabbitmq(RabbitmqPreset),
    Kafka(KafkaPreset),
    Elastic(ElasticPreset),
    Kubernetes(KubernetesPreset),
    Cockroachdb(CockroachdbPreset),
}

impl Preset {
    /// Decode the payload of a preset whose kind is already known (it comes
    /// from the route, not from the body). `null` decodes to all defaults.
    pub fn from_json(kind: PresetKind, value: serde_json::Value) -> serde_json::Result<Self> {
        let value = match value {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };

        let preset = match kind {
            PresetKind::Mongo => Preset::Mongo(serde_json::from_value(value)?),
            PresetKind::Mysql => Preset::Mysql(serde_json::from_value(value)?),
            PresetKind::Mariadb => Preset::Mariadb(serde_json::from_value(value)?),
            PresetKind::Mssql => Preset::Mssql(serde_json::from_value(value)?),
            PresetKind::Postgres => Preset::Postgres(serde_json::from_value(value)?),
            PresetKind::Redis => Preset::Redis(serde_json::from_value(value)?),
            PresetKind::Memcached => Preset::Memcached(serde_json::from_value(value)?),
            PresetKind::Splunk => Preset::Splunk(serde_json::from_value(value)?),
            PresetKind::Localstack => Preset::Localstack(serde_json::from_value(value)?),
            PresetKind::Rabbitmq => Preset::Rabbitmq(serde_json::from_value(value)?),
            PresetKind::Kafka => Preset::Kafka(serde_json::from_value(value)?),
            PresetKind::Elastic => Preset::Elastic(serde_json::from_value(value)?),
            PresetKind::Kubernetes => Preset::Kubernetes(serde_json::from_value(value)?),
            PresetKind::Cockroachdb => Preset::Cockroachdb(serde_json::from_value(value)?),
        };
        Ok(preset)
    }

    pub fn kind(&self) -> PresetKind {
        match self {
            Preset::Mongo(_) => PresetKind::Mongo,
            Preset::Mysql(_) => PresetKind::Mysql,
            Preset::Mariadb(_) => PresetKind::Mariadb,
            Preset::Mssql(_) => PresetKind::Mssql,
            Preset::Postgres(_) => PresetKind::Postgres,
            Preset::Redis(_) => PresetKind::Redis,
            Preset::Memcached(_) => PresetKind::Memcached,
            Preset::Splunk(_) => PresetKind::Splunk,
            Preset::Localstack(_) => PresetKind::Localstack,
            Preset::Rabbitmq(_) => PresetKind::Rabbitmq,
            Preset::Kafka(_) => PresetKind::Kafka,
            Preset::Elastic(_) => PresetKind::Elastic,
            Preset::Kubernetes(_) => PresetKind::Kubernetes,
            Preset::Cockroachdb(_) => PresetKind::Cockroachdb,
        }
    }

    /// Requested image tag, if any.
    pub fn version(&self) -> Option<&str> {
        let version = match self {
            Preset::Mongo(p) => &p.version,
            Preset::Mysql(p) | Preset::Mariadb(p) => &p.version,
            Preset::Mssql(p) => &p.version,
            Preset::Postgres(p) => &p.version,
            Preset::Redis(p) => &p.version,
            Preset::Memcached(p) => &p.version,
            Preset::Splunk(p) => &p.version,
            Preset::Localstack(p) => &p.version,
            Preset::Rabbitmq(p) => &p.version,
            Preset::Kafka(p) => &p.version,
            Preset::Elastic(p) => &p.version,
            Preset::Kubernetes(p) => &p.version,
            Preset::Cockroachdb(p) => &p.version,
        };
        version.as_deref().filter(|v| !v.is_empty())
    }

    /// The preset as it runs when an explicit image tag overrides its
    /// version. Handlers that branch on the version then see the tag.
    pub fn with_tag(mut self, tag: Option<&str>) -> Self {
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            let version = match &mut self {
                Preset::Mongo(p) => &mut p.version,
                Preset::Mysql(p) | Preset::Mariadb(p) => &mut p.version,
                Preset::Mssql(p) => &mut p.version,
                Preset::Postgres(p) => &mut p.version,
                Preset::Redis(p) => &mut p.version,
                Preset::Memcached(p) => &mut p.version,
                Preset::Splunk(p) => &mut p.version,
                Preset::Localstack(p) => &mut p.version,
                Preset::Rabbitmq(p) => &mut p.version,
                Preset::Kafka(p) => &mut p.version,
                Preset::Elastic(p) => &mut p.version,
                Preset::Kubernetes(p) => &mut p.version,
                Preset::Cockroachdb(p) => &mut p.version,
            };
            *version = Some(tag.to_string());
        }
        self
    }

    /// Every file or directory the preset reads during seeding.
    pub fn seed_paths(&self) -> Vec<&Path> {
        match self {
            Preset::Mongo(p) => p.data_path.iter().map(PathBuf::as_path).collect(),
            Preset::Mysql(p) | Preset::Mariadb(p) => p.queries_files.iter().map(PathBuf::as_path).collect(),
            Preset::Mssql(p) => p.queries_files.iter().map(PathBuf::as_path).collect(),
            Preset::Postgres(p) => p.queries_files.iter().map(PathBuf::as_path).collect(),
            Preset::Cockroachdb(p) => p.queries_files.iter().map(PathBuf::as_path).collect(),
            Preset::Splunk(p) => p.values_file.iter().map(PathBuf::as_path).collect(),
            Preset::Localstack(p) => p.s3_path.iter().map(PathBuf::as_path).collect(),
            Preset::Rabbitmq(p) => p.messages_files.iter().map(PathBuf::as_path).collect(),
            Preset::Kafka(p) => p.messages_files.iter().map(PathBuf::as_path).collect(),
            Preset::Elastic(p) => p.input_files.iter().map(PathBuf::as_path).collect(),
            Preset::Redis(_) | Preset::Memcached(_) | Preset::Kubernetes(_) => Vec::new(),
        }
    }
}
