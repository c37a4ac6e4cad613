//! Message brokers: RabbitMQ and Kafka.
//!
//! Both declare every queue/topic they are told about or that a message
//! refers to, then publish file records first and literal messages after, in
//! order.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use provisioner_shared_types::{
    Address, KafkaPreset, PortSpec, Preset, PresetKind, ProvisionError, QueueMessage,
    RabbitmqPreset, TopicMessage, DEFAULT_PORT,
};
use rskafka::client::partition::{Compression, UnknownTopicHandling};
use rskafka::client::{Client as KafkaClient, ClientBuilder};
use rskafka::record::Record;
use tracing::{debug, info};

use super::{default_endpoint, endpoint, expect_preset, seed_endpoint, CONNECT_TIMEOUT};
use crate::error::{ProbeFailure, SeedError};
use crate::handler::{ImageSpec, PresetHandler};
use crate::seed_files::files_then_literals;

// ==================== RabbitMQ ====================

const RABBITMQ_DEFAULT_USER: &str = "guest";
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

pub struct RabbitmqHandler;

impl RabbitmqHandler {
    fn credentials(p: &RabbitmqPreset) -> (&str, &str) {
        (
            p.user.as_deref().unwrap_or(RABBITMQ_DEFAULT_USER),
            p.password.as_deref().unwrap_or(RABBITMQ_DEFAULT_USER),
        )
    }

    async fn connect(p: &RabbitmqPreset, endpoint: &str) -> Result<Connection, String> {
        let (user, password) = Self::credentials(p);
        let uri = format!("amqp://{user}:{password}@{endpoint}/%2f");
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        tokio::time::timeout(CONNECT_TIMEOUT, Connection::connect(&uri, properties))
            .await
            .map_err(|_| "rabbitmq connect timed out".to_string())?
            .map_err(|e| e.to_string())
    }
}

/// Queues to declare: the explicit list, then any queue a message names.
fn queues_to_declare(explicit: &[String], messages: &[QueueMessage]) -> Vec<String> {
    unique_in_order(explicit.iter().chain(messages.iter().map(|m| &m.queue)))
}

fn unique_in_order<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for name in names {
        if !unique.contains(name) {
            unique.push(name.clone());
        }
    }
    unique
}

#[async_trait]
impl PresetHandler for RabbitmqHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Rabbitmq
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        let p = expect_preset!(preset, Rabbitmq, self.kind())?;
        let (user, password) = Self::credentials(p);
        Ok(ImageSpec::new("docker.io/library/rabbitmq", "alpine")
            .with_port(DEFAULT_PORT, PortSpec::tcp(5672))
            .with_env("RABBITMQ_DEFAULT_USER", user)
            .with_env("RABBITMQ_DEFAULT_PASS", password))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Rabbitmq, self.kind())?;
        if p.user.is_some() != p.password.is_some() {
            return Err(ProvisionError::validation(
                "rabbitmq: user and password must be set together",
            ));
        }
        if p.messages.iter().any(|m| m.queue.is_empty()) {
            return Err(ProvisionError::validation("rabbitmq: every message needs a queue"));
        }
        Ok(())
    }

    async fn health_check(&self, preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let p = expect_preset!(preset, Rabbitmq, self.kind())?;
        let endpoint = default_endpoint(address)?;
        let connection = Self::connect(p, &endpoint).await.map_err(ProbeFailure::new)?;
        connection
            .close(200, "OK")
            .await
            .map_err(ProbeFailure::context("close"))
    }

    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Rabbitmq, self.kind())?;
        let kind = self.kind();
        let messages: Vec<QueueMessage> = files_then_literals(&p.messages_files, &p.messages)?;
        let queues = queues_to_declare(&p.queues, &messages);
        if queues.is_empty() {
            return Ok(());
        }

        let endpoint = seed_endpoint(address, DEFAULT_PORT, kind)?;
        let connection = Self::connect(p, &endpoint)
            .await
            .map_err(SeedError::connection(kind))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(SeedError::connection(kind))?;

        for queue in &queues {
            channel
                .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        for message in &messages {
            let content_type = message
                .content_type
                .as_deref()
                .filter(|ct| !ct.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE);

            channel
                .basic_publish(
                    "",
                    &message.queue,
                    BasicPublishOptions::default(),
                    message.body.as_bytes(),
                    BasicProperties::default().with_content_type(content_type.into()),
                )
                .await
                .map_err(SeedError::rejected(kind))?
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        connection
            .close(200, "OK")
            .await
            .map_err(SeedError::connection(kind))?;

        info!(queues = queues.len(), messages = messages.len(), "RabbitMQ seeded");
        Ok(())
    }
}

// ==================== Kafka ====================

const BROKER_PORT_NAME: &str = "broker";
const BROKER_PORT: u16 = 49092;

pub struct KafkaHandler;

impl KafkaHandler {
    async fn connect(address: &Address) -> Result<KafkaClient, String> {
        let broker = endpoint(address, BROKER_PORT_NAME).map_err(|e| e.to_string())?;
        tokio::time::timeout(CONNECT_TIMEOUT, ClientBuilder::new(vec![broker]).build())
            .await
            .map_err(|_| "kafka connect timed out".to_string())?
            .map_err(|e| e.to_string())
    }
}

/// Topics to create with their partition counts: the explicit list, any
/// topic a message names, then the configured topics. A configured topic
/// keeps its own partition count; every other topic gets one.
fn topics_to_create(p: &KafkaPreset, messages: &[TopicMessage]) -> Vec<(String, i32)> {
    let names = p
        .topics
        .iter()
        .chain(messages.iter().map(|m| &m.topic))
        .chain(p.topic_configs.iter().map(|c| &c.topic));

    unique_in_order(names)
        .into_iter()
        .map(|name| {
            let partitions = p
                .topic_configs
                .iter()
                .find(|config| config.topic == name)
                .map_or(1, |config| config.num_partitions);
            (name, partitions)
        })
        .collect()
}

fn to_record(message: &TopicMessage) -> Record {
    let timestamp = message
        .time
        .map(DateTime::<Utc>::from_timestamp_nanos)
        .unwrap_or_else(Utc::now);

    Record {
        key: message.key.as_ref().map(|key| key.as_bytes().to_vec()),
        value: Some(message.value.as_bytes().to_vec()),
        headers: BTreeMap::new(),
        timestamp,
    }
}

#[async_trait]
impl PresetHandler for KafkaHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Kafka
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        expect_preset!(preset, Kafka, self.kind())?;
        Ok(ImageSpec::new("docker.io/lensesio/fast-data-dev", "3.6.1-L0")
            .with_port(BROKER_PORT_NAME, PortSpec::tcp(BROKER_PORT).fixed())
            .with_port("zookeeper", PortSpec::tcp(2181))
            .with_port("web", PortSpec::tcp(3030))
            .with_port("registry", PortSpec::tcp(8081))
            .with_env("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
            .with_env("ADV_HOST", "127.0.0.1")
            .with_env("BROKER_PORT", BROKER_PORT.to_string())
            .with_env("RUNTESTS", "0")
            .with_env("RUNNING_SAMPLEDATA", "0")
            .with_env("SAMPLEDATA", "0"))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p: &KafkaPreset = expect_preset!(preset, Kafka, self.kind())?;
        if p.messages.iter().any(|m| m.topic.is_empty()) {
            return Err(ProvisionError::validation("kafka: every message needs a topic"));
        }
        for config in &p.topic_configs {
            if config.topic.is_empty() {
                return Err(ProvisionError::validation("kafka: every topic config needs a topic"));
            }
            if config.num_partitions < 1 {
                return Err(ProvisionError::validation(format!(
                    "kafka: topic {} needs at least one partition",
                    config.topic
                )));
            }
        }
        Ok(())
    }

    async fn health_check(&self, _preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let client = Self::connect(address).await.map_err(ProbeFailure::new)?;
        client
            .list_topics()
            .await
            .map(|_| ())
            .map_err(ProbeFailure::context("list topics"))
    }

    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Kafka, self.kind())?;
        let kind = self.kind();
        let messages: Vec<TopicMessage> = files_then_literals(&p.messages_files, &p.messages)?;
        let topics = topics_to_create(p, &messages);
        if topics.is_empty() {
            return Ok(());
        }

        let client = Self::connect(address)
            .await
            .map_err(SeedError::connection(kind))?;

        let existing: BTreeSet<String> = client
            .list_topics()
            .await
            .map_err(SeedError::connection(kind))?
            .into_iter()
            .map(|topic| topic.name)
            .collect();

        let controller = client
            .controller_client()
            .map_err(SeedError::connection(kind))?;
        // a single broker cannot hold more than one replica
        for (topic, partitions) in topics.iter().filter(|(t, _)| !existing.contains(t)) {
            debug!(topic = %topic, partitions, "Creating topic");
            controller
                .create_topic(topic.as_str(), *partitions, 1, 5_000)
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        // one produce call per message keeps the declared order across topics
        for message in &messages {
            let partition = client
                .partition_client(message.topic.clone(), 0, UnknownTopicHandling::Retry)
                .await
                .map_err(SeedError::connection(kind))?;
            partition
                .produce(vec![to_record(message)], Compression::NoCompression)
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        info!(topics = topics.len(), messages = messages.len(), "Kafka seeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_message(queue: &str) -> QueueMessage {
        QueueMessage {
            queue: queue.into(),
            content_type: None,
            body: "hello".into(),
        }
    }

    #[test]
    fn test_queues_include_message_targets_once() {
        let queues = queues_to_declare(
            &["events".to_string()],
            &[queue_message("jobs"), queue_message("events"), queue_message("jobs")],
        );
        assert_eq!(queues, vec!["events", "jobs"]);
    }

    #[test]
    fn test_topics_include_message_targets_once() {
        let message = TopicMessage {
            topic: "orders".into(),
            value: "1".into(),
            ..Default::default()
        };
        let preset = KafkaPreset {
            topics: vec!["orders".to_string(), "audit".to_string()],
            ..Default::default()
        };
        let topics = topics_to_create(&preset, &[message]);
        assert_eq!(topics, vec![("orders".to_string(), 1), ("audit".to_string(), 1)]);
    }

    #[test]
    fn test_topic_configs_set_partitions() {
        let preset: KafkaPreset = serde_json::from_value(serde_json::json!({
            "topics": ["orders"],
            "topic_configs": [
                {"topic": "orders", "num_partitions": 4},
                {"Topic": "metrics", "NumPartitions": 2}
            ]
        }))
        .unwrap();

        let topics = topics_to_create(&preset, &[]);
        assert_eq!(topics, vec![("orders".to_string(), 4), ("metrics".to_string(), 2)]);
    }

    #[test]
    fn test_topic_config_needs_partitions() {
        let preset = Preset::Kafka(KafkaPreset {
            topic_configs: vec![provisioner_shared_types::TopicConfig {
                topic: "orders".into(),
                num_partitions: 0,
            }],
            ..Default::default()
        });
        assert!(KafkaHandler.validate(&preset).is_err());
    }

    #[test]
    fn test_record_time_is_nanoseconds() {
        let record = to_record(&TopicMessage {
            topic: "t".into(),
            key: Some("k".into()),
            value: "v".into(),
            time: Some(1_600_000_000_000_000_000),
        });
        assert_eq!(record.key.as_deref(), Some(b"k".as_slice()));
        assert_eq!(record.timestamp.timestamp(), 1_600_000_000);
        assert_eq!(record.timestamp.to_rfc3339(), "2020-09-13T12:26:40+00:00");
    }

    #[test]
    fn test_kafka_broker_port_is_fixed() {
        let spec = KafkaHandler
            .image_spec(&Preset::Kafka(KafkaPreset::default()))
            .unwrap();
        assert_eq!(spec.ports[BROKER_PORT_NAME].host_port, Some(BROKER_PORT));
        assert_eq!(spec.ports["web"].host_port, None);
        assert!(spec.env.contains(&"BROKER_PORT=49092".to_string()));
    }

    #[test]
    fn test_rabbitmq_default_credentials() {
        let spec = RabbitmqHandler
            .image_spec(&Preset::Rabbitmq(RabbitmqPreset::default()))
            .unwrap();
        assert!(spec.env.contains(&"RABBITMQ_DEFAULT_USER=guest".to_string()));
        assert!(spec.env.contains(&"RABBITMQ_DEFAULT_PASS=guest".to_string()));
    }

    #[test]
    fn test_message_without_queue_is_rejected() {
        let preset = Preset::Rabbitmq(RabbitmqPreset {
            messages: vec![queue_message("")],
            ..Default::default()
        });
        assert!(RabbitmqHandler.validate(&preset).is_err());
    }
}
