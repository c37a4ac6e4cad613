use async_trait::async_trait;
use provisioner_shared_types::{Address, PortSpec, Preset, PresetKind, ProvisionError, DEFAULT_PORT};
use tracing::{debug, info};

use super::{default_endpoint, ensure_success, expect_preset, http_client, seed_endpoint};
use crate::error::{ProbeFailure, SeedError};
use crate::handler::{ImageSpec, PresetHandler};
use crate::seed_files::{file_stem, read_json_lines};

pub struct ElasticHandler;

#[async_trait]
impl PresetHandler for ElasticHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Elastic
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        expect_preset!(preset, Elastic, self.kind())?;
        Ok(ImageSpec::new("docker.io/library/elasticsearch", "7.9.2")
            .with_port(DEFAULT_PORT, PortSpec::tcp(9200))
            .with_env("discovery.type", "single-node"))
    }

    async fn health_check(&self, _preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let client = http_client().map_err(ProbeFailure::context("http client"))?;
        let response = client
            .get(format!("http://{}/_cluster/health", default_endpoint(address)?))
            .send()
            .await
            .map_err(ProbeFailure::context("cluster health"))?;
        ensure_success(response)
            .await
            .map(|_| ())
            .map_err(ProbeFailure::context("cluster health"))
    }

    /// Each input file is indexed into the index named after its stem, which
    /// is refreshed so the documents are searchable on return.
    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Elastic, self.kind())?;
        if p.input_files.is_empty() {
            return Ok(());
        }

        let kind = self.kind();
        let base = format!("http://{}", seed_endpoint(address, DEFAULT_PORT, kind)?);
        let client = http_client().map_err(SeedError::connection(kind))?;

        let mut total = 0;
        for file in &p.input_files {
            let index = file_stem(file);
            let documents = read_json_lines::<serde_json::Value>(file)?;
            debug!(index = %index, count = documents.len(), "Indexing documents");

            for document in &documents {
                let response = client
                    .post(format!("{base}/{index}/_doc"))
                    .json(document)
                    .send()
                    .await
                    .map_err(SeedError::connection(kind))?;
                ensure_success(response).await.map_err(SeedError::rejected(kind))?;
            }

            let response = client
                .post(format!("{base}/{index}/_refresh"))
                .send()
                .await
                .map_err(SeedError::connection(kind))?;
            ensure_success(response).await.map_err(SeedError::rejected(kind))?;
            total += documents.len();
        }

        info!(documents = total, "Elasticsearch seeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_shared_types::ElasticPreset;

    #[test]
    fn test_single_node_discovery() {
        let spec = ElasticHandler
            .image_spec(&Preset::Elastic(ElasticPreset::default()))
            .unwrap();
        assert_eq!(spec.env, vec!["discovery.type=single-node"]);
        assert_eq!(spec.reference(Some("7.10.1")), "docker.io/library/elasticsearch:7.10.1");
    }
}
