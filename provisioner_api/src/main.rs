// Provisioner API Server Binary
//
// Entry point for the provisioner API server.

use anyhow::Result;
use clap::Parser;

use provisioner_api::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    provisioner_api::run(Cli::parse()).await
}
