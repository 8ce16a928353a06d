//! Tally job trigger
//!
//! Loads configuration, connects to the broker and enqueues catalog jobs
//! from the command line. Handles are printed as JSON on stdout.

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tally_job_queue::{BatchItem, JobTriggerClient};
use tally_jobs::JobCatalog;

mod cli;
mod config_helpers;
mod tracing_setup;

use cli::{options_from_args, Cli, Command};
use config_helpers::{connector_for_url, queue_config_from_config};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path();

    let config = load_config(config_path.as_deref())?;
    install_tracing_from_config(&config.logging);

    let catalog = JobCatalog::standard();
    if let Command::List = cli.command {
        print_json(&list_jobs(&catalog))?;
        return Ok(());
    }

    let connector = connector_for_url(&config.broker.url)?;
    let client = JobTriggerClient::external(connector, queue_config_from_config(&config)?);
    tracing::debug!(broker = %config.broker.url, prefix = %config.broker.prefix, "client ready");

    let result = run(&client, &catalog, cli.command).await;
    // Close before reporting the command result.
    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "failed to close job queue client");
    }

    print_json(&result?)
}

/// Load and validate configuration from file, environment and defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<tally_config::Config> {
    let config = tally_config::load_config(path)
        .with_context(|| format!("failed to load configuration from {path:?}"))?;
    tally_config::validate_config(&config).context("invalid configuration")?;
    Ok(config)
}

async fn run(
    client: &JobTriggerClient,
    catalog: &JobCatalog,
    command: Command,
) -> anyhow::Result<Value> {
    match command {
        Command::Trigger {
            job,
            payload,
            delay,
            priority,
            attempts,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            let options = options_from_args(delay.as_deref(), priority, attempts);
            let handle = catalog.trigger(client, &job, &payload, options).await?;
            Ok(serde_json::to_value(handle)?)
        }
        Command::Batch { job, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let items: Vec<BatchItem> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of batch items", file.display()))?;
            let handles = catalog.batch_trigger(client, &job, items).await?;
            Ok(serde_json::to_value(handles)?)
        }
        Command::List => Ok(list_jobs(catalog)),
    }
}

fn list_jobs(catalog: &JobCatalog) -> Value {
    catalog
        .iter()
        .map(|job| json!({ "id": job.id(), "queue": job.queue() }))
        .collect()
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use tally_job_queue::{ConnectionConfig, InMemoryBroker, QueueConfig};

    fn client(broker: &InMemoryBroker) -> JobTriggerClient {
        JobTriggerClient::external(
            Arc::new(broker.clone()),
            QueueConfig::new(ConnectionConfig::new("memory://")),
        )
    }

    #[tokio::test]
    async fn batch_command_reads_items_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("tmpfile");
        write!(
            file,
            r#"[
                {{ "payload": {{ "type": "inbox_new", "team_id": "6f1c1a39-8a43-4b0a-9d6e-3b8c3f0a2f11" }} }},
                {{ "payload": {{ "type": "invoice_paid", "team_id": "6f1c1a39-8a43-4b0a-9d6e-3b8c3f0a2f11" }},
                   "options": {{ "priority": 3 }} }}
            ]"#
        )
        .expect("write");

        let broker = InMemoryBroker::new();
        let client = client(&broker);
        let output = run(
            &client,
            &JobCatalog::standard(),
            Command::Batch {
                job: "notification".into(),
                file: file.path().to_path_buf(),
            },
        )
        .await
        .expect("batch");

        let handles = output.as_array().expect("array");
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0]["name"], "notification");
        assert_eq!(broker.jobs("notifications").await.len(), 2);
        client.close().await.expect("close");
        assert_eq!(broker.closes("notifications").await, 1);
    }

    #[tokio::test]
    async fn trigger_command_rejects_unknown_jobs() {
        let broker = InMemoryBroker::new();
        let err = run(
            &client(&broker),
            &JobCatalog::standard(),
            Command::Trigger {
                job: "backup.create".into(),
                payload: "{}".into(),
                delay: None,
                priority: None,
                attempts: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unknown job"));
        assert_eq!(broker.job_count().await, 0);
    }

    #[test]
    fn list_includes_queues() {
        let listed = list_jobs(&JobCatalog::standard());
        let entry = listed
            .as_array()
            .unwrap()
            .iter()
            .find(|j| j["id"] == "generate-invoice")
            .expect("generate-invoice listed");
        assert_eq!(entry["queue"], "invoices");
    }
}
