use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tally_job_queue::{
    AnyPayload, BatchItem, ConnectionConfig, ErrorKind, FlowJob, InMemoryBroker, JobDefinition,
    JobOptions, JobQueueError, JobTriggerClient, Provenance, QueueConfig, QueueDefaults, QueueLocator,
    QueueRegistry, RetentionPolicy, SchemaViolation, SerdeSchema, FALLBACK_ATTEMPTS,
    FALLBACK_PRIORITY,
};

#[derive(Debug, Deserialize, Serialize)]
struct GenerateInvoice {
    invoice_id: String,
    deliver: bool,
}

fn invoice_schema() -> SerdeSchema<GenerateInvoice> {
    SerdeSchema::new().check(|p: &GenerateInvoice| {
        if p.invoice_id.starts_with("inv_") {
            Ok(())
        } else {
            Err(SchemaViolation::at("invoice_id", "must start with inv_"))
        }
    })
}

fn config() -> QueueConfig {
    QueueConfig::new(ConnectionConfig::new("memory://"))
}

fn external(broker: &InMemoryBroker, config: QueueConfig) -> JobTriggerClient {
    JobTriggerClient::external(Arc::new(broker.clone()), config)
}

#[tokio::test]
async fn trigger_submits_validated_payload_with_fallback_options() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let handle = client
        .trigger(
            &invoice_schema(),
            "invoices",
            "generate-invoice",
            &json!({ "invoice_id": "inv_1", "deliver": true, "ignored": 1 }),
            JobOptions::new(),
        )
        .await
        .expect("trigger");

    assert_eq!(handle.name, "generate-invoice");
    let job = broker.job(&handle.id).await.expect("stored job");
    assert_eq!(job.queue, "invoices");
    // Only the validated shape reaches the broker.
    assert_eq!(job.payload, json!({ "invoice_id": "inv_1", "deliver": true }));
    assert_eq!(job.options.priority, FALLBACK_PRIORITY);
    assert_eq!(job.options.attempts, FALLBACK_ATTEMPTS);
    assert_eq!(job.options.delay_ms, 0);
    assert_eq!(job.options.retention.complete, RetentionPolicy::KeepAll);
}

#[tokio::test]
async fn invalid_payload_never_touches_the_queue() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let err = client
        .trigger(
            &invoice_schema(),
            "invoices",
            "generate-invoice",
            &json!({ "invoice_id": "2024-1", "deliver": false }),
            JobOptions::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("invoice_id: must start with inv_"));
    assert_eq!(broker.constructions("invoices").await, 0);
    assert_eq!(broker.job_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_share_one_queue_handle() {
    let broker = InMemoryBroker::new();
    broker.set_connect_delay(Duration::from_millis(50)).await;
    let client = external(&broker, config());

    let tasks: Vec<_> = (0..16)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .trigger(
                        &AnyPayload,
                        "transactions",
                        "export-transactions",
                        &json!({ "n": n }),
                        JobOptions::new(),
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("join").expect("trigger");
    }

    assert_eq!(broker.constructions("transactions").await, 1);
    assert_eq!(broker.jobs("transactions").await.len(), 16);
}

#[tokio::test]
async fn batch_rejects_everything_when_one_item_is_invalid() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let items = vec![
        BatchItem::new(json!({ "invoice_id": "inv_1", "deliver": true })),
        BatchItem::new(json!({ "invoice_id": "inv_2" })),
        BatchItem::new(json!({ "invoice_id": "inv_3", "deliver": false })),
    ];
    let err = client
        .batch_trigger(&invoice_schema(), "invoices", "generate-invoice", items)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.failed_index(), Some(1));
    assert_eq!(broker.constructions("invoices").await, 0);
    assert_eq!(broker.job_count().await, 0);
}

#[tokio::test]
async fn batch_returns_handles_in_input_order() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let items = (1..=3)
        .map(|n| {
            BatchItem::with_options(
                json!({ "invoice_id": format!("inv_{n}"), "deliver": true }),
                JobOptions::new().priority(n),
            )
        })
        .collect();
    let handles = client
        .batch_trigger(&invoice_schema(), "invoices", "generate-invoice", items)
        .await
        .expect("batch");

    assert_eq!(handles.len(), 3);
    for (n, handle) in handles.iter().enumerate() {
        let job = broker.job(&handle.id).await.expect("stored job");
        assert_eq!(job.payload["invoice_id"], format!("inv_{}", n + 1));
        assert_eq!(job.options.priority, n as u32 + 1);
    }
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let handles = client
        .batch_trigger(&AnyPayload, "invoices", "generate-invoice", Vec::new())
        .await
        .expect("empty batch");
    assert!(handles.is_empty());
    assert_eq!(broker.constructions("invoices").await, 0);
}

#[tokio::test]
async fn options_resolve_call_then_queue_then_fallback() {
    let broker = InMemoryBroker::new();
    let config = config().with_queue(
        "inbox",
        QueueDefaults {
            priority: Some(4),
            attempts: Some(5),
            ..QueueDefaults::default()
        },
    );
    let client = external(&broker, config);

    let handle = client
        .trigger(
            &AnyPayload,
            "inbox",
            "sync-inbox",
            &json!({}),
            JobOptions::new().priority(2).keep_completed(100),
        )
        .await
        .expect("trigger");
    let job = broker.job(&handle.id).await.expect("stored job");
    assert_eq!(job.options.priority, 2);
    assert_eq!(job.options.attempts, 5);
    assert_eq!(job.options.retention.complete, RetentionPolicy::completed(100));

    let handle = client
        .trigger(&AnyPayload, "documents", "process-document", &json!({}), JobOptions::new())
        .await
        .expect("trigger");
    let job = broker.job(&handle.id).await.expect("stored job");
    assert_eq!(job.options.priority, FALLBACK_PRIORITY);
    assert_eq!(job.options.attempts, FALLBACK_ATTEMPTS);
}

#[tokio::test]
async fn delayed_trigger_parses_the_expression() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let handle = client
        .trigger_delayed(
            &AnyPayload,
            "invoices",
            "send-reminder",
            &json!({ "invoice_id": "inv_9" }),
            "10m",
            JobOptions::new(),
        )
        .await
        .expect("delayed trigger");
    let job = broker.job(&handle.id).await.expect("stored job");
    assert_eq!(job.options.delay_ms, 600_000);

    let err = client
        .trigger_delayed(
            &AnyPayload,
            "invoices",
            "send-reminder",
            &json!({}),
            "10 minutes",
            JobOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);

    let err = client
        .trigger(
            &AnyPayload,
            "invoices",
            "send-reminder",
            &json!({}),
            JobOptions::new().delay(-5i64),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    assert_eq!(broker.jobs("invoices").await.len(), 1);
}

#[tokio::test]
async fn recurring_trigger_records_the_pattern() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let handle = client
        .trigger_recurring(
            &AnyPayload,
            "invoices",
            "check-overdue",
            &json!({}),
            "0 6 * * *",
            JobOptions::new(),
        )
        .await
        .expect("recurring trigger");
    let job = broker.job(&handle.id).await.expect("stored job");
    assert_eq!(
        job.options.repeat.map(|r| r.pattern),
        Some("0 6 * * *".to_owned())
    );

    let err = client
        .trigger_recurring(
            &AnyPayload,
            "invoices",
            "check-overdue",
            &json!({}),
            "every day",
            JobOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);
}

#[tokio::test]
async fn flow_submits_the_tree_with_one_producer() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());

    let leaf = |id: &str| {
        FlowJob::new(
            &AnyPayload,
            "documents",
            "process-document",
            &json!({ "document_id": id }),
            JobOptions::new(),
        )
        .expect("leaf")
    };
    let flow = FlowJob::new(
        &AnyPayload,
        "inbox",
        "match-attachments",
        &json!({ "inbox_id": "in_1" }),
        JobOptions::new().priority(3),
    )
    .expect("root")
    .children([leaf("doc_1"), leaf("doc_2")]);

    let node = client.trigger_flow(flow).await.expect("flow");
    assert_eq!(node.queue, "inbox");
    assert_eq!(node.children.len(), 2);

    let parent_key = format!("inbox:{}", node.job.id);
    for child in &node.children {
        let job = broker.job(&child.job.id).await.expect("child job");
        assert_eq!(job.queue, "documents");
        assert_eq!(job.parent.as_deref(), Some(parent_key.as_str()));
    }
    let root = broker.job(&node.job.id).await.expect("root job");
    assert_eq!(root.options.priority, 3);

    client
        .trigger_flow(leaf("doc_3"))
        .await
        .expect("second flow");
    assert_eq!(broker.flow_producers().await, 1);
}

#[tokio::test]
async fn unreachable_broker_is_a_resolution_error_and_retries() {
    let broker = InMemoryBroker::new();
    broker.fail_connect("inbox").await;
    let client = external(&broker, config());

    let err = client
        .trigger(&AnyPayload, "inbox", "sync-inbox", &json!({}), JobOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);

    broker.heal().await;
    client
        .trigger(&AnyPayload, "inbox", "sync-inbox", &json!({}), JobOptions::new())
        .await
        .expect("retry after heal");
    assert_eq!(broker.constructions("inbox").await, 1);
}

#[tokio::test]
async fn rejected_submission_is_reported_with_the_queue() {
    let broker = InMemoryBroker::new();
    broker.reject_submissions("invoices").await;
    let client = external(&broker, config());

    let err = client
        .trigger(&AnyPayload, "invoices", "generate-invoice", &json!({}), JobOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Submission);
    assert!(matches!(
        err,
        JobQueueError::Submission { ref queue, ref job, .. }
            if queue == "invoices" && job == "generate-invoice"
    ));
}

#[tokio::test]
async fn close_leaves_worker_queues_open() {
    let broker = InMemoryBroker::new();
    let config = config();
    let registry = QueueRegistry::connect_all(&broker, &config, ["transactions"])
        .await
        .expect("registry");
    let client = JobTriggerClient::in_worker(registry.clone(), Arc::new(broker.clone()), config);

    let owned = client.locator().resolve("transactions").await.expect("resolve");
    assert_eq!(owned.provenance, Provenance::Registry);
    let cached = client.locator().resolve("invoices").await.expect("resolve");
    assert_eq!(cached.provenance, Provenance::Cache);

    client.close().await.expect("close");
    assert_eq!(broker.closes("transactions").await, 0);
    assert_eq!(broker.closes("invoices").await, 1);

    // The worker keeps submitting through its own handle.
    client
        .trigger(&AnyPayload, "transactions", "export-transactions", &json!({}), JobOptions::new())
        .await
        .expect("registry queue still open");

    // A cached name gets a fresh handle after close.
    client
        .trigger(&AnyPayload, "invoices", "generate-invoice", &json!({}), JobOptions::new())
        .await
        .expect("new cached handle");
    assert_eq!(broker.constructions("invoices").await, 2);

    client.close().await.expect("second close");
    assert_eq!(broker.closes("invoices").await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_construction_leaves_no_open_handle() {
    let broker = InMemoryBroker::new();
    broker.set_connect_delay(Duration::from_millis(200)).await;
    let client = external(&broker, config());

    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .trigger(&AnyPayload, "invoices", "generate-invoice", &json!({}), JobOptions::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await.expect("close");

    let err = pending.await.expect("join").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert_eq!(broker.constructions("invoices").await, 1);
    assert_eq!(broker.closes("invoices").await, 1);
    assert_eq!(broker.job_count().await, 0);

    client.close().await.expect("second close");
    assert_eq!(broker.closes("invoices").await, 1);

    client
        .trigger(&AnyPayload, "invoices", "generate-invoice", &json!({}), JobOptions::new())
        .await
        .expect("fresh handle");
    assert_eq!(broker.constructions("invoices").await, 2);
}

#[tokio::test]
async fn close_attempts_every_handle_and_reports_failures() {
    let broker = InMemoryBroker::new();
    broker.fail_close("inbox").await;
    let client = external(&broker, config());
    for queue in ["inbox", "invoices"] {
        client
            .trigger(&AnyPayload, queue, "noop", &json!({}), JobOptions::new())
            .await
            .expect("trigger");
    }

    let err = client.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Close);
    match err {
        JobQueueError::Close { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "inbox");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(broker.closes("invoices").await, 1);

    // Nothing is left to close.
    client.close().await.expect("idempotent close");
}

#[tokio::test]
async fn job_definition_merges_its_options_under_the_call() {
    let broker = InMemoryBroker::new();
    let client = external(&broker, config());
    let generate = JobDefinition::new("generate-invoice", "invoices", invoice_schema())
        .with_options(JobOptions::new().priority(7).attempts(2));

    let handle = generate
        .trigger(
            &client,
            &json!({ "invoice_id": "inv_1", "deliver": false }),
            JobOptions::new().attempts(9),
        )
        .await
        .expect("trigger");
    let job = broker.job(&handle.id).await.expect("stored job");
    assert_eq!(job.name, "generate-invoice");
    assert_eq!(job.options.priority, 7);
    assert_eq!(job.options.attempts, 9);

    let handle = generate
        .enqueue(
            &client,
            &GenerateInvoice {
                invoice_id: "inv_2".into(),
                deliver: true,
            },
        )
        .await
        .expect("enqueue");
    let job = broker.job(&handle.id).await.expect("stored job");
    assert_eq!(job.options.attempts, 2);

    let err = generate
        .batch_trigger(
            &client,
            vec![
                BatchItem::new(json!({ "invoice_id": "inv_3", "deliver": true })),
                BatchItem::new(json!({ "invoice_id": "bad", "deliver": true })),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.failed_index(), Some(1));
    assert_eq!(broker.jobs("invoices").await.len(), 2);
}
