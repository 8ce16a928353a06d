use std::sync::Arc;

use anyhow::Context;
use tally_config::{Config, JobDefaultsConfig};
use tally_job_queue::{
    BackoffPolicy, ConnectionConfig, InMemoryBroker, QueueConfig, QueueConnector, QueueDefaults,
    RetentionPolicy,
};

/// Convert one tier of configured job defaults into queue defaults.
fn queue_defaults_from(scope: &str, d: &JobDefaultsConfig) -> anyhow::Result<QueueDefaults> {
    let backoff = match &d.backoff {
        Some(b) => {
            let delay_ms = b
                .delay
                .to_millis()
                .with_context(|| format!("{scope}.backoff.delay"))?;
            let delay_ms = u64::try_from(delay_ms)
                .with_context(|| format!("{scope}.backoff.delay must not be negative"))?;
            Some(BackoffPolicy {
                kind: b.kind,
                delay_ms,
            })
        }
        None => None,
    };
    Ok(QueueDefaults {
        priority: d.priority,
        attempts: d.attempts,
        remove_on_complete: d.remove_on_complete.map(RetentionPolicy::completed),
        remove_on_fail: d.remove_on_fail.map(RetentionPolicy::failed),
        backoff,
    })
}

/// Build the queue configuration from application config.
pub fn queue_config_from_config(cfg: &Config) -> anyhow::Result<QueueConfig> {
    let connection = ConnectionConfig {
        url: cfg.broker.url.clone(),
        prefix: cfg.broker.prefix.clone(),
        connect_timeout_secs: cfg.broker.connect_timeout_secs,
    };
    let mut queue_config =
        QueueConfig::new(connection).with_defaults(queue_defaults_from("defaults", &cfg.defaults)?);
    for (name, queue) in &cfg.queues {
        let defaults = queue_defaults_from(&format!("queues.{name}"), queue)?;
        queue_config = queue_config.with_queue(name.clone(), defaults);
    }
    Ok(queue_config)
}

/// Pick the broker for a URL: `memory://` stays in process, anything else is Redis.
pub fn connector_for_url(url: &str) -> anyhow::Result<Arc<dyn QueueConnector>> {
    if url.starts_with("memory:") {
        tracing::warn!("using the in-memory broker; jobs are discarded on exit");
        return Ok(Arc::new(InMemoryBroker::new()));
    }
    redis_connector()
}

#[cfg(feature = "redis")]
fn redis_connector() -> anyhow::Result<Arc<dyn QueueConnector>> {
    Ok(Arc::new(tally_job_queue::redis::RedisConnector::new()))
}

#[cfg(not(feature = "redis"))]
fn redis_connector() -> anyhow::Result<Arc<dyn QueueConnector>> {
    anyhow::bail!("built without redis support; use a memory:// broker url")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_config::BackoffConfig;
    use tally_job_queue::{BackoffKind, Delay};

    #[test]
    fn queue_overrides_fall_back_to_global_defaults() {
        let mut cfg = Config::default();
        cfg.defaults.attempts = Some(4);
        cfg.defaults.backoff = Some(BackoffConfig {
            kind: BackoffKind::Exponential,
            delay: Delay::from("2s"),
        });
        cfg.queues.insert(
            "invoices".into(),
            JobDefaultsConfig {
                priority: Some(2),
                remove_on_complete: Some(10),
                ..JobDefaultsConfig::default()
            },
        );

        let queue_config = queue_config_from_config(&cfg).expect("queue config");
        assert_eq!(queue_config.connection.prefix, "tally");

        let invoices = queue_config.defaults_for("invoices");
        assert_eq!(invoices.priority, Some(2));
        assert_eq!(invoices.attempts, Some(4));
        assert_eq!(invoices.remove_on_complete, Some(RetentionPolicy::completed(10)));
        assert_eq!(invoices.backoff, Some(BackoffPolicy::exponential(2_000)));

        let inbox = queue_config.defaults_for("inbox");
        assert_eq!(inbox.priority, None);
        assert_eq!(inbox.attempts, Some(4));
    }

    #[test]
    fn bad_backoff_delay_is_reported_with_its_scope() {
        let mut cfg = Config::default();
        cfg.queues.insert(
            "documents".into(),
            JobDefaultsConfig {
                backoff: Some(BackoffConfig {
                    kind: BackoffKind::Fixed,
                    delay: Delay::from("soon"),
                }),
                ..JobDefaultsConfig::default()
            },
        );
        let err = queue_config_from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("queues.documents.backoff.delay"));
    }

    #[test]
    fn memory_url_selects_in_memory_broker() {
        assert!(connector_for_url("memory://").is_ok());
    }
}
