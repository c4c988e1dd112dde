//! ABOUTME: Wiring of the userhub services from configuration
//! ABOUTME: Builds the database, broker topology, publisher, hub and consumers

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uh_config::{BrokerConfig, Config, MalformedPolicyConfig};
use uh_core::{Error, PipelineMetrics, Result};
use uh_db::{Cache, Db};
use uh_events::{
    BrokerPublisher, InMemoryBroker, Publisher, RetryConfig, RetryPublisher, Topology,
};
use uh_notify::{EventConsumer, FanoutHub, HubSettings, MalformedPolicy};
use uh_obs::ObsState;
use uh_web::{AppState, StreamSettings};

/// Exchange bindings for both event queues plus the dead-letter queue
pub fn topology(config: &BrokerConfig) -> Topology {
    Topology::new(&config.exchange)
        .bind(&config.created_queue, &config.created_routing_key)
        .bind(&config.failed_queue, &config.failed_routing_key)
        .bind(&config.dead_letter_queue, &config.dead_letter_routing_key)
}

pub fn malformed_policy(config: &BrokerConfig) -> MalformedPolicy {
    match config.malformed_policy {
        MalformedPolicyConfig::Drop => MalformedPolicy::Drop,
        MalformedPolicyConfig::DeadLetter => MalformedPolicy::DeadLetter {
            exchange: config.exchange.clone(),
            routing_key: config.dead_letter_routing_key.clone(),
        },
    }
}

/// Every long-lived component of a running instance
pub struct Services {
    pub db: Db,
    pub broker: Arc<InMemoryBroker>,
    pub metrics: PipelineMetrics,
    pub hub: FanoutHub,
    pub consumer: EventConsumer,
    pub app_state: AppState,
    pub obs_state: ObsState,
    cancel: CancellationToken,
}

impl Services {
    /// Open the database, declare the topology and assemble the pipeline
    pub async fn build(config: &Config) -> Result<Self> {
        let db = Db::new(&config.database.path, config.database.pool_size).await?;
        db.health_check().await?;

        // Nothing in-process drains the dead-letter queue, so every queue is capped
        let broker = Arc::new(InMemoryBroker::with_max_queue_depth(
            config.broker.max_queue_depth,
        ));
        topology(&config.broker)
            .declare(broker.as_ref())
            .await
            .map_err(|e| Error::External(format!("Failed to declare broker topology: {}", e)))?;

        let metrics = PipelineMetrics::new();

        let hub = FanoutHub::new(
            HubSettings {
                send_timeout: Duration::from_millis(config.hub.send_timeout_ms),
                subscriber_buffer: config.hub.subscriber_buffer,
            },
            metrics.clone(),
        );

        let publisher: Arc<dyn Publisher> = Arc::new(RetryPublisher::with_config(
            BrokerPublisher::new(broker.clone(), &config.broker.exchange, metrics.clone()),
            RetryConfig {
                max_retries: config.publish.max_retries,
                initial_delay_ms: config.publish.initial_delay_ms,
                max_delay_ms: config.publish.max_delay_ms,
                ..RetryConfig::default()
            },
        ));

        let consumer = EventConsumer::new(
            broker.clone(),
            Arc::new(hub.clone()),
            vec![
                config.broker.created_queue.clone(),
                config.broker.failed_queue.clone(),
            ],
            metrics.clone(),
        )
        .with_malformed_policy(malformed_policy(&config.broker));

        let user_cache = Arc::new(Cache::new(
            "users_by_email",
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_secs),
        ));

        let app_state = AppState::new(
            db.clone(),
            user_cache,
            publisher,
            hub.clone(),
            StreamSettings {
                max_lifetime: Duration::from_secs(config.hub.stream_timeout_secs),
                keepalive: Duration::from_secs(config.hub.keepalive_secs),
            },
        );

        let obs_state = ObsState::new(&metrics);

        Ok(Self {
            db,
            broker,
            metrics,
            hub,
            consumer,
            app_state,
            obs_state,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn one consumer task per event queue
    pub async fn start_consumers(&self) -> Result<Vec<JoinHandle<()>>> {
        let handles = self
            .consumer
            .start(self.cancel.clone())
            .await
            .map_err(|e| Error::External(format!("Failed to start consumers: {}", e)))?;

        info!(queues = ?self.consumer.queues(), "Event consumers started");
        Ok(handles)
    }

    /// Stop consumers and close the broker
    pub fn shutdown(&self) {
        self.obs_state.readiness.set_ready(false);
        self.cancel.cancel();
        self.broker.close();
        info!("Pipeline shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_covers_event_and_dead_letter_queues() {
        let queues = topology(&BrokerConfig::default()).queues();
        assert_eq!(
            queues,
            vec![
                "user.created.queue".to_string(),
                "user.creation.failed.queue".to_string(),
                "user.events.dead".to_string(),
            ]
        );
    }

    #[test]
    fn malformed_policy_follows_config() {
        let mut config = BrokerConfig::default();
        assert_eq!(malformed_policy(&config), MalformedPolicy::Drop);

        config.malformed_policy = MalformedPolicyConfig::DeadLetter;
        assert_eq!(
            malformed_policy(&config),
            MalformedPolicy::DeadLetter {
                exchange: "user.exchange".to_string(),
                routing_key: "user.events.dead".to_string(),
            }
        );
    }
}
