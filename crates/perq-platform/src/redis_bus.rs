use anyhow::Result;
use async_trait::async_trait;
use perq_core::{AffiliateStatus, NotificationGateway};
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::contracts::{AFFILIATE_STATUS_CHANNEL, AffiliateStatusChangedEvent};

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }

    /// Fire-and-forget publish for notification-style events: a failed
    /// dispatch is logged and swallowed so it can never roll back the
    /// financial transaction that produced it.
    pub async fn publish_json_best_effort<T: Serialize>(&self, channel: &str, payload: &T) {
        if let Err(err) = self.publish_json(channel, payload).await {
            error!("failed to publish event on {channel}: {err:#}");
        }
    }
}

/// Redis-backed affiliate notification dispatch.
#[derive(Clone)]
pub struct RedisNotificationGateway {
    bus: RedisBus,
}

impl RedisNotificationGateway {
    pub fn new(bus: RedisBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationGateway for RedisNotificationGateway {
    async fn affiliate_status_changed(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        status: AffiliateStatus,
    ) -> Result<()> {
        self.bus
            .publish_json(
                AFFILIATE_STATUS_CHANNEL,
                &AffiliateStatusChangedEvent {
                    user_id,
                    plan_id,
                    status,
                },
            )
            .await
    }
}
