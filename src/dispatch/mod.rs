//! Work-order dispatch to the robot fleet.
//!
//! This module contains:
//! - `DispatchChannel` trait: fire-and-forget broadcast of work orders
//! - Dispatch configuration types
//! - Implementations: in-process broadcast, AMQP fanout, mock

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use tracing::info;

use crate::order::{DispatchMessage, UnknownOrderClass};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod codec;
pub mod mock;

#[cfg(feature = "amqp")]
pub use amqp::AmqpDispatch;
pub use channel::ChannelDispatch;
pub use codec::{decode_broadcast, encode_broadcast};
pub use mock::MockDispatch;

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur during dispatch operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Subscribe not supported for this dispatch backend")]
    SubscribeNotSupported,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    UnknownOrderClass(#[from] UnknownOrderClass),
}

/// Stream of work orders delivered to one subscriber.
pub type DispatchStream = BoxStream<'static, DispatchMessage>;

/// Interface for broadcasting work orders to the fleet.
///
/// Implementations:
/// - `ChannelDispatch`: tokio broadcast, in-process fleet
/// - `AmqpDispatch`: RabbitMQ fanout exchange
/// - `MockDispatch`: records messages for tests
#[async_trait]
pub trait DispatchChannel: Send + Sync {
    /// Broadcast a work order. No delivery acknowledgement is awaited.
    async fn publish(&self, message: &DispatchMessage) -> Result<()>;

    /// Receive every work order published after this call.
    ///
    /// `subscriber` names the consumer for logging and queue naming.
    /// Frames that fail to decode are logged and skipped.
    async fn subscribe(&self, subscriber: &str) -> Result<DispatchStream> {
        let _ = subscriber;
        Err(DispatchError::SubscribeNotSupported)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Dispatch backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchBackend {
    #[default]
    Channel,
    Amqp,
}

/// Dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub backend: DispatchBackend,
    /// AMQP connection URL.
    pub amqp_url: String,
    /// Fanout exchange carrying work orders.
    pub exchange: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend: DispatchBackend::Channel,
            amqp_url: "amqp://localhost:5672".to_string(),
            exchange: "autogrocer.dispatch".to_string(),
        }
    }
}

/// Initialize the dispatch channel based on configuration.
pub async fn init_dispatch(
    config: &DispatchConfig,
) -> std::result::Result<Arc<dyn DispatchChannel>, Box<dyn std::error::Error>> {
    match config.backend {
        DispatchBackend::Channel => {
            info!("Dispatch: in-process channel");
            Ok(Arc::new(ChannelDispatch::new()))
        }
        #[cfg(feature = "amqp")]
        DispatchBackend::Amqp => {
            let dispatch = AmqpDispatch::connect(&config.amqp_url, &config.exchange).await?;
            Ok(Arc::new(dispatch))
        }
        #[cfg(not(feature = "amqp"))]
        DispatchBackend::Amqp => {
            tracing::error!("AMQP dispatch requested but 'amqp' feature is not enabled");
            Err("amqp feature not enabled".into())
        }
    }
}
