//! In-process dispatch using a tokio broadcast channel.
//!
//! Frames are encoded exactly as they would be for an external broker, so
//! in-process subscribers exercise the same decoding path.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, warn};

use super::codec::{decode_broadcast, encode_broadcast};
use super::{DispatchChannel, DispatchStream, Result};
use crate::order::DispatchMessage;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// In-memory dispatch channel.
pub struct ChannelDispatch {
    sender: broadcast::Sender<Bytes>,
}

impl ChannelDispatch {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchChannel for ChannelDispatch {
    #[tracing::instrument(name = "dispatch.publish", skip_all, fields(order_id = %message.order_id, class = %message.class))]
    async fn publish(&self, message: &DispatchMessage) -> Result<()> {
        let frame = encode_broadcast(message)?;

        // Send to channel (a send with no receivers is not an error)
        match self.sender.send(frame) {
            Ok(receivers) => debug!(receivers, "Broadcast work order"),
            Err(_) => warn!("Broadcast work order with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, subscriber: &str) -> Result<DispatchStream> {
        let name = subscriber.to_string();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |frame| {
            let decoded = match frame {
                Ok(frame) => match decode_broadcast(&frame) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        error!(subscriber = %name, error = %e, "Dropping undecodable work order");
                        None
                    }
                },
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    error!(subscriber = %name, skipped = n, "Dispatch subscriber lagged, skipped messages");
                    None
                }
            };
            futures::future::ready(decoded)
        });
        Ok(stream.boxed())
    }
}
