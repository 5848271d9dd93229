//! AMQP (RabbitMQ) dispatch implementation.
//!
//! Work orders go to a fanout exchange; every subscriber binds its own durable
//! queue `{exchange}.{subscriber}` to it, so each robot sees every order and a
//! restarted robot picks up what was queued while it was away.

use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use bytes::Bytes;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use super::codec::{decode_broadcast, encode_broadcast};
use super::{DispatchChannel, DispatchError, DispatchStream, Result};
use crate::order::DispatchMessage;
use crate::utils::retry::consumer_reconnect_backoff;

/// Buffered work orders per subscriber before the consumer applies backpressure.
const SUBSCRIBER_BUFFER: usize = 256;

/// AMQP dispatch over a fanout exchange.
pub struct AmqpDispatch {
    pool: Pool,
    url: String,
    exchange: String,
}

impl AmqpDispatch {
    /// Connect and declare the exchange.
    pub async fn connect(url: &str, exchange: &str) -> Result<Self> {
        let manager = Manager::new(url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| DispatchError::Connection(format!("Failed to create pool: {}", e)))?;

        let channel = Self::channel_from(&pool).await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                DispatchError::Connection(format!("Failed to declare exchange: {}", e))
            })?;

        info!(exchange = %exchange, url = %url, "Connected to AMQP for dispatch");

        Ok(Self {
            pool,
            url: url.to_string(),
            exchange: exchange.to_string(),
        })
    }

    async fn channel_from(pool: &Pool) -> Result<Channel> {
        let conn = pool.get().await.map_err(|e: PoolError| {
            DispatchError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| DispatchError::Connection(format!("Failed to create channel: {}", e)))
    }

    /// Hand one frame to the broker. No publisher confirms: a work order is
    /// fire-and-forget and the caller decides what a failure means.
    async fn publish_frame(&self, frame: &Bytes) -> Result<()> {
        let channel = Self::channel_from(&self.pool).await?;

        let properties = BasicProperties::default()
            .with_content_type("application/x-protobuf".into())
            .with_delivery_mode(2);

        channel
            .basic_publish(
                &self.exchange,
                "",
                BasicPublishOptions::default(),
                frame,
                properties,
            )
            .await
            .map_err(|e| DispatchError::Publish(format!("Failed to publish: {}", e)))?;
        Ok(())
    }

    async fn setup_consumer(pool: &Pool, exchange: &str, queue: &str) -> Result<lapin::Consumer> {
        let channel = Self::channel_from(pool).await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| DispatchError::Subscribe(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DispatchError::Subscribe(format!("Failed to bind queue: {}", e)))?;

        channel
            .basic_consume(
                queue,
                queue,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DispatchError::Subscribe(format!("Failed to start consumer: {}", e)))
    }

    /// Consume into `sink` until the subscriber goes away, reconnecting with
    /// backoff whenever the broker connection drops. Starts from `first`
    /// when the caller already bound the queue.
    async fn consume_with_reconnect(
        pool: Pool,
        exchange: String,
        queue: String,
        sink: mpsc::Sender<DispatchMessage>,
        mut first: Option<lapin::Consumer>,
    ) {
        let backoff_builder = consumer_reconnect_backoff();
        let mut backoff_iter = backoff_builder.build();

        loop {
            let consumer = match first.take() {
                Some(consumer) => Ok(consumer),
                None => Self::setup_consumer(&pool, &exchange, &queue).await,
            };
            match consumer {
                Ok(mut consumer) => {
                    info!(queue = %queue, "Dispatch consumer connected");
                    backoff_iter = backoff_builder.build();

                    while let Some(delivery) = consumer.next().await {
                        let delivery = match delivery {
                            Ok(delivery) => delivery,
                            Err(e) => {
                                error!(error = %e, "Consumer delivery error, will reconnect");
                                break;
                            }
                        };

                        match decode_broadcast(&delivery.data) {
                            Ok(message) => {
                                debug!(order_id = %message.order_id, queue = %queue, "Received work order");
                                if sink.send(message).await.is_err() {
                                    info!(queue = %queue, "Subscriber dropped, stopping consumer");
                                    let _ = delivery
                                        .reject(BasicRejectOptions { requeue: true })
                                        .await;
                                    return;
                                }
                                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                    error!(error = %e, "Failed to ack work order");
                                }
                            }
                            Err(e) => {
                                error!(error = %e, queue = %queue, "Dropping undecodable work order");
                                let _ = delivery.reject(BasicRejectOptions::default()).await;
                            }
                        }
                    }

                    info!(queue = %queue, "Dispatch consumer stream ended, reconnecting...");
                }
                Err(e) => {
                    error!(error = %e, queue = %queue, "Failed to set up dispatch consumer");
                }
            }

            if sink.is_closed() {
                return;
            }
            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DispatchChannel for AmqpDispatch {
    #[tracing::instrument(name = "dispatch.publish", skip_all, fields(order_id = %message.order_id, class = %message.class))]
    async fn publish(&self, message: &DispatchMessage) -> Result<()> {
        let frame = encode_broadcast(message)?;
        self.publish_frame(&frame).await?;
        debug!(exchange = %self.exchange, "Published work order");
        Ok(())
    }

    async fn subscribe(&self, subscriber: &str) -> Result<DispatchStream> {
        let queue = format!("{}.{}", self.exchange, subscriber);
        let (sink, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);

        // Bound before returning so orders published next are not missed
        let consumer = Self::setup_consumer(&self.pool, &self.exchange, &queue).await?;
        tokio::spawn(Self::consume_with_reconnect(
            self.pool.clone(),
            self.exchange.clone(),
            queue.clone(),
            sink,
            Some(consumer),
        ));

        info!(queue = %queue, url = %self.url, "Subscribed to dispatch exchange");
        Ok(ReceiverStream::new(receiver).boxed())
    }
}
