//! Mock dispatch channel for testing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DispatchChannel, DispatchError, Result};
use crate::order::DispatchMessage;

/// Records published messages; can be told to fail or stall.
#[derive(Default)]
pub struct MockDispatch {
    published: RwLock<Vec<DispatchMessage>>,
    fail_on_publish: RwLock<bool>,
    publish_delay: RwLock<Option<Duration>>,
}

impl MockDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Sleep this long inside every publish before recording.
    pub async fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.publish_delay.write().await = delay;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<DispatchMessage> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl DispatchChannel for MockDispatch {
    async fn publish(&self, message: &DispatchMessage) -> Result<()> {
        let delay = *self.publish_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_on_publish.read().await {
            return Err(DispatchError::Connection(
                "Mock publish failure".to_string(),
            ));
        }
        self.published.write().await.push(message.clone());
        Ok(())
    }
}
