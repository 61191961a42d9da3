//! HTTP implementation of [`BlockTransport`].

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::BlockTransport;
use crate::chunk::protocol::{BlockMessage, CONTENT_TYPE_BLOCK, block_url};
use crate::placement::types::BlockId;

const DEFAULT_ATTEMPTS: usize = 3;

pub struct HttpTransport {
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    // --- HTTP Helpers with Backoff ---

    async fn put_with_retry(&self, url: String, body: Vec<u8>) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .put(url.clone())
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_BLOCK)
                .body(body.clone())
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    async fn get_with_retry(&self, url: String) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

#[async_trait]
impl BlockTransport for HttpTransport {
    async fn push_block(&self, addr: &str, block: &BlockMessage) -> Result<()> {
        let response = self
            .put_with_retry(block_url(addr, &block.block_id), block.encode()?)
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Push of block {} to {} failed: {}",
                block.block_id,
                addr,
                response.status()
            ));
        }

        tracing::debug!("Pushed block {} ({} bytes) to {}", block.block_id, block.data.len(), addr);
        Ok(())
    }

    async fn fetch_block(&self, addr: &str, block_id: &BlockId) -> Result<BlockMessage> {
        let response = self.get_with_retry(block_url(addr, block_id)).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow::anyhow!("Block {} not found on {}", block_id, addr));
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Fetch of block {} from {} failed: {}",
                block_id,
                addr,
                response.status()
            ));
        }

        let bytes = response.bytes().await?;
        BlockMessage::decode(&bytes)
    }
}
