//! HTTP implementation of [`MasterApi`], used by chunk agents.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::MasterApi;
use crate::error::{ClusterError, Result};
use crate::master::protocol::{
    ENDPOINT_HEARTBEAT, ENDPOINT_REGISTER, ENDPOINT_SYNC_DONE, ErrorResponse, HeartbeatMessage,
    HeartbeatResponse, RegisterResponse, RegistrationMessage, SyncDoneMessage, SyncDoneResponse,
};
use crate::membership::types::NodeId;

/// Talks to the master over HTTP/JSON.
///
/// Every call is a single attempt bounded by `timeout`: the agent's tick loop is
/// the retry mechanism, so a hung master only ever delays one tick.
pub struct HttpMasterClient {
    http_client: reqwest::Client,
    master_addr: String,
    timeout: Duration,
}

impl HttpMasterClient {
    pub fn new(master_addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            master_addr: master_addr.into(),
            timeout,
        }
    }

    async fn call<Req, Resp>(&self, endpoint: &str, payload: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{}{}", self.master_addr, endpoint);
        let response = self
            .http_client
            .post(url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| ClusterError::Transport(e.to_string()));
        }

        let body: Option<ErrorResponse> = response.json().await.ok();
        match body {
            Some(err) => Err(err.into_error()),
            None => Err(ClusterError::Transport(format!(
                "{} returned {}",
                endpoint, status
            ))),
        }
    }
}

#[async_trait]
impl MasterApi for HttpMasterClient {
    async fn register(&self, msg: RegistrationMessage) -> Result<NodeId> {
        let response: RegisterResponse = self.call(ENDPOINT_REGISTER, &msg).await?;
        Ok(response.node_id)
    }

    async fn heartbeat(&self, msg: HeartbeatMessage) -> Result<HeartbeatResponse> {
        self.call(ENDPOINT_HEARTBEAT, &msg).await
    }

    async fn sync_done(&self, msg: SyncDoneMessage) -> Result<()> {
        let response: SyncDoneResponse = self.call(ENDPOINT_SYNC_DONE, &msg).await?;
        if !response.replica {
            tracing::debug!("Master did not keep {} as a replica of {}", msg.node_id, msg.block_id);
        }
        Ok(())
    }
}
