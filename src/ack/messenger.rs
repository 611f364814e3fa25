use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::protocol::{
    AnnounceRequest, ConfirmRequest, ConfirmResponse, ENDPOINT_SCHEMA_ANNOUNCE,
    ENDPOINT_SCHEMA_CONFIRM, SchemaMessenger,
};
use super::types::SchemaEvent;
use super::view::SchemaView;
use crate::membership::types::{InstanceId, InstanceRecord};

/// How an in-process instance answers the messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Online,
    /// Answers, but never gets around to loading the change.
    Lagging,
    Unreachable,
}

/// Messenger for instances living in the same process (single-node mode and tests).
#[derive(Default)]
pub struct InProcessMessenger {
    views: DashMap<InstanceId, Arc<SchemaView>>,
    reachability: DashMap<InstanceId, Reachability>,
}

impl InProcessMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, view: Arc<SchemaView>) {
        let id = view.instance().clone();
        self.reachability.insert(id.clone(), Reachability::Online);
        self.views.insert(id, view);
    }

    pub fn set_reachability(&self, id: &InstanceId, reachability: Reachability) {
        self.reachability.insert(id.clone(), reachability);
    }

    pub fn view(&self, id: &InstanceId) -> Option<Arc<SchemaView>> {
        self.views.get(id).map(|entry| entry.value().clone())
    }

    fn reachable_view(&self, id: &InstanceId) -> Result<(Arc<SchemaView>, Reachability)> {
        let reachability = self
            .reachability
            .get(id)
            .map(|entry| *entry.value())
            .unwrap_or(Reachability::Unreachable);
        if reachability == Reachability::Unreachable {
            return Err(anyhow::anyhow!("instance {} is unreachable", id));
        }

        let view = self
            .view(id)
            .ok_or_else(|| anyhow::anyhow!("instance {} has no schema view", id))?;
        Ok((view, reachability))
    }
}

#[async_trait]
impl SchemaMessenger for InProcessMessenger {
    async fn announce(&self, target: &InstanceRecord, event: &SchemaEvent) -> Result<()> {
        let (view, reachability) = self.reachable_view(&target.id)?;
        if reachability == Reachability::Online {
            // An unknown index is not an error here; confirm keeps answering false.
            view.reload(event);
        }
        Ok(())
    }

    async fn confirm(&self, target: &InstanceRecord, event: &SchemaEvent) -> Result<bool> {
        let (view, _) = self.reachable_view(&target.id)?;
        Ok(view.has_loaded(event))
    }
}

/// Messenger that talks to other nodes over their internal HTTP endpoints.
pub struct HttpMessenger {
    http_client: reqwest::Client,
    request_timeout: Duration,
    attempts: usize,
}

impl HttpMessenger {
    pub fn new(request_timeout: Duration, attempts: usize) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            request_timeout,
            attempts: attempts.max(1),
        }
    }

    fn url(&self, target: &InstanceRecord, endpoint: &str) -> Result<String> {
        let addr = target
            .http_addr
            .ok_or_else(|| anyhow::anyhow!("instance {} has no http address", target.id))?;
        Ok(format!("http://{}{}", addr, endpoint))
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.request_timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    // Simple jitter to prevent thundering herd
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
impl SchemaMessenger for HttpMessenger {
    async fn announce(&self, target: &InstanceRecord, event: &SchemaEvent) -> Result<()> {
        let url = self.url(target, ENDPOINT_SCHEMA_ANNOUNCE)?;
        let response = self
            .post_with_retry(
                url,
                &AnnounceRequest {
                    event: event.clone(),
                },
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Announce failed: {}", response.status()));
        }
        Ok(())
    }

    async fn confirm(&self, target: &InstanceRecord, event: &SchemaEvent) -> Result<bool> {
        let url = self.url(target, ENDPOINT_SCHEMA_CONFIRM)?;
        let response = self
            .post_with_retry(
                url,
                &ConfirmRequest {
                    event: event.clone(),
                },
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Confirm failed: {}", response.status()));
        }

        let confirm: ConfirmResponse = response.json().await?;
        if confirm.instance != target.id {
            return Err(anyhow::anyhow!(
                "Expected confirmation from {}, got {}",
                target.id,
                confirm.instance
            ));
        }
        Ok(confirm.loaded)
    }
}
