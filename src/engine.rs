//! The DeBot engine: the composition root that owns the instance table and
//! the signing box registry, and exposes the public lifecycle operations.
//!
//! Operations on one handle run to completion (including all nested browser
//! round-trips) before the next operation on that handle begins; operations
//! on distinct handles proceed concurrently.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::action::DebotAction;
use crate::browser::{BrowserChannel, BrowserMessage};
use crate::errors::{DebotError, DebotResult};
use crate::handle::HandleTable;
use crate::info::{CONTEXT_EXIT, DContext, DebotInfo};
use crate::instance::{DebotInstance, InstanceShared};
use crate::services::{ContractFetcher, MessageDispatcher, MethodRunner};
use crate::signing::{SigningBox, SigningBoxHandle, SigningBoxRegistry};

/// Opaque reference to a running DeBot instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebotHandle(pub u32);

pub struct EngineConfig {
    /// How long to wait for each browser reply before the in-flight
    /// operation fails with `BrowserCallbackFailed`. `None` waits forever.
    pub reply_timeout: Option<Duration>,
    /// Ceiling on chained action steps per operation; a runaway `instant`
    /// loop fails with `ExecutionFailed` instead of spinning.
    pub max_chain_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply_timeout: None,
            max_chain_steps: 50,
        }
    }
}

/// Table entry for one instance. The shared part (removal flag, delegated
/// signing boxes) and the browser sender stay reachable without the
/// instance lock so `remove` never waits behind a suspended operation.
struct InstanceCell {
    shared: Arc<InstanceShared>,
    browser: BrowserChannel,
    inner: Mutex<DebotInstance>,
}

/// Manages the lifecycle of DeBot instances addressed by opaque handles.
pub struct DebotEngine {
    instances: HandleTable<Arc<InstanceCell>>,
    signing: Arc<SigningBoxRegistry>,
    fetcher: Arc<dyn ContractFetcher>,
    runner: Arc<dyn MethodRunner>,
    dispatcher: Arc<dyn MessageDispatcher>,
    config: EngineConfig,
}

impl DebotEngine {
    pub fn new(
        fetcher: Arc<dyn ContractFetcher>,
        runner: Arc<dyn MethodRunner>,
        dispatcher: Arc<dyn MessageDispatcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            instances: HandleTable::new(),
            signing: Arc::new(SigningBoxRegistry::new()),
            fetcher,
            runner,
            dispatcher,
            config,
        }
    }

    /// Load a DeBot and allocate a handle for it. The instance starts in
    /// `Idle`; no browser notifications are issued yet.
    pub async fn init(&self, address: &str, browser: BrowserChannel) -> DebotResult<DebotHandle> {
        let (abi, info, contexts) = self.load(address).await.map_err(|e| match e {
            DebotError::FetchFailed(msg) => DebotError::StartFailed(msg),
            other => other,
        })?;

        let browser = browser.with_timeout(self.config.reply_timeout);
        let shared = Arc::new(InstanceShared::default());
        let instance = DebotInstance::new(
            address.to_string(),
            abi,
            info,
            contexts,
            browser.clone(),
            Arc::clone(&shared),
            Arc::clone(&self.runner),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.signing),
            self.config.max_chain_steps,
        );
        let cell = Arc::new(InstanceCell {
            shared,
            browser,
            inner: Mutex::new(instance),
        });
        let handle = DebotHandle(self.instances.allocate(cell).await);
        info!(address, handle = handle.0, "debot initialized");
        Ok(handle)
    }

    /// Stateless metadata read; no handle is allocated.
    pub async fn fetch(&self, address: &str) -> DebotResult<DebotInfo> {
        let (_, info, _) = self.load(address).await?;
        Ok(info)
    }

    /// Drive the entry context through the full switch/enumerate sequence.
    pub async fn start(&self, handle: DebotHandle) -> DebotResult<()> {
        let cell = self.cell(handle).await?;
        let mut instance = cell.inner.lock().await;
        self.ensure_live(handle, &cell)?;
        instance.start().await
    }

    /// Execute one action of the instance's current surface.
    pub async fn execute(&self, handle: DebotHandle, action: DebotAction) -> DebotResult<()> {
        let cell = self.cell(handle).await?;
        let mut instance = cell.inner.lock().await;
        self.ensure_live(handle, &cell)?;
        instance.execute(action).await
    }

    /// Route an inbound interface message into the instance.
    pub async fn send(&self, handle: DebotHandle, message: &str) -> DebotResult<()> {
        let cell = self.cell(handle).await?;
        let mut instance = cell.inner.lock().await;
        self.ensure_live(handle, &cell)?;
        instance.send(message).await
    }

    /// Remove an instance: mark it removed immediately (an operation
    /// suspended on a browser reply is not waited for; its late reply is
    /// discarded), release every delegated signing box exactly once, and
    /// announce the finish sentinel.
    pub async fn remove(&self, handle: DebotHandle) -> DebotResult<()> {
        let cell = self
            .instances
            .release(handle.0)
            .await
            .ok_or(DebotError::InvalidHandle(handle.0))?;
        cell.shared.mark_removed();

        for signing_box in cell.shared.drain_boxes() {
            if self.signing.close(signing_box).await.is_none() {
                warn!(
                    handle = signing_box.0,
                    "delegated signing box was already closed"
                );
            }
        }

        if let Err(e) = cell.browser.notify(BrowserMessage::Switch {
            context_id: CONTEXT_EXIT,
        }) {
            debug!(error = %e, "browser unreachable during removal");
        }
        info!(handle = handle.0, "debot removed");
        Ok(())
    }

    /// Register a browser-side signing box so its handle can be returned in
    /// a `GetSigningBox` reply.
    pub async fn register_signing_box(
        &self,
        signing_box: Arc<dyn SigningBox>,
    ) -> SigningBoxHandle {
        self.signing.register(signing_box).await
    }

    /// Close a signing box that was never delegated (or reclaim one after
    /// its instance is gone). Double-close is `InvalidHandle`.
    pub async fn close_signing_box(&self, handle: SigningBoxHandle) -> DebotResult<()> {
        self.signing
            .close(handle)
            .await
            .map(|_| ())
            .ok_or(DebotError::InvalidHandle(handle.0))
    }

    /// Number of live instances.
    pub async fn instance_count(&self) -> usize {
        self.instances.len().await
    }

    /// Remove every remaining instance concurrently, then close whatever
    /// signing boxes are still registered.
    pub async fn shutdown(&self) {
        let handles = self.instances.handles().await;
        let removals = handles.into_iter().map(|h| self.remove(DebotHandle(h)));
        for result in join_all(removals).await {
            if let Err(e) = result {
                debug!(error = %e, "instance vanished during shutdown");
            }
        }
        for handle in self.signing.handles().await {
            if self.signing.close(handle).await.is_some() {
                warn!(handle = handle.0, "signing box still registered at shutdown");
            }
        }
    }

    async fn cell(&self, handle: DebotHandle) -> DebotResult<Arc<InstanceCell>> {
        self.instances
            .get(handle.0)
            .await
            .ok_or(DebotError::InvalidHandle(handle.0))
    }

    /// A removal that raced the table lookup still surfaces as
    /// `InvalidHandle` rather than starting work on a dead instance.
    fn ensure_live(&self, handle: DebotHandle, cell: &InstanceCell) -> DebotResult<()> {
        if cell.shared.is_removed() {
            Err(DebotError::InvalidHandle(handle.0))
        } else {
            Ok(())
        }
    }

    /// Fetch and parse everything `init`/`fetch` need: the contract, its
    /// ABI, the metadata snapshot, and the static contexts.
    async fn load(
        &self,
        address: &str,
    ) -> DebotResult<(serde_json::Value, DebotInfo, Vec<DContext>)> {
        let contract = self
            .fetcher
            .fetch_code_and_data(address)
            .await
            .map_err(|e| DebotError::FetchFailed(e.to_string()))?;
        let abi: serde_json::Value = serde_json::from_str(&contract.abi)
            .map_err(|e| DebotError::InvalidAbi(e.to_string()))?;

        let info_raw = self
            .runner
            .call(&abi, "getDebotInfo", &serde_json::json!({}))
            .await
            .map_err(|e| DebotError::FetchFailed(format!("getDebotInfo: {e}")))?;
        let info: DebotInfo = serde_json::from_value(info_raw)
            .map_err(|e| DebotError::InvalidJsonParams(format!("malformed debot info: {e}")))?;

        let fetched = self
            .runner
            .call(&abi, "fetch", &serde_json::json!({}))
            .await
            .map_err(|e| DebotError::FetchFailed(format!("fetch: {e}")))?;
        let contexts: Vec<DContext> = match fetched.get("contexts") {
            None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                DebotError::InvalidJsonParams(format!("malformed context list: {e}"))
            })?,
        };

        Ok((abi, info, contexts))
    }
}
