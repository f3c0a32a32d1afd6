//! Signing boxes: delegated signing capabilities addressed by handle.
//!
//! A signing box produces detached signatures without exposing its private
//! key. The browser registers boxes with the engine and hands their handles
//! over in `GetSigningBox` replies; from that point the receiving DeBot
//! instance owns the handle until it is removed.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::handle::HandleTable;

/// Opaque reference to a registered signing box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningBoxHandle(pub u32);

/// A delegated signing capability. Implementations live on the browser side;
/// the engine only ever sees them through the registry.
#[async_trait]
pub trait SigningBox: Send + Sync {
    /// Hex-encoded public key of the underlying keypair.
    async fn public_key(&self) -> Result<String>;

    /// Produce a detached signature over `unsigned` (a message digest).
    async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>>;
}

/// Handle table specialized to signing boxes.
#[derive(Default)]
pub struct SigningBoxRegistry {
    boxes: HandleTable<Arc<dyn SigningBox>>,
}

impl SigningBoxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, signing_box: Arc<dyn SigningBox>) -> SigningBoxHandle {
        SigningBoxHandle(self.boxes.allocate(signing_box).await)
    }

    pub async fn get(&self, handle: SigningBoxHandle) -> Option<Arc<dyn SigningBox>> {
        self.boxes.get(handle.0).await
    }

    /// Remove a box from the registry. Returns `None` when the handle is
    /// stale; a double close is a lifecycle bug the caller must surface.
    pub async fn close(&self, handle: SigningBoxHandle) -> Option<Arc<dyn SigningBox>> {
        self.boxes.release(handle.0).await
    }

    pub async fn len(&self) -> usize {
        self.boxes.len().await
    }

    pub async fn handles(&self) -> Vec<SigningBoxHandle> {
        self.boxes
            .handles()
            .await
            .into_iter()
            .map(SigningBoxHandle)
            .collect()
    }
}
