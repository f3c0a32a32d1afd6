//! Boundary traits for the blockchain collaborators the engine consumes.
//!
//! None of these carry engine state; they are pure request/response
//! transforms. Implementations return `anyhow::Result` and the engine maps
//! failures into its typed taxonomy at each call site.

use anyhow::Result;
use async_trait::async_trait;

use crate::activity::TransactionEmulation;

/// Contract code, data, and ABI as fetched from the chain. Code and data are
/// base64, the ABI is JSON text.
#[derive(Debug, Clone)]
pub struct FetchedContract {
    pub code: String,
    pub data: String,
    pub abi: String,
}

/// Downloads a DeBot's code, data, and ABI by account address.
#[async_trait]
pub trait ContractFetcher: Send + Sync {
    async fn fetch_code_and_data(&self, address: &str) -> Result<FetchedContract>;
}

/// Executes get-methods against a contract's ABI.
#[async_trait]
pub trait MethodRunner: Send + Sync {
    async fn call(
        &self,
        abi: &serde_json::Value,
        method: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Emulates and dispatches external messages. `emulate` supplies the
/// spending list and fee the approval activity carries.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn emulate(&self, message: &str) -> Result<TransactionEmulation>;
    async fn send_external_message(&self, message: &str) -> Result<()>;
}
