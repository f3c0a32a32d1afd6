//! DeBot engine core: loads decentralized bots, drives their context/action
//! model against an asynchronous browser collaborator, and keeps the
//! handle tables that let instances and signing boxes coexist in one host
//! process.

pub mod action;
pub mod activity;
pub mod browser;
pub mod engine;
pub mod errors;
pub mod handle;
pub mod info;
pub mod instance;
pub mod services;
pub mod signing;

pub use action::{ActionAttributes, ActionType, DebotAction};
pub use activity::{DebotActivity, Spending, TransactionEmulation};
pub use browser::{BrowserCallbacks, BrowserChannel, BrowserMessage, BrowserReply, BrowserRequest};
pub use engine::{DebotEngine, DebotHandle, EngineConfig};
pub use errors::{DebotError, DebotResult};
pub use info::{
    CONTEXT_CURRENT, CONTEXT_EXIT, CONTEXT_PREV, CONTEXT_ZERO, DContext, DebotInfo,
};
pub use services::{ContractFetcher, FetchedContract, MessageDispatcher, MethodRunner};
pub use signing::{SigningBox, SigningBoxHandle, SigningBoxRegistry};
