//! DeBot metadata and contexts.

use serde::{Deserialize, Serialize};

use crate::action::DebotAction;

/// Entry context every DeBot starts in.
pub const CONTEXT_ZERO: u8 = 0;
/// Stay in the current context after an action runs.
pub const CONTEXT_CURRENT: u8 = 253;
/// Return to the context that was active before the current one.
pub const CONTEXT_PREV: u8 = 254;
/// Finish sentinel: the browser may release the instance's resources.
pub const CONTEXT_EXIT: u8 = 255;

/// Immutable metadata snapshot, fetched once at `init`/`fetch` time from the
/// DeBot's `getDebotInfo` get-method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebotInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub publisher: Option<String>,
    pub caption: Option<String>,
    pub author: Option<String>,
    /// Greeting shown by the browser before the entry context.
    pub hello: Option<String>,
    /// ISO-639 interface language.
    pub language: Option<String>,
    /// ABI version ("x.y") the DeBot was built against.
    #[serde(default)]
    pub dabi_version: String,
    /// Interface ids the DeBot implements; inbound `send` messages must be
    /// addressed to one of these.
    #[serde(default)]
    pub interfaces: Vec<String>,
}

/// A named menu state of a DeBot: a numbered context with its action list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DContext {
    pub id: u8,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub actions: Vec<DebotAction>,
}
