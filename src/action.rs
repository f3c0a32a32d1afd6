//! Actions: the selectable operations a DeBot exposes within a context.

use serde::{Deserialize, Serialize};

use crate::errors::{DebotError, DebotResult};

/// What kind of effect an action performs when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// No effect beyond the target-context transition.
    Empty = 0,
    /// Run a get-method on the DeBot; its output may produce follow-up
    /// actions and log lines.
    RunAction = 1,
    /// Run a get-method on the DeBot; its output may produce log lines only.
    RunMethod = 2,
    /// Build an external message, seek approval, then dispatch it.
    SendMessage = 3,
    /// Show the action description to the user.
    Print = 4,
    /// Hand control to another DeBot and wait for it to finish.
    Invoke = 5,
    /// Pure context move.
    Goto = 6,
}

impl ActionType {
    pub fn from_u8(value: u8) -> DebotResult<Self> {
        match value {
            0 => Ok(ActionType::Empty),
            1 => Ok(ActionType::RunAction),
            2 => Ok(ActionType::RunMethod),
            3 => Ok(ActionType::SendMessage),
            4 => Ok(ActionType::Print),
            5 => Ok(ActionType::Invoke),
            6 => Ok(ActionType::Goto),
            other => Err(DebotError::InvalidFunctionId(format!(
                "unknown action type {other}"
            ))),
        }
    }
}

/// One selectable operation within a context.
///
/// `attributes` is a comma-separated `key[=value]` flag list (see
/// [`ActionAttributes`]); `misc` is an opaque base64 payload whose meaning
/// depends on the action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebotAction {
    /// Text shown to the user.
    #[serde(default)]
    pub description: String,
    /// Contract function or target the action maps to.
    pub name: String,
    pub action_type: u8,
    /// Context to enter after the action runs. See the sentinels in
    /// [`crate::info`].
    pub to: u8,
    #[serde(default)]
    pub attributes: String,
    #[serde(default)]
    pub misc: String,
}

impl DebotAction {
    pub fn kind(&self) -> DebotResult<ActionType> {
        ActionType::from_u8(self.action_type)
    }

    pub fn parse_attributes(&self) -> DebotResult<ActionAttributes> {
        ActionAttributes::parse(&self.attributes)
    }

    /// True when the action chains without a caller-issued `execute`.
    /// Malformed attributes read as non-instant; they are rejected properly
    /// once the action is actually dispatched.
    pub fn is_instant(&self) -> bool {
        ActionAttributes::parse(&self.attributes)
            .map(|attrs| attrs.instant)
            .unwrap_or(false)
    }
}

/// Parsed action attribute flags.
///
/// The attribute string is a small flag language: `instant` executes without
/// prompting, `args`/`fargs` declare how function arguments are collected,
/// `sign` demands a detached signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionAttributes {
    pub instant: bool,
    pub sign: bool,
    /// Collect arguments through a single `Input` round-trip; the value, if
    /// present, names the method the arguments are for.
    pub args: Option<String>,
    /// Method on the DeBot returning the named prompts to collect one by one.
    pub fargs: Option<String>,
}

impl ActionAttributes {
    pub fn parse(raw: &str) -> DebotResult<Self> {
        let mut attrs = ActionAttributes::default();
        for flag in raw.split(',') {
            let flag = flag.trim();
            if flag.is_empty() {
                if raw.trim().is_empty() {
                    break;
                }
                return Err(DebotError::InvalidJsonParams(format!(
                    "empty attribute flag in {raw:?}"
                )));
            }
            match flag.split_once('=') {
                Some((key, value)) => {
                    if value.is_empty() {
                        return Err(DebotError::InvalidJsonParams(format!(
                            "attribute {key:?} has a dangling '='"
                        )));
                    }
                    match key {
                        "args" => attrs.args = Some(value.to_string()),
                        "fargs" => attrs.fargs = Some(value.to_string()),
                        // unknown keyed flags are ignored for forward compat
                        _ => {}
                    }
                }
                None => match flag {
                    "instant" => attrs.instant = true,
                    "sign" => attrs.sign = true,
                    "args" => attrs.args = Some(String::new()),
                    _ => {}
                },
            }
        }
        Ok(attrs)
    }

    pub fn needs_arguments(&self) -> bool {
        self.args.is_some() || self.fargs.is_some()
    }
}
