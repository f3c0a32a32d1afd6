//! Activities: pending side effects awaiting browser approval.

use serde::{Deserialize, Serialize};

/// One outgoing value transfer inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spending {
    /// Amount in nanotokens.
    pub amount: u64,
    /// Destination account address.
    pub dst: String,
}

/// A side-effecting operation the engine will not perform until the browser
/// approves it. The spending list is passed through from emulation
/// unmodified; validating it against the fee is the approver's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DebotActivity {
    Transaction {
        /// Base64 external message about to be sent.
        msg: String,
        /// Target account address.
        dst: String,
        /// Value transfers the message will cause.
        out: Vec<Spending>,
        /// Estimated total fee in nanotokens.
        fee: u64,
        /// True when the transaction updates the account's code.
        setcode: bool,
        /// Hex public key the message will be signed with, empty if unsigned.
        signkey: String,
        /// Signing box used, zero if unsigned.
        signing_box_handle: u32,
    },
}

/// Result of emulating an external message before it is dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionEmulation {
    pub out: Vec<Spending>,
    pub fee: u64,
}
