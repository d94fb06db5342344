use crate::errors::ExecError;

/// Information about the transaction a call runs in, exposed through `@` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxContext {
    /// `@caller`
    pub caller: String,
    /// `@signer`
    pub signer: Vec<u8>,
    /// `@txid`
    pub txid: String,
    /// `@authenticator`
    pub authenticator: String,
    /// `@height`
    pub height: i64,
    /// `@block_timestamp`
    pub block_timestamp: i64,
    /// Marks calls made by the node outside of any transaction. Reading any `@`
    /// variable other than `@foreign_caller` is then an error.
    pub invalid: bool,
    /// Skips privilege checks and the extension schema guard.
    pub override_authz: bool,
}

impl TxContext {
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            ..Self::default()
        }
    }

    /// A context for calls made outside of a transaction.
    pub fn outside_tx() -> Self {
        Self {
            invalid: true,
            ..Self::default()
        }
    }

    pub fn with_override_authz(mut self) -> Self {
        self.override_authz = true;
        self
    }
}

/// What a top-level call produced besides its rows.
#[derive(Debug, Default)]
pub struct CallResult {
    /// Messages from `notice(...)`, in call order.
    pub logs: Vec<String>,
    /// The error raised by `error(...)` or by a violated table constraint, if any.
    /// The interpreter's state has already been rolled back when this is set.
    pub error: Option<ExecError>,
}
