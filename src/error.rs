//! Error types used by the procvisor runtime.
//!
//! This module defines the error enums of each layer:
//!
//! - [`SupervisorError`] : errors returned by supervisor operations (register, start, stop, call).
//! - [`TransportError`] : errors raised while allocating, binding, dialing or reclaiming endpoints.
//! - [`RpcError`] : errors raised by the RPC wire (client and server side).
//! - [`ProcedureError`] : errors returned by procedures served over RPC.
//! - [`WorkerError`] : errors that end a worker runtime.
//!
//! All types provide `as_label` for logs/metrics; [`SupervisorError`] also offers `as_message`.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// # Errors produced by supervisor operations.
///
/// Every variant is returned to the immediate caller of the operation that detected it;
/// none of them terminate the supervisor itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The process spec is invalid (empty name or executable path).
    #[error("invalid process spec: {reason}")]
    Validation {
        /// What is wrong with the spec.
        reason: String,
    },

    /// No process is registered under the given key.
    #[error("process {category}:{name} does not exist")]
    NotFound { category: String, name: String },

    /// The process is already running.
    #[error("process {category}:{name} is already running")]
    AlreadyRunning { category: String, name: String },

    /// The executable could not be launched.
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The child exited before its listener became reachable.
    #[error("process {category}:{name} exited during startup ({status})")]
    ExitedEarly {
        category: String,
        name: String,
        status: String,
    },

    /// The worker never became reachable within the polling budget.
    #[error("process {category}:{name} not reachable after {attempts} attempts ({elapsed:?})")]
    StartTimeout {
        category: String,
        name: String,
        attempts: u32,
        elapsed: Duration,
    },

    /// The worker address was reachable but the RPC handshake failed.
    #[error("dial {category}:{name} at {address} failed: {source}")]
    Dial {
        category: String,
        name: String,
        address: String,
        #[source]
        source: RpcError,
    },

    /// The URN is not of the form `<category>:<name>:<function>`.
    #[error("URN {urn:?} must be in format <category>:<name>:<function>")]
    InvalidUrn { urn: String },

    /// The addressed service is unknown, not running or not dialed yet.
    #[error("service {category}:{name} is not available")]
    ServiceNotFound { category: String, name: String },

    /// The remote invocation failed (transport, remote execution or result decoding).
    #[error("call {urn} failed: {source}")]
    RemoteCall {
        urn: String,
        #[source]
        source: RpcError,
    },

    /// The OS process could not be terminated or reaped.
    #[error("failed to terminate {category}:{name}: {source}")]
    Terminate {
        category: String,
        name: String,
        #[source]
        source: io::Error,
    },

    /// The transport resource could not be reclaimed.
    #[error("failed to reclaim transport of {category}:{name}: {source}")]
    Reclaim {
        category: String,
        name: String,
        #[source]
        source: TransportError,
    },

    /// Transport-level failure not tied to a single process (allocation, supervisor endpoint).
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::SupervisorError;
    ///
    /// let err = SupervisorError::InvalidUrn { urn: "nope".into() };
    /// assert_eq!(err.as_label(), "invalid_urn");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Validation { .. } => "validation",
            SupervisorError::NotFound { .. } => "not_found",
            SupervisorError::AlreadyRunning { .. } => "already_running",
            SupervisorError::Spawn { .. } => "spawn_failed",
            SupervisorError::ExitedEarly { .. } => "exited_early",
            SupervisorError::StartTimeout { .. } => "start_timeout",
            SupervisorError::Dial { .. } => "dial_failed",
            SupervisorError::InvalidUrn { .. } => "invalid_urn",
            SupervisorError::ServiceNotFound { .. } => "service_not_found",
            SupervisorError::RemoteCall { .. } => "remote_call",
            SupervisorError::Terminate { .. } => "terminate_failed",
            SupervisorError::Reclaim { .. } => "reclaim_failed",
            SupervisorError::Transport(_) => "transport",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            SupervisorError::RemoteCall { urn, source } => format!("urn={urn} cause={source}"),
            SupervisorError::Dial { address, source, .. } => {
                format!("address={address} cause={source}")
            }
            other => other.to_string(),
        }
    }

    pub(crate) fn not_found(category: &str, name: &str) -> Self {
        SupervisorError::NotFound {
            category: category.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_running(category: &str, name: &str) -> Self {
        SupervisorError::AlreadyRunning {
            category: category.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn service_not_found(category: &str, name: &str) -> Self {
        SupervisorError::ServiceNotFound {
            category: category.to_string(),
            name: name.to_string(),
        }
    }
}

/// # Errors produced by the transport layer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// The textual address could not be parsed.
    #[error("invalid address {0:?}: expected unix:<path> or tcp:<ip>:<port>")]
    InvalidAddress(String),

    /// No free endpoint could be produced.
    #[error("failed to allocate endpoint: {0}")]
    Allocate(#[source] io::Error),

    /// Listening on the address failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Dialing the address failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Removing the endpoint's artifact failed.
    #[error("failed to reclaim {address}: {source}")]
    Reclaim {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::InvalidAddress(_) => "transport_invalid_address",
            TransportError::Allocate(_) => "transport_allocate",
            TransportError::Bind { .. } => "transport_bind",
            TransportError::Connect { .. } => "transport_connect",
            TransportError::Reclaim { .. } => "transport_reclaim",
        }
    }
}

/// # Errors produced by the RPC wire.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RpcError {
    /// Underlying stream failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Framing failure (line too long or broken stream).
    #[error("framing error: {0}")]
    Framing(#[from] LinesCodecError),

    /// Message or value could not be encoded/decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The remote procedure returned an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The remote answered with something other than what was expected.
    #[error("unexpected reply: {0}")]
    Unexpected(String),

    /// The connection is closed; no reply will arrive.
    #[error("connection closed")]
    Closed,

    /// Dialing the endpoint failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RpcError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RpcError::Io(_) => "rpc_io",
            RpcError::Framing(_) => "rpc_framing",
            RpcError::Encoding(_) => "rpc_encoding",
            RpcError::Remote(_) => "rpc_remote",
            RpcError::Unexpected(_) => "rpc_unexpected",
            RpcError::Closed => "rpc_closed",
            RpcError::Transport(_) => "rpc_transport",
        }
    }

    /// True when the connection can no longer carry calls.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            RpcError::Closed | RpcError::Io(_) | RpcError::Framing(_) | RpcError::Transport(_)
        )
    }
}

/// # Errors returned by a [`Procedure`](crate::Procedure).
///
/// The server sends the `Display` form back to the caller, where it
/// surfaces as [`RpcError::Remote`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProcedureError {
    /// Positional parameters do not match the declared argument types.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The procedure ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The result could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A procedure with the same name is already registered.
    #[error("procedure {0:?} is already registered")]
    Duplicate(String),
}

impl ProcedureError {
    /// Shorthand for [`ProcedureError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        ProcedureError::Failed(msg.into())
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcedureError::InvalidParams(_) => "procedure_invalid_params",
            ProcedureError::Failed(_) => "procedure_failed",
            ProcedureError::Encoding(_) => "procedure_encoding",
            ProcedureError::Duplicate(_) => "procedure_duplicate",
        }
    }
}

/// # Errors that end a worker runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The bootstrap payload is missing or malformed.
    #[error("invalid bootstrap payload: {0}")]
    Bootstrap(String),

    /// Listening on the assigned address failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Dialing or calling the supervisor failed.
    #[error("supervisor call failed: {0}")]
    Supervisor(#[from] RpcError),

    /// Signal registration or stdin handling failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Bootstrap(_) => "worker_bootstrap",
            WorkerError::Transport(_) => "worker_transport",
            WorkerError::Supervisor(_) => "worker_supervisor",
            WorkerError::Io(_) => "worker_io",
        }
    }
}
