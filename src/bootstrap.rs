//! # Bootstrap payload.
//!
//! Everything a freshly spawned worker needs to know, delivered either as one
//! JSON line on stdin or as command-line flags ([`BootstrapMode`](crate::BootstrapMode)):
//!
//! ```text
//! stdin: {"transport_address":"unix:/tmp/procvisor-….sock","supervisor_address":"unix:…","config":"eyJ…","trust_token":"…"}
//! args:  --address unix:/tmp/… --supervisor unix:/tmp/… --token … --config eyJ…
//! ```
//!
//! `config` is base64 (standard alphabet) so that arbitrary bytes survive both forms.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::transport::Address;

/// Flag carrying the worker's own address.
pub const ARG_ADDRESS: &str = "--address";
/// Flag carrying the supervisor's address.
pub const ARG_SUPERVISOR: &str = "--supervisor";
/// Flag carrying the trust token.
pub const ARG_TOKEN: &str = "--token";
/// Flag carrying the base64 config payload.
pub const ARG_CONFIG: &str = "--config";

/// Bootstrap payload exchanged between supervisor and worker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    /// Address the worker must listen on (textual form).
    pub transport_address: String,
    /// Address of the supervisor's own RPC endpoint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_address: Option<String>,
    /// Base64-encoded opaque configuration.
    #[serde(default)]
    pub config: String,
    /// Opaque token; empty means none.
    #[serde(default)]
    pub trust_token: String,
}

impl Bootstrap {
    pub fn new(
        address: &Address,
        supervisor: Option<&Address>,
        config: &[u8],
        trust_token: &str,
    ) -> Self {
        Self {
            transport_address: address.to_string(),
            supervisor_address: supervisor.map(ToString::to_string),
            config: STANDARD.encode(config),
            trust_token: trust_token.to_string(),
        }
    }

    /// One JSON line, newline-terminated.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Flag form; empty optional fields are left out.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![ARG_ADDRESS.to_string(), self.transport_address.clone()];
        if let Some(sup) = &self.supervisor_address {
            args.push(ARG_SUPERVISOR.to_string());
            args.push(sup.clone());
        }
        if !self.trust_token.is_empty() {
            args.push(ARG_TOKEN.to_string());
            args.push(self.trust_token.clone());
        }
        if !self.config.is_empty() {
            args.push(ARG_CONFIG.to_string());
            args.push(self.config.clone());
        }
        args
    }

    pub fn address(&self) -> Result<Address, TransportError> {
        self.transport_address.parse()
    }

    pub fn supervisor(&self) -> Result<Option<Address>, TransportError> {
        self.supervisor_address.as_deref().map(str::parse).transpose()
    }

    /// Decoded configuration bytes.
    pub fn config_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.config)
    }

    /// Token as an option (empty → `None`).
    pub fn token(&self) -> Option<String> {
        (!self.trust_token.is_empty()).then(|| self.trust_token.clone())
    }
}
