//! # Process specification.
//!
//! [`ProcessSpec`] is what the embedding application registers: which binary
//! to launch, under which key, and what to hand it at bootstrap. It is
//! immutable once registered.
//!
//! ## Example
//! ```rust
//! use procvisor::ProcessSpec;
//!
//! let spec = ProcessSpec::builder("calc", "add1", "/usr/local/bin/calc-worker")
//!     .with_env("RUST_LOG", "debug")
//!     .with_config(br#"{"precision":2}"#.to_vec())
//!     .with_trust_token("s3cret")
//!     .build();
//!
//! assert_eq!(spec.key(), "calc:add1");
//! assert!(spec.transport_address().is_none());
//! ```

use std::path::{Path, PathBuf};

use crate::error::SupervisorError;
use crate::transport::Address;

/// Immutable description of one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSpec {
    category: String,
    name: String,
    executable_path: PathBuf,
    transport_address: Option<Address>,
    environment: Vec<(String, String)>,
    config_payload: Vec<u8>,
    trust_token: String,
    args: Vec<String>,
}

impl ProcessSpec {
    /// Spec with no environment, config, token or fixed address.
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        executable_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            executable_path: executable_path.into(),
            transport_address: None,
            environment: Vec::new(),
            config_payload: Vec::new(),
            trust_token: String::new(),
            args: Vec::new(),
        }
    }

    pub fn builder(
        category: impl Into<String>,
        name: impl Into<String>,
        executable_path: impl Into<PathBuf>,
    ) -> ProcessSpecBuilder {
        ProcessSpecBuilder {
            spec: Self::new(category, name, executable_path),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `category:name`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.category, self.name)
    }

    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }

    /// Fixed address, or `None` to let the transport allocate one.
    pub fn transport_address(&self) -> Option<&Address> {
        self.transport_address.as_ref()
    }

    /// The child's whole environment; empty means inherit the supervisor's.
    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    pub fn config_payload(&self) -> &[u8] {
        &self.config_payload
    }

    /// Empty string means "no token".
    pub fn trust_token(&self) -> &str {
        &self.trust_token
    }

    /// Extra arguments appended after the bootstrap flags.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Rejects specs with an empty name or executable path.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.name.is_empty() {
            return Err(SupervisorError::Validation {
                reason: format!("empty name in category {:?}", self.category),
            });
        }
        if self.executable_path.as_os_str().is_empty() {
            return Err(SupervisorError::Validation {
                reason: format!("empty executable path for {}", self.key()),
            });
        }
        Ok(())
    }
}

/// Fluent builder for [`ProcessSpec`].
#[derive(Clone, Debug)]
pub struct ProcessSpecBuilder {
    spec: ProcessSpec,
}

impl ProcessSpecBuilder {
    pub fn with_address(mut self, address: Address) -> Self {
        self.spec.transport_address = Some(address);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.environment.push((key.into(), value.into()));
        self
    }

    pub fn with_config(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.spec.config_payload = payload.into();
        self
    }

    pub fn with_trust_token(mut self, token: impl Into<String>) -> Self {
        self.spec.trust_token = token.into();
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    pub fn build(self) -> ProcessSpec {
        self.spec
    }
}
