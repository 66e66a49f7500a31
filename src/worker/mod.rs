//! # Worker side of the bootstrap contract.
//!
//! [`WorkerRuntime`] is what a worker binary builds in `main`: it reads the
//! [`Bootstrap`] payload (flags if `--address` is present, otherwise one JSON
//! line on stdin), serves `ping` plus the registered procedures on the
//! assigned address, and exits cleanly on SIGTERM/SIGINT after removing its
//! socket.
//!
//! ```text
//! launch ─► Bootstrap (flags | stdin) ─► register procedures
//!        ─► [dial supervisor] ─► bind address ─► serve ─► SIGTERM ─► reclaim ─► exit 0
//! ```
//!
//! ## Example
//! ```no_run
//! use procvisor::{ProcedureError, WorkerRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut worker = WorkerRuntime::from_env().await?;
//!     worker.register_fn("Add", |(a, b): (i64, i64)| async move {
//!         Ok::<_, ProcedureError>(a + b)
//!     })?;
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

mod signals;

use std::future::Future;

use clap::Parser;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::bootstrap::{ARG_ADDRESS, Bootstrap};
use crate::error::{ProcedureError, RpcError, WorkerError};
use crate::rpc::{PING, ProcedureRef, Procedures, RpcClient, RpcServer};
use crate::transport::Address;

use signals::Termination;

/// Flag form of the bootstrap payload.
#[derive(Parser, Debug)]
#[command(about = "procvisor worker", disable_help_subcommand = true)]
struct BootstrapArgs {
    /// Address to listen on (`unix:<path>` or `tcp:<ip>:<port>`).
    #[arg(long)]
    address: String,
    /// Supervisor address to dial back.
    #[arg(long)]
    supervisor: Option<String>,
    /// Trust token expected on every request.
    #[arg(long, default_value = "")]
    token: String,
    /// Base64 configuration payload.
    #[arg(long, default_value = "")]
    config: String,
    /// Arguments after `--`.
    #[arg(last = true)]
    extra: Vec<String>,
}

impl From<BootstrapArgs> for Bootstrap {
    fn from(a: BootstrapArgs) -> Self {
        Bootstrap {
            transport_address: a.address,
            supervisor_address: a.supervisor,
            config: a.config,
            trust_token: a.token,
        }
    }
}

/// Runtime of one worker process.
pub struct WorkerRuntime {
    bootstrap: Bootstrap,
    address: Address,
    config: Vec<u8>,
    procedures: Procedures,
}

impl WorkerRuntime {
    /// Validates `bootstrap` (address syntax, base64 config).
    pub fn new(bootstrap: Bootstrap) -> Result<Self, WorkerError> {
        let address = bootstrap.address()?;
        let config = bootstrap
            .config_bytes()
            .map_err(|e| WorkerError::Bootstrap(format!("config is not base64: {e}")))?;
        bootstrap.supervisor()?;
        Ok(Self {
            bootstrap,
            address,
            config,
            procedures: Procedures::new(),
        })
    }

    /// Reads the payload from the process arguments, or from stdin when
    /// `--address` is absent.
    pub async fn from_env() -> Result<Self, WorkerError> {
        let args: Vec<String> = std::env::args().collect();
        if args.iter().any(|a| a == ARG_ADDRESS || a.starts_with("--address=")) {
            return Self::from_args(args);
        }
        Self::from_reader(tokio::io::stdin()).await
    }

    /// Parses the flag form; `args[0]` is the program name.
    pub fn from_args<I, T>(args: I) -> Result<Self, WorkerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let parsed = BootstrapArgs::try_parse_from(args)
            .map_err(|e| WorkerError::Bootstrap(e.to_string()))?;
        Self::new(parsed.into())
    }

    /// Reads one JSON line from `reader`.
    pub async fn from_reader<R>(reader: R) -> Result<Self, WorkerError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut line = String::new();
        let n = BufReader::new(reader).read_line(&mut line).await?;
        if n == 0 {
            return Err(WorkerError::Bootstrap("stdin closed before payload".into()));
        }
        let bootstrap =
            Bootstrap::from_line(&line).map_err(|e| WorkerError::Bootstrap(e.to_string()))?;
        Self::new(bootstrap)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Decoded configuration bytes.
    pub fn config(&self) -> &[u8] {
        &self.config
    }

    /// Configuration decoded as JSON; an empty payload yields `None`.
    pub fn config_json<T: DeserializeOwned>(&self) -> Result<Option<T>, WorkerError> {
        if self.config.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&self.config)
            .map(Some)
            .map_err(|e| WorkerError::Bootstrap(format!("config is not valid JSON: {e}")))
    }

    pub fn trust_token(&self) -> Option<String> {
        self.bootstrap.token()
    }

    pub fn bootstrap(&self) -> &Bootstrap {
        &self.bootstrap
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        procedure: ProcedureRef,
    ) -> Result<&mut Self, ProcedureError> {
        self.procedures.register(name, procedure)?;
        Ok(self)
    }

    /// Registers a typed procedure; see [`ProcedureFn`](crate::ProcedureFn).
    pub fn register_fn<A, R, F, Fut>(
        &mut self,
        name: impl Into<String>,
        f: F,
    ) -> Result<&mut Self, ProcedureError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ProcedureError>> + Send + 'static,
    {
        self.procedures.register_fn(name, f)?;
        Ok(self)
    }

    /// Dials the supervisor and checks `ping`; `None` if no supervisor address was given.
    pub async fn connect_supervisor(&self) -> Result<Option<RpcClient>, WorkerError> {
        let Some(address) = self.bootstrap.supervisor()? else {
            return Ok(None);
        };
        let client = RpcClient::connect(&address, self.trust_token()).await?;
        match client.call(PING, Vec::new()).await? {
            serde_json::Value::String(s) if s == "pong" => Ok(Some(client)),
            other => Err(RpcError::Unexpected(format!("ping answered {other}")).into()),
        }
    }

    /// Serves until SIGTERM, SIGINT or SIGQUIT.
    pub async fn run(self) -> Result<(), WorkerError> {
        let mut signals = Termination::register()?;
        let stop = CancellationToken::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            let sig = signals.recv().await;
            tracing::info!(signal = sig, "termination requested");
            trigger.cancel();
        });
        self.run_until(stop).await
    }

    /// Serves until `shutdown` is cancelled, then removes the socket.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let listener = self.address.bind().await?;
        tracing::info!(address = %self.address, procedures = ?self.procedures.names(), "worker listening");

        RpcServer::new(self.procedures)
            .with_token(self.bootstrap.token())
            .serve(listener, shutdown)
            .await;

        self.address.reclaim().await?;
        Ok(())
    }
}
