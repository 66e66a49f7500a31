//! # procvisor
//!
//! **Procvisor** is a local process supervisor for Rust.
//!
//! It launches named worker subprocesses, gives each one a private RPC
//! endpoint (a Unix domain socket or a loopback TCP port) and lets the host
//! call their functions by URN as if they were local objects. Crashed workers
//! are restarted, their output is captured, and every call yields a latency
//! metric.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ProcessSpec  │   │ ProcessSpec  │   │ ProcessSpec  │
//!     │ (calc/add1)  │   │ (calc/add2)  │   │ (text/upper) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - Registry (category → name → handle)                            │
//! │  - Transport (address leases: unix sockets | loopback ports)      │
//! │  - OutputBuffers, metrics channel, failure channel                │
//! │  - own RpcServer (ping + reverse-call procedures)                 │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐         │
//!   │ worker   │       │ worker   │       │ worker   │         │ publish
//!   │ process  │       │ process  │       │ process  │         │ Events
//!   └──┬───┬───┘       └──┬───┬───┘       └──┬───┬───┘         │
//!      │   └ RpcClient    │   └ RpcClient    │   └ RpcClient   │
//!      ├ watch task       ├ watch task       ├ watch task      │
//!      └ drain task       └ drain task       └ drain task      │
//!                                                              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                  Bus (broadcast) ──► SubscriberSet                │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! register ─► Registered ─start─► Starting ─ping ok─► Running ─stop─► Stopping ─► Registered
//!                                                        │
//!                                                  child exits
//!                                                        ▼
//!                                 Crashed ─► [backoff] ─► Restarting ─► Running
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types / traits                          |
//! |-------------------|-----------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Register, start, stop, restart workers; crash recovery.   | [`Supervisor`], [`ProcessSpec`]             |
//! | **Calls**         | URN-addressed calls with one metric per call.             | [`Supervisor::call`], [`MetricsEvent`]      |
//! | **Transport**     | Unix sockets or loopback ports, leased per worker.        | [`Transport`], [`Address`], [`TransportKind`] |
//! | **RPC**           | JSON-lines request/response, typed procedures.            | [`RpcClient`], [`RpcServer`], [`Procedures`] |
//! | **Workers**       | Bootstrap contract for worker binaries.                   | [`WorkerRuntime`], [`Bootstrap`]            |
//! | **Subscriber API**| Hook into lifecycle events.                               | [`Subscribe`], [`Event`]                    |
//! | **Policies**      | Optional restart backoff.                                 | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Errors**        | Typed errors per layer.                                   | [`SupervisorError`], [`RpcError`]           |
//! | **Configuration** | Centralized runtime settings.                             | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (events as `tracing` records).
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use procvisor::{Config, ProcessSpec, Supervisor, TransportKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config {
//!         transport: TransportKind::UnixSocket { dir: "/tmp/procvisor".into() },
//!         ..Config::default()
//!     };
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = vec![Arc::new(procvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = Vec::new();
//!
//!     let sup = Supervisor::builder(cfg).with_subscribers(subs).build().await?;
//!     sup.register([ProcessSpec::new("calc", "add1", "./target/debug/calc-worker")]).await?;
//!
//!     for err in sup.start_all().await {
//!         eprintln!("start failed: {err}");
//!     }
//!
//!     let mut metrics = sup.take_metrics().expect("first take");
//!     let sum: i64 = sup.call("calc:add1:Add", (2, 3)).await?;
//!     assert_eq!(sum, 5);
//!     let m = metrics.recv().await.expect("one metric per call");
//!     println!("{} took {:?}", m.urn, m.call_duration);
//!
//!     sup.shutdown().await;
//!     Ok(())
//! }
//! ```

mod bootstrap;
mod core;
mod error;
mod events;
mod policies;
mod process;
mod rpc;
mod subscribers;
mod transport;
mod worker;

// ---- Public re-exports ----

pub use bootstrap::Bootstrap;
pub use core::{
    BootstrapMode, Config, FailureKind, MetricsEvent, OutputBuffers, OverflowPolicy,
    ProcessFailure, Stream, Supervisor, SupervisorBuilder, TransportKind, Urn,
};
pub use error::{ProcedureError, RpcError, SupervisorError, TransportError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use process::{ProcessSpec, ProcessSpecBuilder, ProcessStatus};
pub use rpc::{Procedure, ProcedureFn, ProcedureRef, Procedures, Request, Response, RpcClient, RpcServer};
pub use subscribers::{Subscribe, SubscriberSet};
pub use transport::{Address, Connection, Duplex, Listener, LoopbackTransport, Transport, UnixSocketTransport};
pub use worker::WorkerRuntime;

// Optional: expose a simple built-in logger subscriber.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
