//! # Request/response RPC over a transport connection.
//!
//! Messages are newline-delimited JSON ([`wire`]). One connection carries any
//! number of concurrent calls; replies are matched to calls by `id`.
//!
//! ```text
//! RpcClient::call ──► {"id":7,"method":"Add","params":[2,3]} ──► RpcServer
//!        ▲                                                         │
//!        └──────────── {"id":7,"result":5} ◄── Procedures["Add"] ◄─┘
//! ```
//!
//! - [`RpcClient`]: multiplexing client, cheap to clone.
//! - [`RpcServer`]: accept loop, one task per connection and per request.
//! - [`Procedures`]: name → [`Procedure`] table; `ping` is always present.

mod client;
mod procedure;
mod server;
pub(crate) mod wire;

pub use client::RpcClient;
pub use procedure::{Procedure, ProcedureFn, ProcedureRef, Procedures, PING};
pub use server::RpcServer;
pub use wire::{Request, Response};
