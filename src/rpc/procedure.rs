//! # Procedures served over RPC.
//!
//! A [`Procedure`] takes positional JSON parameters and returns one JSON value.
//! [`ProcedureFn`] adapts a typed async closure: parameters are decoded into
//! the closure's argument type at call time and the result is encoded back.
//!
//! ## Example
//! ```rust
//! use procvisor::{ProcedureError, Procedures};
//!
//! let mut procs = Procedures::new();
//! procs
//!     .register_fn("Add", |(a, b): (i64, i64)| async move {
//!         Ok::<_, ProcedureError>(a + b)
//!     })
//!     .unwrap();
//!
//! assert!(procs.contains("Add"));
//! assert!(procs.contains("ping"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProcedureError;

/// Name of the health-check procedure.
pub const PING: &str = "ping";

/// A remotely callable function.
#[async_trait]
pub trait Procedure: Send + Sync + 'static {
    /// Runs the procedure on positional parameters.
    async fn call(&self, params: Vec<Value>) -> Result<Value, ProcedureError>;
}

/// Shared handle to a procedure.
pub type ProcedureRef = Arc<dyn Procedure>;

/// Typed closure procedure.
///
/// `A` is the argument type: a tuple for several positional parameters,
/// `()` for none, or a single type for exactly one parameter.
pub struct ProcedureFn<A, F> {
    f: F,
    _args: PhantomData<fn(A)>,
}

impl<A, F> ProcedureFn<A, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _args: PhantomData,
        }
    }

    pub fn arc<R, Fut>(f: F) -> ProcedureRef
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ProcedureError>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<A, R, F, Fut> Procedure for ProcedureFn<A, F>
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ProcedureError>> + Send + 'static,
{
    async fn call(&self, params: Vec<Value>) -> Result<Value, ProcedureError> {
        let args = decode_params::<A>(params)?;
        let out = (self.f)(args).await?;
        Ok(serde_json::to_value(out)?)
    }
}

/// Decodes positional parameters into `A`.
///
/// The list is tried as a sequence first (tuples, vectors). An empty list
/// also matches `()`; a single element also matches `A` itself.
pub(crate) fn decode_params<A: DeserializeOwned>(params: Vec<Value>) -> Result<A, ProcedureError> {
    let whole = Value::Array(params);
    let first_err = match serde_json::from_value::<A>(whole.clone()) {
        Ok(a) => return Ok(a),
        Err(e) => e,
    };
    let Value::Array(mut items) = whole else {
        return Err(ProcedureError::InvalidParams(first_err.to_string()));
    };
    let fallback = match items.len() {
        0 => Value::Null,
        1 => items.remove(0),
        _ => return Err(ProcedureError::InvalidParams(first_err.to_string())),
    };
    serde_json::from_value(fallback).map_err(|_| ProcedureError::InvalidParams(first_err.to_string()))
}

struct Ping;

#[async_trait]
impl Procedure for Ping {
    async fn call(&self, _params: Vec<Value>) -> Result<Value, ProcedureError> {
        Ok(Value::String("pong".into()))
    }
}

/// Name → procedure table. Always contains [`PING`].
#[derive(Clone)]
pub struct Procedures {
    table: HashMap<String, ProcedureRef>,
}

impl Default for Procedures {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Procedures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedures")
            .field("names", &self.names())
            .finish()
    }
}

impl Procedures {
    /// Creates a table holding only `ping`.
    pub fn new() -> Self {
        let mut table: HashMap<String, ProcedureRef> = HashMap::new();
        table.insert(PING.to_string(), Arc::new(Ping));
        Self { table }
    }

    /// Adds `procedure` under `name`; names are unique (including `ping`).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        procedure: ProcedureRef,
    ) -> Result<(), ProcedureError> {
        let name = name.into();
        if self.table.contains_key(&name) {
            return Err(ProcedureError::Duplicate(name));
        }
        self.table.insert(name, procedure);
        Ok(())
    }

    /// Adds a typed closure; see [`ProcedureFn`].
    pub fn register_fn<A, R, F, Fut>(
        &mut self,
        name: impl Into<String>,
        f: F,
    ) -> Result<(), ProcedureError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ProcedureError>> + Send + 'static,
    {
        self.register(name, ProcedureFn::<A, F>::arc(f))
    }

    pub fn get(&self, name: &str) -> Option<ProcedureRef> {
        self.table.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Sorted procedure names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}
