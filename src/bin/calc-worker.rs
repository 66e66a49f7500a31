//! Demo worker: arithmetic plus a few probes used by the integration tests.
//!
//! | Procedure      | Params          | Result                                  |
//! |----------------|-----------------|-----------------------------------------|
//! | `Add`          | `(i64, i64)`    | sum                                     |
//! | `Div`          | `(i64, i64)`    | quotient, error on division by zero     |
//! | `Echo`         | `String`        | same string                             |
//! | `Config`       | none            | config payload as UTF-8                 |
//! | `Env`          | `String`        | value of that variable, or `null`       |
//! | `Pid`          | none            | OS process id                           |
//! | `Log`          | `String`        | writes the line to stdout, returns `true` |
//! | `Crash`        | `i32`           | exits with that code shortly after replying |
//! | `AskSupervisor`| `String`        | calls that procedure on the supervisor  |

use std::time::Duration;

use procvisor::{ProcedureError, RpcClient, WorkerRuntime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut worker = WorkerRuntime::from_env().await?;
    let config = String::from_utf8_lossy(worker.config()).into_owned();

    let supervisor: Option<RpcClient> = match worker.connect_supervisor().await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "supervisor unreachable");
            None
        }
    };

    worker
        .register_fn("Add", |(a, b): (i64, i64)| async move { Ok(a + b) })?
        .register_fn("Div", |(a, b): (i64, i64)| async move {
            a.checked_div(b)
                .ok_or_else(|| ProcedureError::failed("division by zero"))
        })?
        .register_fn("Echo", |s: String| async move { Ok(s) })?
        .register_fn("Config", move |(): ()| {
            let config = config.clone();
            async move { Ok(config) }
        })?
        .register_fn("Env", |key: String| async move { Ok(std::env::var(key).ok()) })?
        .register_fn("Pid", |(): ()| async move { Ok(std::process::id()) })?
        .register_fn("Log", |line: String| async move {
            println!("{line}");
            Ok(true)
        })?
        .register_fn("Crash", |code: i32| async move {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::process::exit(code);
            });
            Ok(code)
        })?
        .register_fn("AskSupervisor", move |method: String| {
            let supervisor = supervisor.clone();
            async move {
                let client = supervisor.ok_or_else(|| ProcedureError::failed("no supervisor"))?;
                client
                    .call(&method, Vec::new())
                    .await
                    .map_err(|e| ProcedureError::failed(e.to_string()))
            }
        })?;

    println!("calc-worker listening on {}", worker.address());
    worker.run().await?;
    tracing::info!("calc-worker stopped");
    Ok(())
}
