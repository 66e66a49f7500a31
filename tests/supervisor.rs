//! End-to-end tests driving the `calc-worker` binary.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use procvisor::{
    Address, BootstrapMode, Config, EventKind, FailureKind, ProcedureError, ProcedureFn,
    ProcessSpec, Stream, Supervisor, SupervisorError, TransportKind,
};

const WORKER: &str = env!("CARGO_BIN_EXE_calc-worker");

fn config(dir: &Path) -> Config {
    Config {
        transport: TransportKind::UnixSocket {
            dir: dir.to_path_buf(),
        },
        start_poll_interval: Duration::from_millis(50),
        start_attempts: 100,
        liveness_interval: Duration::from_millis(50),
        drain_interval: Duration::from_millis(20),
        stop_grace: Duration::from_secs(2),
        ..Config::default()
    }
}

async fn supervisor(cfg: Config) -> Arc<Supervisor> {
    Supervisor::builder(cfg).build().await.unwrap()
}

fn calc(name: &str) -> ProcessSpec {
    ProcessSpec::builder("calc", name, WORKER)
        .with_env("RUST_LOG", "info")
        .build()
}

async fn address_of(sup: &Supervisor, category: &str, name: &str) -> Address {
    sup.list()
        .await
        .into_iter()
        .find(|s| s.category == category && s.name == name)
        .map(|s| s.address)
        .unwrap()
}

/// Polls `f` every 50ms until it returns `Some` or `limit` elapses.
async fn eventually<T, F, Fut>(limit: Duration, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if let Some(v) = f().await {
            return Some(v);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

#[tokio::test(flavor = "multi_thread")]
async fn add_scenario_emits_metrics_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    let mut metrics = sup.take_metrics().unwrap();

    sup.register([calc("add1")]).await.unwrap();
    sup.start("calc", "add1").await.unwrap();

    let sum: i64 = sup.call("calc:add1:Add", (2, 3)).await.unwrap();
    assert_eq!(sum, 5);

    let m = metrics.recv().await.unwrap();
    assert_eq!(m.urn, "calc:add1:Add");
    assert!(!m.error);
    assert!(metrics.try_recv().is_err());

    sup.stop("calc", "add1").await.unwrap();
    let err = sup.call::<_, i64>("calc:add1:Add", (2, 3)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ServiceNotFound { .. }), "{err}");
    assert!(metrics.recv().await.unwrap().error);

    assert!(sup.shutdown().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_errors_are_wrapped() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    sup.register([calc("div")]).await.unwrap();
    sup.start("calc", "div").await.unwrap();

    let q: i64 = sup.call("calc:div:Div", (9, 3)).await.unwrap();
    assert_eq!(q, 3);

    let err = sup.call::<_, i64>("calc:div:Div", (1, 0)).await.unwrap_err();
    assert_eq!(err.as_label(), "remote_call");
    assert!(err.to_string().contains("division by zero"), "{err}");

    // Wrong result type is a decode failure, still a remote call error.
    let err = sup.call::<_, bool>("calc:div:Echo", "text").await.unwrap_err();
    assert_eq!(err.as_label(), "remote_call");

    let echoed: String = sup.call("calc:div:Echo", "text").await.unwrap();
    assert_eq!(echoed, "text");

    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn starting_a_running_process_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    sup.register([calc("add1")]).await.unwrap();
    sup.start("calc", "add1").await.unwrap();
    let before: u32 = sup.call("calc:add1:Pid", ()).await.unwrap();

    let err = sup.start("calc", "add1").await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));

    let after: u32 = sup.call("calc:add1:Pid", ()).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(sup.list().await[0].restarts, 0);

    let sum: i64 = sup.call("calc:add1:Add", (40, 2)).await.unwrap();
    assert_eq!(sum, 42);

    let err = sup.start("calc", "nope").await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound { .. }));

    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_removes_the_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    sup.register([calc("add1")]).await.unwrap();
    sup.start("calc", "add1").await.unwrap();

    let address = address_of(&sup, "calc", "add1").await;
    assert!(matches!(&address, Address::Unix(p) if p.starts_with(dir.path())));
    assert!(address.artifact_exists());

    sup.stop("calc", "add1").await.unwrap();
    assert!(!address.artifact_exists());

    let status = sup.list().await;
    assert!(!status[0].running);
    assert_eq!(status[0].pid, None);

    // The same handle can be started again.
    sup.start("calc", "add1").await.unwrap();
    let sum: i64 = sup.call("calc:add1:Add", (1, 1)).await.unwrap();
    assert_eq!(sum, 2);
    sup.shutdown().await;
    assert!(!address.artifact_exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn killed_worker_is_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    let mut failures = sup.take_failures().unwrap();
    let mut events = sup.events();

    sup.register([calc("add1")]).await.unwrap();
    sup.start("calc", "add1").await.unwrap();
    let first: u32 = sup.call("calc:add1:Pid", ()).await.unwrap();

    kill(Pid::from_raw(first as i32), Signal::SIGKILL).unwrap();
    let err = sup.call::<_, u32>("calc:add1:Pid", ()).await.unwrap_err();
    assert!(
        matches!(err.as_label(), "remote_call" | "service_not_found"),
        "{err}"
    );

    let s: &Supervisor = &sup;
    let second = eventually(Duration::from_secs(10), || async move {
        match s.call::<_, u32>("calc:add1:Pid", ()).await {
            Ok(pid) if pid != first => Some(pid),
            _ => None,
        }
    })
    .await
    .expect("worker was not restarted");
    assert_ne!(first, second);

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.kind, FailureKind::Exited);
    assert_eq!((failure.category.as_str(), failure.name.as_str()), ("calc", "add1"));

    let mut seen = Vec::new();
    while let Ok(ev) = events.try_recv() {
        seen.push(ev.kind);
    }
    assert!(seen.contains(&EventKind::ProcessExited));
    assert!(seen.contains(&EventKind::RestartScheduled));

    let status = sup.list().await;
    assert!(status[0].running);
    assert_eq!(status[0].restarts, 1);
    assert_eq!(status[0].pid, Some(second));

    assert!(sup.shutdown().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_with_backoff_is_restarted_but_stop_wins() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.restart_backoff = Some(procvisor::BackoffPolicy::constant(Duration::from_millis(300)));
    let sup = supervisor(cfg).await;
    sup.register([calc("c1")]).await.unwrap();
    sup.start("calc", "c1").await.unwrap();

    let s: &Supervisor = &sup;
    let code: i32 = s.call("calc:c1:Crash", 7).await.unwrap();
    assert_eq!(code, 7);

    let restarted = eventually(Duration::from_secs(10), || async move {
        let st = s.list().await;
        (st[0].running && st[0].restarts == 1).then_some(())
    })
    .await;
    assert!(restarted.is_some(), "worker was not restarted");
    let sum: i64 = s.call("calc:c1:Add", (1, 2)).await.unwrap();
    assert_eq!(sum, 3);

    // Crash again and stop during the backoff: no restart may follow.
    let _: i32 = s.call("calc:c1:Crash", 1).await.unwrap();
    eventually(Duration::from_secs(5), || async move {
        let st = s.list().await;
        (!st[0].running).then_some(())
    })
    .await
    .expect("crash not observed");
    s.stop("calc", "c1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(!sup.list().await[0].running);
    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_service_and_bad_urn_emit_one_error_metric() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    let mut metrics = sup.take_metrics().unwrap();

    let err = sup.call::<_, ()>("t:missing:f", ()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ServiceNotFound { .. }));
    let m = metrics.recv().await.unwrap();
    assert!(m.error);
    assert_eq!(m.urn, "t:missing:f");
    assert!(metrics.try_recv().is_err());

    for bad in ["badformat", "a:b", "a:b:c:d"] {
        let err = sup.call::<_, ()>(bad, ()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidUrn { .. }));
        assert!(metrics.recv().await.unwrap().error);
    }
    assert!(metrics.try_recv().is_err());

    // Registered but never started.
    sup.register([calc("idle")]).await.unwrap();
    let err = sup.call::<_, i64>("calc:idle:Add", (1, 2)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ServiceNotFound { .. }));

    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn start_all_and_stop_all_aggregate_failures() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    sup.register([
        calc("add1"),
        calc("add2"),
        ProcessSpec::new("calc", "ghost", dir.path().join("no-such-binary")),
    ])
    .await
    .unwrap();

    let errors = sup.start_all().await;
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].as_label(), "spawn_failed");

    for name in ["add1", "add2"] {
        let sum: i64 = sup.call(&format!("calc:{name}:Add"), (2, 2)).await.unwrap();
        assert_eq!(sum, 4);
    }

    assert!(sup.stop_all().await.is_empty());
    assert!(sup.list().await.iter().all(|s| !s.running));
    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn registered_addresses_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    sup.register((0..8).map(|i| calc(&format!("w{i}")))).await.unwrap();

    let addresses: HashSet<Address> = sup.list().await.into_iter().map(|s| s.address).collect();
    assert_eq!(addresses.len(), 8);
    assert!(!addresses.contains(sup.address().unwrap()));

    // A fixed address already leased to another handle is refused.
    let taken = address_of(&sup, "calc", "w0").await;
    let err = sup
        .register([ProcessSpec::builder("calc", "dup", WORKER).with_address(taken).build()])
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "validation");
    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn loopback_transport_renews_port_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        transport: TransportKind::Loopback,
        ..config(dir.path())
    };
    let sup = supervisor(cfg).await;
    assert!(matches!(sup.address(), Some(Address::Tcp(_))));

    sup.register([calc("add1")]).await.unwrap();
    sup.start("calc", "add1").await.unwrap();
    let before = address_of(&sup, "calc", "add1").await;
    assert!(matches!(&before, Address::Tcp(sa) if sa.ip().is_loopback()));

    let sum: i64 = sup.call("calc:add1:Add", (20, 22)).await.unwrap();
    assert_eq!(sum, 42);

    sup.restart("calc", "add1").await.unwrap();
    let after = address_of(&sup, "calc", "add1").await;
    assert_ne!(before, after);
    let sum: i64 = sup.call("calc:add1:Add", (1, 2)).await.unwrap();
    assert_eq!(sum, 3);

    assert!(sup.shutdown().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_flags_carry_config_env_and_token() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        bootstrap: BootstrapMode::Args,
        ..config(dir.path())
    };
    let sup = supervisor(cfg).await;
    let spec = ProcessSpec::builder("calc", "cfg", WORKER)
        .with_config(b"hello config".to_vec())
        .with_env("PROCVISOR_TEST_VALUE", "42")
        .with_trust_token("s3cret")
        .build();
    sup.register([spec]).await.unwrap();
    sup.start("calc", "cfg").await.unwrap();

    let config: String = sup.call("calc:cfg:Config", ()).await.unwrap();
    assert_eq!(config, "hello config");

    let value: Option<String> = sup.call("calc:cfg:Env", "PROCVISOR_TEST_VALUE").await.unwrap();
    assert_eq!(value.as_deref(), Some("42"));

    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stdin_bootstrap_and_reverse_calls() {
    let dir = tempfile::tempdir().unwrap();
    let sup = Supervisor::builder(config(dir.path()))
        .with_procedure(
            "Greeting",
            ProcedureFn::arc(|(): ()| async move { Ok::<_, ProcedureError>("hello from supervisor") }),
        )
        .unwrap()
        .build()
        .await
        .unwrap();

    let spec = ProcessSpec::builder("calc", "rev", WORKER)
        .with_config(b"via stdin".to_vec())
        .with_trust_token("tok")
        .build();
    sup.register([spec]).await.unwrap();
    sup.start("calc", "rev").await.unwrap();

    let config: String = sup.call("calc:rev:Config", ()).await.unwrap();
    assert_eq!(config, "via stdin");

    let greeting: String = sup.call("calc:rev:AskSupervisor", "Greeting").await.unwrap();
    assert_eq!(greeting, "hello from supervisor");

    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_output_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    sup.register([calc("log")]).await.unwrap();
    sup.start("calc", "log").await.unwrap();

    let logged: bool = sup.call("calc:log:Log", "marker-7f3a").await.unwrap();
    assert!(logged);

    let out = sup.output();
    let found = eventually(Duration::from_secs(3), || {
        let out = out.clone();
        async move {
            let text = out.snapshot_string(Stream::Stdout);
            text.contains("marker-7f3a").then_some(text)
        }
    })
    .await
    .expect("stdout not captured");
    assert!(found.contains("calc-worker listening on"));

    let stderr = eventually(Duration::from_secs(3), || {
        let out = out.clone();
        async move {
            let text = out.snapshot_string(Stream::Stderr);
            text.contains("worker listening").then_some(text)
        }
    })
    .await;
    assert!(stderr.is_some(), "stderr not captured");

    sup.shutdown().await;
    let drained = out.drain(Stream::Stdout);
    assert!(!drained.is_empty());
    assert!(out.snapshot(Stream::Stdout).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_failures_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.start_attempts = 5;
    let sup = supervisor(cfg).await;

    sup.register([
        ProcessSpec::builder("sh", "exits", "/bin/sh")
            .with_arg("-c")
            .with_arg("exit 3")
            .build(),
        ProcessSpec::builder("sh", "silent", "/bin/sh")
            .with_arg("-c")
            .with_arg("sleep 30")
            .build(),
    ])
    .await
    .unwrap();

    let err = sup.start("sh", "exits").await.unwrap_err();
    assert!(matches!(err, SupervisorError::ExitedEarly { .. }), "{err}");

    let err = sup.start("sh", "silent").await.unwrap_err();
    match err {
        SupervisorError::StartTimeout { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("unexpected {other}"),
    }
    assert!(sup.list().await.iter().all(|s| !s.running));
    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn spec_environment_replaces_inherited_one() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    sup.register([
        ProcessSpec::builder("calc", "own", WORKER).with_env("ONLY", "1").build(),
        ProcessSpec::new("calc", "inherits", WORKER),
    ])
    .await
    .unwrap();
    sup.start("calc", "own").await.unwrap();
    sup.start("calc", "inherits").await.unwrap();

    let only: Option<String> = sup.call("calc:own:Env", "ONLY").await.unwrap();
    assert_eq!(only.as_deref(), Some("1"));
    let path: Option<String> = sup.call("calc:own:Env", "PATH").await.unwrap();
    assert_eq!(path, None);

    let path: Option<String> = sup.call("calc:inherits:Env", "PATH").await.unwrap();
    assert_eq!(path, std::env::var("PATH").ok());
    let only: Option<String> = sup.call("calc:inherits:Env", "ONLY").await.unwrap();
    assert_eq!(only, None);

    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_reregistration_keeps_the_old_lease() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;
    let x = Address::Unix(dir.path().join("x.sock"));
    let y = Address::Unix(dir.path().join("y.sock"));
    let fixed = |name: &str, at: &Address| {
        ProcessSpec::builder("calc", name, WORKER).with_address(at.clone()).build()
    };

    sup.register([fixed("a", &x), fixed("b", &y)]).await.unwrap();

    let err = sup.register([fixed("a", &y)]).await.unwrap_err();
    assert_eq!(err.as_label(), "validation");
    assert_eq!(address_of(&sup, "calc", "a").await, x);

    // x still belongs to calc:a.
    let err = sup.register([fixed("c", &x)]).await.unwrap_err();
    assert_eq!(err.as_label(), "validation");

    // Re-registering under the address it already owns is fine.
    sup.register([fixed("a", &x)]).await.unwrap();
    assert_eq!(address_of(&sup, "calc", "a").await, x);
    let err = sup.register([fixed("c", &x)]).await.unwrap_err();
    assert_eq!(err.as_label(), "validation");

    // Moving to a fresh address frees the old one.
    let z = Address::Unix(dir.path().join("z.sock"));
    sup.register([fixed("a", &z)]).await.unwrap();
    sup.register([fixed("c", &x)]).await.unwrap();

    sup.start("calc", "a").await.unwrap();
    sup.start("calc", "c").await.unwrap();
    let sum: i64 = sup.call("calc:a:Add", (1, 1)).await.unwrap();
    assert_eq!(sum, 2);
    let sum: i64 = sup.call("calc:c:Add", (2, 2)).await.unwrap();
    assert_eq!(sum, 4);

    sup.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_rules() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(config(dir.path())).await;

    let err = sup
        .register([calc("ok"), ProcessSpec::new("calc", "", WORKER)])
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "validation");
    assert!(sup.list().await.is_empty(), "nothing stored when a spec is invalid");

    sup.register([calc("add1")]).await.unwrap();
    sup.start("calc", "add1").await.unwrap();

    let err = sup.register([calc("add1")]).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));
    let err = sup.unregister("calc", "add1").await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));

    sup.stop("calc", "add1").await.unwrap();
    let old = address_of(&sup, "calc", "add1").await;
    sup.register([calc("add1")]).await.unwrap();
    assert_eq!(sup.list().await.len(), 1);
    assert_ne!(address_of(&sup, "calc", "add1").await, old);

    sup.unregister("calc", "add1").await.unwrap();
    assert!(sup.list().await.is_empty());
    let err = sup.start("calc", "add1").await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound { .. }));
    let err = sup.unregister("calc", "add1").await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound { .. }));

    sup.shutdown().await;
}
