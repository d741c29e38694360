//! End-to-end tests — a listening host driven over real HTTP, and the
//! bootstrap binary driven as a child process.

use std::sync::Arc;
use std::time::Duration;

use devhost_protocol::ServiceError;
use devhost_server::{
    Host, HostConfig, PluginTable, ServiceContext, ServiceDescriptor, sync_handler,
};
use serde_json::{Value, json};
use tokio::time::timeout;

const ECHO_FILE: &str = "test_services/echo";
const ECHO_ASYNC_FILE: &str = "test_services/echo_async";

fn quiet() -> HostConfig {
    HostConfig {
        output_on_listen: false,
        port: 0,
        ..HostConfig::default()
    }
}

fn echo_plugins() -> PluginTable {
    PluginTable::new()
        .with(
            ECHO_FILE,
            sync_handler(|payload, _| Ok(payload["echo"].clone())),
        )
        .with(
            ECHO_ASYNC_FILE,
            Arc::new(|payload: Value, _ctx: ServiceContext| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, ServiceError>(payload["echo"].clone())
            }),
        )
}

/// Start a quiet host on an OS-assigned port.
async fn start_host(host: &Host) -> String {
    host.listen().await.unwrap();
    host.get_url().unwrap()
}

/// A client that never reuses connections, so refusals are observed directly.
fn fresh_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

async fn post(url: &str, service: &str, body: Value) -> reqwest::Response {
    fresh_client()
        .post(url)
        .header("X-Service", service)
        .json(&body)
        .send()
        .await
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Service lookup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_lookup_lists_available_services() {
    let host = Host::new(quiet());
    for name in ["service1", "service2"] {
        host.add_service(ServiceDescriptor::new(name, sync_handler(|p, _| Ok(p))))
            .unwrap();
    }
    let url = start_host(&host).await;

    let res = post(&url, "unknown", json!({})).await;
    assert_eq!(res.status(), 404);
    let body = res.text().await.unwrap();
    assert!(body.to_lowercase().contains("services available"));
    assert!(body.contains("service1"));
    assert!(body.contains("service2"));

    host.stop_listening().await;
}

#[tokio::test]
async fn request_without_header_lists_available_services() {
    let host = Host::new(quiet());
    host.add_service(ServiceDescriptor::new("service1", sync_handler(|p, _| Ok(p))))
        .unwrap();
    let url = start_host(&host).await;

    let res = fresh_client().post(&url).send().await.unwrap();
    assert_eq!(res.status(), 404);
    let body = res.text().await.unwrap();
    assert!(body.to_lowercase().contains("services available"));
    assert!(body.contains("service1"));
    assert!(body.contains("__hotload"));
    assert!(body.contains("__shutdown"));

    host.stop_listening().await;
}

#[tokio::test]
async fn handler_errors_map_to_status_codes() {
    let host = Host::new(quiet());
    host.add_service(ServiceDescriptor::new(
        "forbidden",
        sync_handler(|_, _| Err(ServiceError::with_status(403, "not allowed"))),
    ))
    .unwrap();
    host.add_service(ServiceDescriptor::new(
        "broken",
        sync_handler(|_, _| Err(ServiceError::handler_failed("it broke"))),
    ))
    .unwrap();
    let url = start_host(&host).await;

    let res = post(&url, "forbidden", json!({})).await;
    assert_eq!(res.status(), 403);
    assert_eq!(res.text().await.unwrap(), "not allowed");

    let res = post(&url, "broken", json!({})).await;
    assert_eq!(res.status(), 500);
    assert_eq!(res.text().await.unwrap(), "it broke");

    host.stop_listening().await;
}

#[tokio::test]
async fn structured_results_are_json() {
    let host = Host::new(quiet());
    host.add_service(ServiceDescriptor::new(
        "info",
        sync_handler(|payload, _| Ok(json!({"got": payload}))),
    ))
    .unwrap();
    let url = start_host(&host).await;

    let res = post(&url, "info", json!({"x": 1})).await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"got": {"x": 1}}));

    host.stop_listening().await;
}

#[tokio::test]
async fn panicking_handler_gets_500_over_http() {
    let host = Host::new(quiet());
    host.add_service(ServiceDescriptor::new(
        "bad",
        sync_handler(|_, _| panic!("handler bug")),
    ))
    .unwrap();
    let url = start_host(&host).await;

    let res = post(&url, "bad", json!({})).await;
    assert_eq!(res.status(), 500);

    // The host keeps serving afterwards.
    let res = post(&url, "missing", json!({})).await;
    assert_eq!(res.status(), 404);

    host.stop_listening().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Hot-load over the network
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hotload_over_network() {
    let host = Host::with_loader(quiet(), Arc::new(echo_plugins()));
    let url = start_host(&host).await;

    let res = post(
        &url,
        "__hotload",
        json!({
            "services": [
                {"name": "echo", "file": ECHO_FILE},
                {"name": "echo-async", "file": ECHO_ASYNC_FILE}
            ]
        }),
    )
    .await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Success");

    let res = post(&url, "echo", json!({"echo": "test1"})).await;
    assert_eq!(res.text().await.unwrap(), "test1");

    let res = post(&url, "echo-async", json!({"echo": "test2"})).await;
    assert_eq!(res.text().await.unwrap(), "test2");

    host.stop_listening().await;
}

#[tokio::test]
async fn hotload_failure_is_reported_over_network() {
    let host = Host::with_loader(quiet(), Arc::new(echo_plugins()));
    let url = start_host(&host).await;

    let res = post(
        &url,
        "__hotload",
        json!({
            "services": [
                {"name": "echo", "file": ECHO_FILE},
                {"name": "nothing", "file": "no/such/module"}
            ]
        }),
    )
    .await;
    assert!(!res.status().is_success());
    assert!(res.text().await.unwrap().contains("no/such/module"));

    let res = post(&url, "echo", json!({"echo": "still here"})).await;
    assert_eq!(res.text().await.unwrap(), "still here");

    host.stop_listening().await;
}

#[cfg(unix)]
#[tokio::test]
async fn hotload_executable_modules() {
    use devhost_server::CommandLoader;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let write_script = |name: &str, body: &str| {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    };
    write_script("mirror.sh", "cat");
    write_script("greet.sh", "cat > /dev/null\nprintf hello");

    let host = Host::with_loader(quiet(), Arc::new(CommandLoader::new(dir.path())));
    let url = start_host(&host).await;

    let res = post(
        &url,
        "__hotload",
        json!({
            "services": [
                {"name": "mirror", "file": "mirror.sh"},
                {"name": "greet", "file": dir.path().join("greet.sh").to_str().unwrap()}
            ]
        }),
    )
    .await;
    assert_eq!(res.text().await.unwrap(), "Success");

    let res = post(&url, "mirror", json!({"echo": "test1"})).await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"echo": "test1"}));

    let res = post(&url, "greet", json!({})).await;
    assert_eq!(res.text().await.unwrap(), "hello");

    host.stop_listening().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_replies_then_refuses_connections() {
    let host = Host::new(quiet());
    let url = start_host(&host).await;

    let res = fresh_client()
        .post(&url)
        .header("X-Service", "__shutdown")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Shutting down...");

    timeout(Duration::from_secs(5), host.closed())
        .await
        .expect("listener should close after __shutdown");
    assert!(host.get_url().is_none());

    let err = fresh_client()
        .post(&url)
        .header("X-Service", "__shutdown")
        .send()
        .await
        .unwrap_err();
    assert!(err.is_connect(), "expected connection refusal, got {err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_right_after_shutdown_reply_is_refused() {
    for round in 0..30 {
        let host = Host::new(quiet());
        let url = start_host(&host).await;

        let res = post(&url, "__shutdown", json!({})).await;
        assert_eq!(res.text().await.unwrap(), "Shutting down...");

        // No waiting on the host: the follow-up goes out as soon as the reply is read.
        let err = fresh_client()
            .post(&url)
            .header("X-Service", "__shutdown")
            .send()
            .await
            .unwrap_err();
        assert!(err.is_connect(), "round {round}: expected refusal, got {err}");

        timeout(Duration::from_secs(5), host.closed()).await.unwrap();
    }
}

#[tokio::test]
async fn shutdown_reply_closes_keep_alive_connection() {
    let host = Host::new(quiet());
    host.add_service(ServiceDescriptor::new("ping", sync_handler(|_, _| Ok(json!("pong")))))
        .unwrap();
    let url = start_host(&host).await;

    // One pooled client for both requests.
    let client = reqwest::Client::new();
    let res = client.post(&url).header("X-Service", "ping").send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "pong");

    let res = client
        .post(&url)
        .header("X-Service", "__shutdown")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["connection"], "close");
    assert_eq!(res.text().await.unwrap(), "Shutting down...");

    let err = client
        .post(&url)
        .header("X-Service", "ping")
        .send()
        .await
        .unwrap_err();
    assert!(err.is_connect(), "expected connection refusal, got {err}");
}

#[tokio::test]
async fn listen_during_drain_keeps_new_listener() {
    let host = Host::new(quiet());
    host.add_service(ServiceDescriptor::from_fn(
        "slow",
        |_: Value, _ctx: ServiceContext| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, ServiceError>(json!("done"))
        },
    ))
    .unwrap();
    let old_url = start_host(&host).await;

    let in_flight = tokio::spawn({
        let url = old_url.clone();
        async move { post(&url, "slow", json!({})).await.text().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopping = tokio::spawn({
        let host = host.clone();
        async move { host.stop_listening().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let new_addr = host.listen().await.unwrap();
    stopping.await.unwrap();
    assert_eq!(in_flight.await.unwrap(), "done");

    let new_url = format!("http://127.0.0.1:{}/", new_addr.port());
    assert!(host.is_listening());
    assert_eq!(host.local_addr(), Some(new_addr));
    assert_eq!(host.get_url().as_deref(), Some(new_url.as_str()));

    let res = post(&new_url, "__shutdown", json!({})).await;
    assert_eq!(res.status(), 200);
    timeout(Duration::from_secs(5), host.closed()).await.unwrap();
}

#[tokio::test]
async fn registry_survives_shutdown() {
    let host = Host::new(quiet());
    host.add_service(ServiceDescriptor::new("kept", sync_handler(|_, _| Ok(json!("yes")))))
        .unwrap();
    let url = start_host(&host).await;

    post(&url, "__shutdown", json!({})).await;
    timeout(Duration::from_secs(5), host.closed()).await.unwrap();

    assert_eq!(host.call_service("kept", json!({})).await.unwrap(), json!("yes"));

    // And it can be served again.
    let url = start_host(&host).await;
    let res = post(&url, "kept", json!({})).await;
    assert_eq!(res.text().await.unwrap(), "yes");
    host.stop_listening().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Bootstrap binary
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn binary_announces_listener_and_exits_on_shutdown() {
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_dev-service-host"))
        .args(["--port", "0"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();
    let line = timeout(Duration::from_secs(10), lines.next_line())
        .await
        .expect("readiness line")
        .unwrap()
        .unwrap();

    let port: u16 = line
        .strip_prefix("Server listening at 127.0.0.1:")
        .unwrap_or_else(|| panic!("unexpected readiness line: {line}"))
        .parse()
        .unwrap();
    let url = format!("http://127.0.0.1:{port}/");

    let res = fresh_client()
        .post(&url)
        .header("X-Service", "__shutdown")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Shutting down...");

    let status = timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("process should exit after __shutdown")
        .unwrap();
    assert!(status.success());

    let mut stderr = String::new();
    child
        .stderr
        .take()
        .unwrap()
        .read_to_string(&mut stderr)
        .await
        .unwrap();
    assert!(stderr.is_empty(), "unexpected stderr output: {stderr}");

    let err = fresh_client()
        .post(&url)
        .header("X-Service", "__shutdown")
        .send()
        .await
        .unwrap_err();
    assert!(err.is_connect(), "expected connection refusal, got {err}");
}
