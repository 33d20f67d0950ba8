//! Integration tests for the archivist-rpc server binary.
//!
//! Each test writes a configuration file into a temporary directory, starts
//! the real binary on an auto-assigned port and talks to it over HTTP.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

/// Create a temporary tree with one active model and a config file.
fn create_test_env() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let checkpoints = temp_dir.path().join("models/checkpoints");
    std::fs::create_dir_all(&checkpoints).unwrap();
    std::fs::write(checkpoints.join("a.safetensors"), b"model a weights").unwrap();
    std::fs::create_dir_all(temp_dir.path().join("archive")).unwrap();

    std::fs::write(
        temp_dir.path().join("config.toml"),
        r#"
active_root = "models"
archive_root = "archive"
database_path = "data/catalog.db"

[category_labels]
checkpoints = "Checkpoints"
"#,
    )
    .unwrap();

    temp_dir
}

/// Make an RPC call to the server.
async fn rpc_call(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let json = rpc_call_raw(port, method, params).await?;
    if let Some(error) = json.get("error") {
        return Err(error.to_string());
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/rpc", port))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

/// GET a path and return the status code and JSON body.
async fn http_get(port: u16, path: &str) -> Result<(u16, Value), String> {
    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}{}", port, path))
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.map_err(|e| e.to_string())?;
    Ok((status, body))
}

/// Check health endpoint.
async fn check_health(port: u16) -> bool {
    match http_get(port, "/health").await {
        Ok((_, json)) => json.get("status").and_then(|v| v.as_str()) == Some("ok"),
        Err(_) => false,
    }
}

/// Wait for server to be ready.
async fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

struct RpcServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

fn server_binary() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_archivist-rpc") {
        return Ok(PathBuf::from(path));
    }
    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("archivist-rpc");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_archivist-rpc not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

/// Start the server binary and wait until `/health` is ready.
async fn start_rpc_server(config: &Path) -> Result<RpcServerHandle, String> {
    let binary = server_binary()?;

    let mut child = tokio::process::Command::new(&binary)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--config")
        .arg(config)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn archivist-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("ARCHIVIST_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid ARCHIVIST_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read archivist-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port = discovered_port
        .ok_or_else(|| "ARCHIVIST_PORT line not emitted by archivist-rpc".to_string())?;
    if !wait_for_server(port, 15).await {
        return Err(format!("archivist-rpc failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RpcServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_rest_scan_and_read() {
    let temp = create_test_env();
    let server = start_rpc_server(&temp.path().join("config.toml"))
        .await
        .expect("server should start");
    let port = server.port;

    let (status, models) = http_get(port, "/models").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(models, json!([]));

    let report = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/scan", port))
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(report["observed"], 1);
    assert_eq!(report["inserted"], 1);
    assert!(report["scan_id"].as_str().is_some());

    let (_, models) = http_get(port, "/models?tags=true&components=true")
        .await
        .unwrap();
    let models = models.as_array().unwrap();
    assert_eq!(models.len(), 1);
    let model = &models[0];
    assert_eq!(model["name"], "a");
    assert_eq!(model["category"], "Checkpoints");
    assert_eq!(model["status"], "ACTIVE");
    assert_eq!(model["archived"], false);
    assert_eq!(model["components"].as_array().unwrap().len(), 2);

    let hash = model["content_hash"].as_str().unwrap().to_string();
    assert_eq!(hash.len(), 64);

    let (status, entry) = http_get(port, &format!("/models/{}", hash.to_uppercase()))
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(entry["content_hash"], hash.as_str());

    let (status, _) = http_get(port, &format!("/models/{}", "0".repeat(64)))
        .await
        .unwrap();
    assert_eq!(status, 404);

    // The sidecar written by the scan sits next to the model
    assert!(temp
        .path()
        .join("models/checkpoints/a.metadata.json")
        .exists());

    server.stop().await;
}

#[tokio::test]
async fn test_rpc_methods() {
    let temp = create_test_env();
    let server = start_rpc_server(&temp.path().join("config.toml"))
        .await
        .expect("server should start");
    let port = server.port;

    let health = rpc_call(port, "health_check", json!({})).await.unwrap();
    assert_eq!(health["status"], "ok");

    // Listing with rescan runs a pass first
    let models = rpc_call(port, "list_models", json!({"rescan": true, "includeTags": true}))
        .await
        .unwrap();
    let models = models.as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["tags"], json!([]));
    assert!(models[0].get("components").is_none());

    // A second pass over an unchanged tree changes nothing
    let report = rpc_call(port, "reconcile_all", json!({})).await.unwrap();
    assert_eq!(report["inserted"], 0);
    assert_eq!(report["updated"], 0);
    assert_eq!(report["unchanged"], 1);

    let hash = models[0]["content_hash"].as_str().unwrap();
    let entry = rpc_call(port, "get_model", json!({"hash": hash})).await.unwrap();
    assert_eq!(entry["name"], "a");
    let missing = rpc_call(port, "get_model", json!({"hash": "ffff"})).await.unwrap();
    assert_eq!(missing, Value::Null);

    let model_id = models[0]["id"].as_str().unwrap();
    let cleared = rpc_call(port, "clear_errors", json!({"model_id": model_id}))
        .await
        .unwrap();
    assert_eq!(cleared["success"], true);

    let response = rpc_call_raw(port, "clear_errors", json!({"model_id": 424242}))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32004);

    let response = rpc_call_raw(port, "clear_errors", json!({})).await.unwrap();
    assert_eq!(response["error"]["code"], -32602);

    let response = rpc_call_raw(port, "delete_everything", json!({}))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32601);

    server.stop().await;
}

#[tokio::test]
async fn test_missing_config_fails_to_start() {
    let temp = TempDir::new().unwrap();
    let result = start_rpc_server(&temp.path().join("absent.toml")).await;
    assert!(result.is_err());
}
