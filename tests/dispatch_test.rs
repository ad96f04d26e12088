mod common;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

use common::{unused_port, FakeBridgeApi};
use wyze_bridge_plugin::bridge::BridgeState;
use wyze_bridge_plugin::bridge::runtime::ProcessRuntime;
use wyze_bridge_plugin::cloud::{CloudApi, Device};
use wyze_bridge_plugin::config::RuntimeSettings;
use wyze_bridge_plugin::dispatch::Dispatcher;
use wyze_bridge_plugin::error::CloudError;
use wyze_bridge_plugin::plugin::PluginController;

struct FakeCloud {
    logged_in: AtomicBool,
    devices: Vec<Device>,
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn login(&self) -> Result<(), CloudError> {
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, CloudError> {
        Ok(self.devices.clone())
    }

    async fn p2p_token(&self, mac: &str) -> Result<String, CloudError> {
        Ok(format!("p2p-{mac}"))
    }
}

fn device(mac: &str, nickname: &str, model: &str, online: bool) -> Device {
    Device {
        mac: mac.into(),
        nickname: nickname.into(),
        product_model: model.into(),
        online,
        ..Default::default()
    }
}

fn controller(dir: &TempDir) -> Arc<PluginController> {
    let devices = vec![
        device("AA11", "Front Door", "WYZEDB3", true),
        device("BB22", "Garage", "WYZE_CAKP2", false),
        device("CC33", "Desk Lamp", "WLPAL19", true),
    ];
    // exits at once, so the bridge never becomes ready
    controller_with(dir, devices, "exit 1", 1)
}

fn controller_with(
    dir: &TempDir,
    devices: Vec<Device>,
    script: &str,
    startup_timeout_secs: u64,
) -> Arc<PluginController> {
    let cloud: Arc<dyn CloudApi> = Arc::new(FakeCloud {
        logged_in: AtomicBool::new(false),
        devices,
    });

    let settings = RuntimeSettings {
        plugin_dir: dir.path().to_path_buf(),
        startup_timeout_secs,
        bridge_log_file: false,
        ..Default::default()
    };
    let runtime = ProcessRuntime::new("sh", vec!["-c".into(), script.into()]);

    Arc::new(PluginController::with_cloud_factory(
        settings,
        Arc::new(runtime),
        Box::new(move |_| Ok(cloud.clone())),
    ))
}

fn request(id: Value, method: &str, params: Value) -> String {
    let mut line = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
        .to_string();
    line.push('\n');
    line
}

async fn next_response<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_stdio_session() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(controller(&dir));

    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let serving = tokio::spawn(async move {
        dispatcher
            .serve(BufReader::new(server_read), server_write, std::future::pending())
            .await
    });

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut responses = BufReader::new(client_read).lines();

    let init = request(
        json!(1),
        "initialize",
        json!({
            "email": "user@example.com",
            "password": "secret",
            "cameras": [{"mac": "AA11", "name": "Porch"}, {"mac": "BB22"}, {"name": "no mac"}],
            "rtsp_port": 9554,
            "web_port": 9500,
            "data_path": dir.path().join("data"),
        }),
    );
    client_write.write_all(init.as_bytes()).await.unwrap();
    client_write.write_all(b"this is not json\n").await.unwrap();
    client_write
        .write_all(request(json!("list"), "list_cameras", Value::Null).as_bytes())
        .await
        .unwrap();
    client_write
        .write_all(request(json!(3), "discover_cameras", json!({})).as_bytes())
        .await
        .unwrap();
    client_write
        .write_all(
            request(json!(4), "get_snapshot", json!({"camera_id": "AA11"})).as_bytes(),
        )
        .await
        .unwrap();
    client_write
        .write_all(
            request(
                json!(5),
                "ptz_control",
                json!({"camera_id": "BB22", "command": {"action": "pan", "direction": 1.0}}),
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    client_write
        .write_all(request(json!(6), "remove_camera", json!({"camera_id": "BB22"})).as_bytes())
        .await
        .unwrap();
    client_write
        .write_all(request(json!(7), "get_camera", json!({"camera_id": "BB22"})).as_bytes())
        .await
        .unwrap();

    let r = next_response(&mut responses).await;
    assert_eq!(r["id"], 1);
    assert_eq!(r["result"], json!({"status": "ok"}));

    let r = next_response(&mut responses).await;
    assert_eq!(r["id"], "list");
    let cameras = r["result"].as_array().unwrap();
    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras[0]["name"], "Garage");
    assert_eq!(cameras[1]["name"], "Porch");
    assert_eq!(cameras[1]["main_stream"], "rtsp://localhost:9554/porch");
    assert_eq!(cameras[1]["snapshot_url"], "http://127.0.0.1:9500/img/porch.jpg");
    assert_eq!(cameras[1]["plugin_id"], "wyze");

    let r = next_response(&mut responses).await;
    assert_eq!(r["id"], 3);
    let discovered = r["result"].as_array().unwrap();
    assert_eq!(discovered.len(), 2);
    assert!(discovered.iter().all(|c| c["manufacturer"] == "Wyze"));

    let r = next_response(&mut responses).await;
    assert_eq!(r["id"], 4);
    assert_eq!(r["error"]["code"], -32603);

    let r = next_response(&mut responses).await;
    assert_eq!(r["id"], 5);
    assert_eq!(r["error"]["code"], -32603);
    assert_eq!(r["error"]["message"], "camera does not support PTZ");

    let r = next_response(&mut responses).await;
    assert_eq!(r["id"], 6);
    assert_eq!(r["result"], json!({"status": "ok"}));

    let r = next_response(&mut responses).await;
    assert_eq!(r["id"], 7);
    assert_eq!(r["error"]["message"], "Camera not found: BB22");

    // closing our side is EOF for the plugin
    client_write.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(15), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_health_reflects_failed_bridge() {
    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let health = controller.health().await;
    assert_eq!(serde_json::to_value(&health).unwrap()["state"], "unknown");
    assert_eq!(health.message.as_deref(), Some("No cameras configured"));

    let config = serde_json::from_value(json!({
        "email": "user@example.com",
        "password": "secret",
        "data_path": dir.path().join("data"),
    }))
    .unwrap();
    controller.initialize(config).await.unwrap();

    let bridge = controller.bridge().await.unwrap();
    for _ in 0..100 {
        if bridge.last_error().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let health = serde_json::to_value(controller.health().await).unwrap();
    assert_eq!(health["state"], "unhealthy");
    assert_eq!(health["details"]["cameras_total"], 2);
    assert_eq!(health["details"]["authenticated"], true);
    assert_eq!(health["details"]["bridge_running"], false);
    assert_eq!(health["details"]["bridge_state"], "stopped");
    assert!(health["message"]
        .as_str()
        .unwrap()
        .contains("exited unexpectedly"));

    controller.shutdown().await.unwrap();
    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_answers_while_bridge_starts() {
    let dir = TempDir::new().unwrap();
    let web_port = unused_port();
    let controller = controller_with(
        &dir,
        vec![
            device("AA11", "Front Door", "WYZEDB3", true),
            device("BB22", "Garage", "WYZE_CAKP2", true),
        ],
        "sleep 30",
        30,
    );
    let config = serde_json::from_value(json!({
        "email": "user@example.com",
        "password": "secret",
        "web_port": web_port,
        "data_path": dir.path().join("data"),
    }))
    .unwrap();

    // nothing listens on the web port yet, so readiness is still pending
    tokio::time::timeout(Duration::from_secs(2), controller.initialize(config))
        .await
        .expect("initialize waited for the bridge")
        .unwrap();

    // the start task runs in the background; wait for it to pick up the run
    let bridge = controller.bridge().await.unwrap();
    for _ in 0..50 {
        if bridge.state().await == BridgeState::Starting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let health = tokio::time::timeout(Duration::from_secs(1), controller.health())
        .await
        .expect("health blocked during the readiness wait");
    let health = serde_json::to_value(health).unwrap();
    assert_eq!(health["state"], "unhealthy");
    assert_eq!(health["details"]["bridge_state"], "starting");
    assert_eq!(health["details"]["bridge_running"], false);
    assert_eq!(health["details"]["cameras_total"], 2);

    let _api = FakeBridgeApi::start_on(web_port, 200, "{}").await;
    for _ in 0..100 {
        if bridge.state().await == BridgeState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(bridge.state().await, BridgeState::Running);

    let health = controller.health().await;
    assert_eq!(health.message.as_deref(), Some("2/2 cameras online"));
    let health = serde_json::to_value(health).unwrap();
    assert_eq!(health["state"], "healthy");
    assert_eq!(health["details"]["cameras_online"], 2);
    assert_eq!(health["details"]["cameras_total"], 2);
    assert_eq!(health["details"]["bridge_running"], true);
    assert_eq!(health["details"]["bridge_state"], "running");

    controller.shutdown().await.unwrap();
}
