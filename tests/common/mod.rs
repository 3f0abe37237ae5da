//! Shared test infrastructure for integration tests
//!
//! Provides a TestServer that spawns the real depot binary against a
//! temporary data directory, plus small helpers for driving the JSON API
//! with reqwest.

#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// Port counter to avoid conflicts between tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19700);

/// Test server wrapper that spawns a real depot binary
pub struct TestServer {
    process: Child,
    port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Start a test server with default settings (tiny multipart chunks so
    /// tests can exercise the state machine with small payloads).
    pub async fn start() -> Self {
        Self::start_with_env(HashMap::new()).await
    }

    /// Start a test server with extra DEPOT_* environment overrides.
    pub async fn start_with_env(extra_env: HashMap<&'static str, String>) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let data_dir = TempDir::new().expect("Failed to create temp dir");

        let mut command = Command::new(env!("CARGO_BIN_EXE_depot"));
        command
            .env("DEPOT_LISTEN_ADDR", format!("127.0.0.1:{}", port))
            .env("DEPOT_DATA_DIR", data_dir.path())
            .env("DEPOT_MULTIPART_CHUNKSIZE_MIN", "1")
            .env("RUST_LOG", "depot=warn");
        for (key, value) in extra_env {
            command.env(key, value);
        }
        let process = command.spawn().expect("Failed to start server");

        let mut server = Self {
            process,
            port,
            _data_dir: data_dir,
        };
        server.wait_ready().await;
        server
    }

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                sleep(Duration::from_millis(100)).await;
                return;
            }

            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("Server exited before becoming ready: {}", status);
            }

            sleep(Duration::from_millis(100)).await;
        }

        let _ = self.process.kill();
        panic!("Timed out waiting for server on {}", addr);
    }

    /// Get the HTTP endpoint URL
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Path to the blob root inside the data directory.
    pub fn blob_root(&self) -> std::path::PathBuf {
        self._data_dir.path().join("blobs")
    }

    /// Create a bucket and return its id.
    pub async fn create_bucket(&self, client: &reqwest::Client) -> String {
        let response = client
            .post(format!("{}/files", self.endpoint()))
            .send()
            .await
            .expect("POST /files should succeed");
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    /// Upload a body to (bucket, key) and return the response JSON.
    pub async fn put_object(
        &self,
        client: &reqwest::Client,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> reqwest::Response {
        client
            .put(format!("{}/files/{}/{}", self.endpoint(), bucket, key))
            .body(body)
            .send()
            .await
            .expect("PUT should complete")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

// === Data generators ===

/// Generate deterministic binary data
pub fn generate_binary(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    data
}
