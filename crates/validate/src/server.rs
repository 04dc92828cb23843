//! Local static server - serving the artifact tree for one round

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{ValidateError, ValidateResult};

/// How long a graceful stop may take before the server task is aborted
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running static file server
pub struct LocalServer {
    addr: SocketAddr,
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl LocalServer {
    /// Bind `127.0.0.1:port` and serve `root`. Port 0 picks a free port.
    pub async fn start(root: &Path, port: u16) -> ValidateResult<Self> {
        if !root.is_dir() {
            return Err(ValidateError::ResourceLifecycle(format!(
                "artifact root {} is not a directory",
                root.display()
            )));
        }

        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            ValidateError::ResourceLifecycle(format!("cannot bind 127.0.0.1:{}: {}", port, e))
        })?;
        let addr = listener.local_addr()?;
        let base_url = format!("http://{}", addr);

        let app = Router::new()
            .fallback_service(ServeDir::new(root))
            .layer(TraceLayer::new_for_http());

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        info!("Serving {} at {}", root.display(), base_url);

        Ok(Self {
            addr,
            base_url,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    /// Start the server and wait out the settle delay, then confirm it
    /// answers before any stage issues requests against it
    pub async fn start_settled(root: &Path, port: u16, settle: Duration) -> ValidateResult<Self> {
        let mut server = Self::start(root, port).await?;
        sleep(settle).await;

        if let Err(e) = server.probe().await {
            let _ = server.stop().await;
            return Err(e);
        }
        Ok(server)
    }

    /// One health request against the server root
    async fn probe(&self) -> ValidateResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        match client.get(&self.base_url).send().await {
            Ok(_) => Ok(()),
            Err(e) => Err(ValidateError::ResourceLifecycle(format!(
                "local server at {} not answering: {}",
                self.base_url, e
            ))),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the server, waiting for in-flight requests to finish
    pub async fn stop(&mut self) -> ValidateResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        info!("Stopping local server at {}", self.base_url);

        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        let abort = task.abort_handle();
        match timeout(STOP_TIMEOUT, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ValidateError::ResourceLifecycle(format!(
                "local server exited with error: {}",
                e
            ))),
            Ok(Err(e)) => Err(ValidateError::ResourceLifecycle(format!(
                "local server task failed: {}",
                e
            ))),
            Err(_) => {
                abort.abort();
                Err(ValidateError::ResourceLifecycle(format!(
                    "local server did not stop within {}s",
                    STOP_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!("Local server at {} dropped without stop()", self.base_url);
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("site");
        let err = LocalServer::start(&missing, 0).await.err().unwrap();
        assert!(matches!(err, ValidateError::ResourceLifecycle(_)));
    }

    #[tokio::test]
    async fn test_port_in_use_is_lifecycle_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = LocalServer::start(dir.path(), 0).await.unwrap();
        let port = first.addr().port();

        let err = LocalServer::start(dir.path(), port).await.err().unwrap();
        assert!(matches!(err, ValidateError::ResourceLifecycle(_)));

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_snapshots_of_encoded_routes() {
        use sitemirror_common::Route;

        let dir = tempfile::tempdir().unwrap();
        let origin = url::Url::parse("https://example.org/").unwrap();
        let live = url::Url::parse("https://example.org/spring%20fair/").unwrap();
        let route = Route::from_url(&live, &origin).unwrap();

        let snapshot = route.snapshot_path(dir.path());
        std::fs::create_dir_all(snapshot.parent().unwrap()).unwrap();
        std::fs::write(&snapshot, "<main>Spring fair</main>").unwrap();

        let mut server = LocalServer::start(dir.path(), 0).await.unwrap();
        let response = reqwest::get(route.url_on(server.base_url())).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "<main>Spring fair</main>");

        server.stop().await.unwrap();
    }
}
