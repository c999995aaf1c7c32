//! Remote archive source
//!
//! Keeps the local JTV archive in sync with a remote URL while minimizing
//! redundant transfer: a HEAD probe reads the content type, advertised
//! length, and `Last-Modified` token; an unchanged token with the archive
//! still on disk short-circuits the download. Remote unavailability is never
//! fatal — every transport failure resolves to "not changed" so stale local
//! data keeps serving queries.

use log::{debug, info, warn};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Working copy of the downloaded archive
pub const ARCHIVE_FILE: &str = "jtv.zip";

/// Sidecar file holding the last-seen freshness token
pub const TOKEN_FILE: &str = "jtv.token";

/// Archives advertised below this size are rejected as implausible
/// (typically an error page served with a 200)
const MIN_ARCHIVE_BYTES: u64 = 100_000;

/// Timeout applied to each HTTP call, bounding the refresh pipeline
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors internal to a refresh attempt; resolved to "not changed" at the boundary
#[derive(Debug, Error)]
enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conditional fetcher for the schedule archive
#[derive(Debug, Clone)]
pub struct RemoteSource {
    client: Client,
    archive_path: PathBuf,
    token_path: PathBuf,
}

impl RemoteSource {
    /// Creates a source whose working files live under `dir`
    pub fn new(dir: &Path) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(RemoteSource {
            client,
            archive_path: dir.join(ARCHIVE_FILE),
            token_path: dir.join(TOKEN_FILE),
        })
    }

    /// Path of the local archive copy
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Synchronizes the local archive with `url`
    ///
    /// Returns `true` only when a new archive was downloaded and validated.
    /// An empty URL is a no-op (operate from the cached local file), and any
    /// transport or integrity problem is logged and reported as unchanged.
    pub async fn refresh(&self, url: &str) -> bool {
        if url.is_empty() {
            debug!("no source url configured, using local archive only");
            return false;
        }
        match self.try_refresh(url).await {
            Ok(changed) => changed,
            Err(err) => {
                warn!("archive refresh failed: {}", err);
                false
            }
        }
    }

    async fn try_refresh(&self, url: &str) -> Result<bool, RemoteError> {
        let head = self.client.head(url).send().await?.error_for_status()?;

        let content_type = header_str(&head, CONTENT_TYPE);
        if !is_archive_content_type(&content_type) {
            warn!("'{}' is not an archive (content type '{}')", url, content_type);
            return Ok(false);
        }

        let advertised: u64 = header_str(&head, CONTENT_LENGTH).parse().unwrap_or(0);
        if advertised < MIN_ARCHIVE_BYTES {
            warn!("'{}' advertises implausible size {}", url, advertised);
            return Ok(false);
        }

        let modified = header_str(&head, LAST_MODIFIED);
        if !modified.is_empty() && self.archive_path.exists() {
            if let Ok(token) = fs::read_to_string(&self.token_path) {
                if token == modified {
                    info!("archive is up to date ({})", modified);
                    return Ok(false);
                }
            }
        }

        info!("downloading {}", url);
        let payload = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        fs::write(&self.archive_path, &payload)?;

        if (payload.len() as u64) < advertised {
            warn!(
                "short download: got {} of {} advertised bytes, will retry",
                payload.len(),
                advertised
            );
            // Discard the suspect artifact and the token so the next
            // refresh cycle sees a mismatch and fetches again.
            let _ = fs::remove_file(&self.archive_path);
            let _ = fs::remove_file(&self.token_path);
            return Ok(false);
        }

        if !modified.is_empty() {
            fs::write(&self.token_path, &modified)?;
        }
        info!("downloaded {} bytes", payload.len());
        Ok(true)
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn is_archive_content_type(content_type: &str) -> bool {
    matches!(
        content_type.split(';').next().unwrap_or("").trim(),
        "application/zip" | "application/x-zip-compressed"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tiny_http::{Header, Method, Response, Server, StatusCode};

    struct StubRemote {
        url: String,
        head_count: Arc<AtomicUsize>,
        get_count: Arc<AtomicUsize>,
    }

    /// Serves HEAD/GET for one archive, advertising `advertised` bytes on
    /// HEAD regardless of the actual payload size
    fn spawn_stub(
        payload: Vec<u8>,
        advertised: usize,
        modified: &str,
        content_type: &str,
    ) -> StubRemote {
        let server = Server::http("127.0.0.1:0").expect("bind stub server");
        let port = server.server_addr().to_ip().expect("ip addr").port();
        let head_count = Arc::new(AtomicUsize::new(0));
        let get_count = Arc::new(AtomicUsize::new(0));

        let heads = Arc::clone(&head_count);
        let gets = Arc::clone(&get_count);
        let modified = modified.to_string();
        let content_type = content_type.to_string();
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let type_header = Header::from_bytes(
                    &b"Content-Type"[..],
                    content_type.as_bytes(),
                )
                .expect("header");
                let modified_header =
                    Header::from_bytes(&b"Last-Modified"[..], modified.as_bytes())
                        .expect("header");
                // Identity encoding regardless of size: past its default
                // threshold tiny_http switches to chunked transfer and the
                // advertised length never reaches the client as a
                // Content-Length header.
                match request.method() {
                    Method::Head => {
                        heads.fetch_add(1, Ordering::SeqCst);
                        let response = Response::new(
                            StatusCode(200),
                            vec![type_header, modified_header],
                            Cursor::new(Vec::new()),
                            Some(advertised),
                            None,
                        )
                        .with_chunked_threshold(usize::MAX);
                        let _ = request.respond(response);
                    }
                    _ => {
                        gets.fetch_add(1, Ordering::SeqCst);
                        let response = Response::from_data(payload.clone())
                            .with_header(type_header)
                            .with_header(modified_header)
                            .with_chunked_threshold(usize::MAX);
                        let _ = request.respond(response);
                    }
                }
            }
        });

        StubRemote {
            url: format!("http://127.0.0.1:{}/jtv.zip", port),
            head_count,
            get_count,
        }
    }

    fn big_payload() -> Vec<u8> {
        vec![0x5A; MIN_ARCHIVE_BYTES as usize]
    }

    #[tokio::test]
    async fn test_empty_url_is_a_noop() {
        let dir = TempDir::new().expect("temp dir");
        let source = RemoteSource::new(dir.path()).expect("source");
        assert!(!source.refresh("").await);
    }

    #[tokio::test]
    async fn test_download_then_freshness_short_circuit() {
        let payload = big_payload();
        let stub = spawn_stub(
            payload.clone(),
            payload.len(),
            "Mon, 15 Jan 2024 10:00:00 GMT",
            "application/zip",
        );
        let dir = TempDir::new().expect("temp dir");
        let source = RemoteSource::new(dir.path()).expect("source");

        assert!(source.refresh(&stub.url).await, "first refresh downloads");
        assert!(!source.refresh(&stub.url).await, "second refresh is a hit");

        // Exactly one GET across both refreshes; the second was HEAD-only.
        assert_eq!(stub.get_count.load(Ordering::SeqCst), 1);
        assert_eq!(stub.head_count.load(Ordering::SeqCst), 2);
        assert!(source.archive_path().exists());
        assert_eq!(
            fs::read(source.archive_path()).expect("read archive"),
            payload
        );
    }

    #[tokio::test]
    async fn test_short_download_discards_token_and_retries() {
        let payload = big_payload();
        let stub = spawn_stub(
            payload.clone(),
            payload.len() + 4096,
            "Mon, 15 Jan 2024 10:00:00 GMT",
            "application/zip",
        );
        let dir = TempDir::new().expect("temp dir");
        let source = RemoteSource::new(dir.path()).expect("source");

        assert!(!source.refresh(&stub.url).await, "short download rejected");
        assert!(
            !dir.path().join(TOKEN_FILE).exists(),
            "token must not be persisted for a corrupt download"
        );

        assert!(!source.refresh(&stub.url).await);
        assert_eq!(
            stub.get_count.load(Ordering::SeqCst),
            2,
            "mismatch must be retried with a fresh GET"
        );
    }

    #[tokio::test]
    async fn test_wrong_content_type_rejected_without_get() {
        let payload = big_payload();
        let stub = spawn_stub(payload.clone(), payload.len(), "", "text/html");
        let dir = TempDir::new().expect("temp dir");
        let source = RemoteSource::new(dir.path()).expect("source");

        assert!(!source.refresh(&stub.url).await);
        assert_eq!(stub.get_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_implausibly_small_archive_rejected() {
        let stub = spawn_stub(vec![0u8; 10], 10, "", "application/zip");
        let dir = TempDir::new().expect("temp dir");
        let source = RemoteSource::new(dir.path()).expect("source");

        assert!(!source.refresh(&stub.url).await);
        assert_eq!(stub.get_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connection_error_resolves_to_unchanged() {
        let dir = TempDir::new().expect("temp dir");
        let source = RemoteSource::new(dir.path()).expect("source");
        // Nothing listens on this port.
        assert!(!source.refresh("http://127.0.0.1:1/jtv.zip").await);
    }

    #[test]
    fn test_content_type_matching() {
        assert!(is_archive_content_type("application/zip"));
        assert!(is_archive_content_type("application/zip; charset=binary"));
        assert!(is_archive_content_type("application/x-zip-compressed"));
        assert!(!is_archive_content_type("text/html"));
        assert!(!is_archive_content_type(""));
    }
}
