//! Dataset download client.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Location of the symmetry trajectory archive
pub const DEFAULT_DATASET_URL: &str =
    "https://github.com/whitead/dmol-book/raw/main/data/sym_trajs.pb.gz";

/// Default local file name for the downloaded archive
pub const DEFAULT_ARCHIVE_PATH: &str = "data/sym_trajs.pb.gz";

/// Client for fetching the trajectory archive.
pub struct DatasetClient {
    client: Client,
}

impl Default for DatasetClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetClient {
    /// Create a new client.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Download `url` into `path`.
    ///
    /// An existing file is reused unless `force` is set. Parent
    /// directories are created as needed.
    pub async fn download(&self, url: &str, path: impl AsRef<Path>, force: bool) -> Result<PathBuf> {
        let path = path.as_ref().to_path_buf();

        if path.exists() && !force {
            info!("Using cached archive {}", path.display());
            return Ok(path);
        }

        info!("Downloading {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        debug!("Received {} bytes", body.len());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // a failed write must not leave a truncated archive behind
        let partial = partial_path(&path);
        if let Err(err) = std::fs::write(&partial, &body) {
            let _ = std::fs::remove_file(&partial);
            return Err(err.into());
        }
        std::fs::rename(&partial, &path)?;

        info!("Saved {} bytes to {}", body.len(), path.display());
        Ok(path)
    }
}

/// Sibling file the download is written to before it is moved into place
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Answer a single HTTP request with `response` and return the URL
    fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/sym_trajs.pb.gz", addr)
    }

    #[tokio::test]
    async fn test_cached_file_skips_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.pb.gz");
        std::fs::write(&path, b"cached").unwrap();

        // unroutable URL: reaching the network would fail the test
        let client = DatasetClient::new();
        let result = client
            .download("http://127.0.0.1:9/unreachable", &path, false)
            .await
            .unwrap();

        assert_eq!(result, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"cached");
    }

    #[test]
    fn test_default_url() {
        assert!(DEFAULT_DATASET_URL.ends_with("sym_trajs.pb.gz"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let url = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.pb.gz");

        let err = DatasetClient::new()
            .download(&url, &path, false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn test_download_writes_archive() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("archive.pb.gz");

        let result = DatasetClient::new()
            .download(&url, &path, true)
            .await
            .unwrap();

        assert_eq!(result, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_partial_path_is_sibling() {
        let path = Path::new("data/sym_trajs.pb.gz");
        assert_eq!(partial_path(path), PathBuf::from("data/sym_trajs.pb.gz.part"));
    }
}
