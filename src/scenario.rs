//! Loading the natural-language test scenario.

use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::ScenarioError;

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Reads the scenario text from a local file or an `http(s)` URL.
pub async fn load_scenario(location: &str) -> Result<String, ScenarioError> {
    if is_remote(location) {
        fetch(location).await
    } else {
        read_file(Path::new(location)).await
    }
}

async fn read_file(path: &Path) -> Result<String, ScenarioError> {
    debug!(path = %path.display(), "reading test file");
    tokio::fs::read_to_string(path).await.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ScenarioError::NotFound(path.to_path_buf())
        } else {
            ScenarioError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

async fn fetch(url: &str) -> Result<String, ScenarioError> {
    debug!(url, "fetching test file");
    let fetch_error = |message: String| ScenarioError::Fetch {
        url: url.to_string(),
        message,
    };

    let response = reqwest::get(url)
        .await
        .map_err(|err| fetch_error(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(format!("HTTP {status}")));
    }

    response.text().await.map_err(|err| fetch_error(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_schemes_are_remote() {
        assert!(is_remote("https://example.com/login.md"));
        assert!(is_remote("http://localhost:8080/t.txt"));
        assert!(!is_remote("tests/login.md"));
        assert!(!is_remote("ftp://example.com/t.txt"));
    }

    #[tokio::test]
    async fn reads_local_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("login.md");
        std::fs::write(&path, "Open ${URL} and log in.").expect("write scenario");

        let text = load_scenario(path.to_str().expect("utf-8 path"))
            .await
            .expect("loads");
        assert_eq!(text, "Open ${URL} and log in.");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.md");

        let err = load_scenario(path.to_str().expect("utf-8 path"))
            .await
            .expect_err("missing");
        assert!(matches!(err, ScenarioError::NotFound(ref missing) if missing == &path));
    }
}
