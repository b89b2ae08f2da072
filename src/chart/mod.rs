pub mod archive;
pub mod repo;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::HelmPaths;

/// Where a chart comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A chart directory, a packaged `.tgz`, or a single manifest
    File(PathBuf),

    /// An `http(s)://` URL to a packaged chart (local paths are accepted too)
    Link(String),

    /// A chart from a repository configured with `helm repo add`
    Repo {
        repo: String,
        chart: String,
        version: Option<String>,
    },
}

/// Basic-auth credentials for a chart repository.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// A chart ready to be scanned.
///
/// Downloaded or unpacked charts live in a scratch directory that is removed
/// when this value is dropped.
#[derive(Debug)]
pub struct AcquiredChart {
    root: PathBuf,
    _scratch: Option<TempDir>,
}

impl AcquiredChart {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Make the chart described by `source` available on local disk.
pub async fn acquire(source: &Source, helm: &HelmPaths) -> Result<AcquiredChart> {
    match source {
        Source::File(path) => from_path(path),
        Source::Link(link) if link.starts_with("oci://") => {
            bail!("OCI chart references are not supported: {link}")
        }
        Source::Link(link) if is_remote(link) => {
            let data = download(link, None).await?;
            from_bytes(&data)
        }
        Source::Link(link) => from_path(Path::new(link)),
        Source::Repo {
            repo,
            chart,
            version,
        } => {
            let location = repo::locate(helm, repo, chart, version.as_deref())
                .await
                .with_context(|| format!("Failed to resolve chart {repo}/{chart}"))?;
            let data = download(&location.url, location.credentials.as_ref()).await?;
            from_bytes(&data)
        }
    }
}

fn is_remote(link: &str) -> bool {
    link.starts_with("http://") || link.starts_with("https://")
}

fn from_path(path: &Path) -> Result<AcquiredChart> {
    if !path.exists() {
        bail!("Chart path {} does not exist", path.display());
    }

    if path.is_file() && archive::looks_like_archive(path) {
        let data =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        return from_bytes(&data);
    }

    Ok(AcquiredChart {
        root: path.to_path_buf(),
        _scratch: None,
    })
}

fn from_bytes(data: &[u8]) -> Result<AcquiredChart> {
    let scratch = tempfile::Builder::new()
        .prefix("helm-chart-")
        .tempdir()
        .context("Failed to create temp directory")?;

    // On error the scratch directory is dropped, and removed, here.
    archive::unpack(data, scratch.path())?;
    debug!(dir = %scratch.path().display(), "unpacked chart");

    Ok(AcquiredChart {
        root: scratch.path().to_path_buf(),
        _scratch: Some(scratch),
    })
}

pub(crate) async fn download(url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
    info!(%url, "downloading");
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let mut request = client.get(url);
    if let Some(c) = credentials {
        request = request.basic_auth(&c.username, c.password.as_ref());
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to download {url}"))?
        .error_for_status()
        .with_context(|| format!("Failed to download {url}"))?;
    let body = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read response from {url}"))?;

    Ok(body.to_vec())
}
