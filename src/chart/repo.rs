use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use super::{Credentials, download};
use crate::config::HelmPaths;

// ---- Helm's repositories.yaml ----

#[derive(Deserialize)]
struct RepositoryFile {
    #[serde(default)]
    repositories: Vec<Repository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Repository {
    fn credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone(),
        })
    }
}

// ---- Repository index.yaml ----

#[derive(Debug, Deserialize)]
pub struct IndexFile {
    #[serde(default)]
    entries: HashMap<String, Vec<ChartVersion>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartVersion {
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Where to download a chart from, and how to authenticate.
#[derive(Debug)]
pub struct ChartLocation {
    pub url: String,
    pub credentials: Option<Credentials>,
}

/// Resolve `repo/chart` (optionally pinned to `version`) to a download URL
/// using the repositories Helm already knows about.
pub async fn locate(
    helm: &HelmPaths,
    repo: &str,
    chart: &str,
    version: Option<&str>,
) -> Result<ChartLocation> {
    let config_path = helm
        .repository_config
        .as_deref()
        .context("Cannot locate Helm's repositories.yaml; set HELM_REPOSITORY_CONFIG")?;
    let repository = find_repository(config_path, repo)?;
    let credentials = repository.credentials();

    let index = load_index(helm, &repository, credentials.as_ref()).await?;
    let entry = select_version(&index, chart, version)?;
    let chart_url = entry
        .urls
        .first()
        .with_context(|| format!("Chart {repo}/{chart} {} has no download URL", entry.version))?;

    let url = resolve_url(&repository.url, chart_url)?;
    debug!(%url, version = %entry.version, "resolved chart");
    Ok(ChartLocation { url, credentials })
}

pub fn find_repository(config_path: &Path, name: &str) -> Result<Repository> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let file: RepositoryFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;

    file.repositories
        .into_iter()
        .find(|r| r.name == name)
        .with_context(|| {
            format!("Repository {name} not found; add it with `helm repo add {name} <url>`")
        })
}

async fn load_index(
    helm: &HelmPaths,
    repository: &Repository,
    credentials: Option<&Credentials>,
) -> Result<IndexFile> {
    let cached = helm
        .repository_cache
        .as_ref()
        .map(|dir| dir.join(format!("{}-index.yaml", repository.name)))
        .filter(|p| p.is_file());

    let content = match cached {
        Some(path) => {
            debug!(path = %path.display(), "using cached repository index");
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => {
            let url = resolve_url(&repository.url, "index.yaml")?;
            download(&url, credentials).await?
        }
    };

    serde_yaml::from_slice(&content)
        .with_context(|| format!("Failed to parse index of repository {}", repository.name))
}

/// Pick the requested version, or the newest stable one.
pub fn select_version<'a>(
    index: &'a IndexFile,
    chart: &str,
    version: Option<&str>,
) -> Result<&'a ChartVersion> {
    let versions = index
        .entries
        .get(chart)
        .filter(|v| !v.is_empty())
        .with_context(|| format!("Chart {chart} not found in repository index"))?;

    if let Some(wanted) = version {
        let wanted = wanted.trim_start_matches('v');
        return versions
            .iter()
            .find(|v| v.version.trim_start_matches('v') == wanted)
            .with_context(|| format!("Version {wanted} of chart {chart} not found"));
    }

    let newest = versions
        .iter()
        .filter_map(|v| {
            semver::Version::parse(v.version.trim_start_matches('v'))
                .ok()
                .filter(|parsed| parsed.pre.is_empty())
                .map(|parsed| (parsed, v))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, v)| v);

    // Helm writes entries newest-first.
    Ok(newest.unwrap_or(&versions[0]))
}

/// Chart URLs in an index may be relative to the repository.
pub fn resolve_url(repo_url: &str, chart_url: &str) -> Result<String> {
    if let Ok(absolute) = Url::parse(chart_url) {
        return Ok(absolute.to_string());
    }

    let base = Url::parse(&format!("{}/", repo_url.trim_end_matches('/')))
        .with_context(|| format!("Invalid repository URL {repo_url}"))?;
    let joined = base
        .join(chart_url)
        .map_err(|e| anyhow!("Invalid chart URL {chart_url}: {e}"))?;

    if !matches!(joined.scheme(), "http" | "https") {
        bail!("Unsupported chart URL scheme in {joined}");
    }
    Ok(joined.to_string())
}
