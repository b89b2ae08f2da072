use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Result, anyhow, bail};

/// Settings resolved once at startup from flags and environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Images measured concurrently
    pub jobs: usize,

    /// JSON destination (`-` for stdout), human listing when unset
    pub json: Option<String>,

    pub helm: HelmPaths,
}

/// Where Helm keeps its repository list and downloaded indexes.
#[derive(Debug, Clone, Default)]
pub struct HelmPaths {
    pub repository_config: Option<PathBuf>,
    pub repository_cache: Option<PathBuf>,
}

/// Raw values as they arrive from the command line.
#[derive(Debug, Default)]
pub struct CliSettings {
    pub jobs: usize,
    pub json: Option<String>,
    pub repository_config: Option<PathBuf>,
    pub repository_cache: Option<PathBuf>,
}

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

impl AppConfig {
    pub fn resolve(cli: CliSettings) -> Result<Self> {
        if cli.jobs == 0 {
            bail!("--jobs must be at least 1");
        }

        let helm = HelmPaths {
            repository_config: cli
                .repository_config
                .or_else(|| dirs::config_dir().map(|d| d.join("helm").join("repositories.yaml"))),
            repository_cache: cli
                .repository_cache
                .or_else(|| dirs::cache_dir().map(|d| d.join("helm").join("repository"))),
        };

        Ok(Self {
            jobs: cli.jobs,
            json: cli.json,
            helm,
        })
    }
}

pub fn init_from_cli(cli: CliSettings) -> Result<()> {
    let cfg = AppConfig::resolve(cli)?;
    CONFIG
        .set(cfg)
        .map_err(|_| anyhow!("configuration initialised twice"))
}

pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("config::init_from_cli must run before config::get")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_jobs_is_rejected() {
        let err = AppConfig::resolve(CliSettings::default()).unwrap_err();
        assert!(err.to_string().contains("--jobs"));
    }

    #[test]
    fn explicit_helm_paths_win() {
        let cfg = AppConfig::resolve(CliSettings {
            jobs: 2,
            repository_config: Some("/etc/helm/repos.yaml".into()),
            repository_cache: Some("/var/cache/helm".into()),
            ..CliSettings::default()
        })
        .unwrap();

        assert_eq!(cfg.jobs, 2);
        assert_eq!(
            cfg.helm.repository_config.as_deref(),
            Some(std::path::Path::new("/etc/helm/repos.yaml"))
        );
        assert_eq!(
            cfg.helm.repository_cache.as_deref(),
            Some(std::path::Path::new("/var/cache/helm"))
        );
    }
}
