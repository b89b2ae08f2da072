use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use tracing::{debug, trace};

use super::{Connector, ImageDetails, ImageRuntime, RemoveOptions, RuntimeError};

/// Connects to the local Docker-compatible daemon (`DOCKER_HOST` or the
/// platform default socket).
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerConnector;

impl Connector for DockerConnector {
    type Runtime = DockerRuntime;

    fn connect(&self) -> BoxFuture<'_, Result<DockerRuntime, RuntimeError>> {
        async {
            // Settle on the highest API version both sides speak.
            let docker = Docker::connect_with_defaults()?.negotiate_version().await?;
            debug!(api = ?docker.client_version(), "connected to container runtime");
            Ok(DockerRuntime { docker })
        }
        .boxed()
    }
}

/// One daemon session. Dropping it closes the connection.
pub struct DockerRuntime {
    docker: Docker,
}

impl ImageRuntime for DockerRuntime {
    fn create_image<'a>(&'a self, reference: &'a str) -> BoxStream<'a, Result<(), RuntimeError>> {
        let (from_image, tag) = split_tag(reference);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(move |item| match item {
                Ok(info) => {
                    if let Some(status) = info.status {
                        trace!(image = reference, progress = ?info.progress, "{status}");
                    }
                    Ok(())
                }
                Err(e) => Err(classify(e, reference)),
            })
            .boxed()
    }

    fn inspect_image<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<ImageDetails, RuntimeError>> {
        async move {
            let inspect = self
                .docker
                .inspect_image(reference)
                .await
                .map_err(|e| classify(e, reference))?;

            Ok(ImageDetails {
                size_bytes: inspect.size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                layers: inspect.root_fs.and_then(|fs| fs.layers).unwrap_or_default(),
            })
        }
        .boxed()
    }

    fn remove_image<'a>(
        &'a self,
        reference: &'a str,
        options: RemoveOptions,
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        async move {
            let options = RemoveImageOptions {
                force: options.force,
                noprune: !options.prune_children,
            };
            let removed = self
                .docker
                .remove_image(reference, Some(options), None)
                .await
                .map_err(|e| classify(e, reference))?;

            for item in removed {
                if let Some(deleted) = item.deleted {
                    trace!(image = reference, "deleted {deleted}");
                }
                if let Some(untagged) = item.untagged {
                    trace!(image = reference, "untagged {untagged}");
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn classify(err: BollardError, reference: &str) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            reference: reference.to_string(),
        },
        other => RuntimeError::Docker(other),
    }
}

/// Split `name:tag`, defaulting the tag to `latest`.
///
/// A colon followed by a path (`registry:5000/foo`) is a port, not a tag.
fn split_tag(reference: &str) -> (String, String) {
    match reference.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name.to_string(), tag.to_string()),
        _ => (reference.to_string(), "latest".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tag_defaults_to_latest() {
        assert_eq!(split_tag("nginx"), ("nginx".into(), "latest".into()));
        assert_eq!(split_tag("nginx:1.21"), ("nginx".into(), "1.21".into()));
        assert_eq!(
            split_tag("ghcr.io/org/app:v2"),
            ("ghcr.io/org/app".into(), "v2".into())
        );
    }

    #[test]
    fn split_tag_ignores_registry_port() {
        assert_eq!(
            split_tag("localhost:5000/app"),
            ("localhost:5000/app".into(), "latest".into())
        );
        assert_eq!(
            split_tag("localhost:5000/app:v1"),
            ("localhost:5000/app".into(), "v1".into())
        );
    }

    #[test]
    fn not_found_is_classified() {
        let err = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: ghost:1".into(),
        };
        assert!(matches!(
            classify(err, "ghost:1"),
            RuntimeError::NotFound { reference } if reference == "ghost:1"
        ));
    }
}
