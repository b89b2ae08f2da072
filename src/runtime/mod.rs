pub mod docker;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Errors reported by a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("image {reference} not found")]
    NotFound { reference: String },

    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
}

/// What the enricher needs to know about a local image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    /// Image size in bytes as reported by the runtime
    pub size_bytes: u64,

    /// Root filesystem layer digests (diff IDs)
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub prune_children: bool,
}

/// The image operations a scan needs from a container runtime.
pub trait ImageRuntime: Send + Sync {
    /// Pull or create `reference` locally. The returned stream reports pull
    /// progress and must be consumed to completion.
    fn create_image<'a>(&'a self, reference: &'a str) -> BoxStream<'a, Result<(), RuntimeError>>;

    fn inspect_image<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<ImageDetails, RuntimeError>>;

    fn remove_image<'a>(
        &'a self,
        reference: &'a str,
        options: RemoveOptions,
    ) -> BoxFuture<'a, Result<(), RuntimeError>>;
}

/// Opens a fresh runtime session. Each concurrent enrichment owns one.
pub trait Connector: Send + Sync {
    type Runtime: ImageRuntime;

    fn connect(&self) -> BoxFuture<'_, Result<Self::Runtime, RuntimeError>>;
}
