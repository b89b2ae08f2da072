use futures_util::{StreamExt, stream};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::runtime::{Connector, ImageRuntime, RemoveOptions, RuntimeError};
use crate::scanner::{ImageRecord, ImageRef, ImageSet, Metadata, format_size};

/// Invoked once per image as soon as its record is ready, with the number of
/// records done so far and the total.
pub type OnImageMeasured = Box<dyn Fn(&ImageRecord, usize, usize) + Send + Sync>;

/// Why one image could not be measured. Never fatal to a scan.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("could not connect to the container runtime: {0}")]
    Connect(#[source] RuntimeError),

    #[error("failed to pull {reference}: {source}")]
    Materialize {
        reference: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to inspect {reference}: {source}")]
    Inspect {
        reference: String,
        #[source]
        source: RuntimeError,
    },

    #[error("scan cancelled before {reference} was measured")]
    Cancelled { reference: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub size_bytes: u64,
    pub layers: usize,
}

/// Measures images against a container runtime, pulling each one only long
/// enough to inspect it.
#[derive(Clone)]
pub struct Enricher {
    jobs: usize,
    cancel: watch::Receiver<bool>,
}

impl Enricher {
    /// `jobs` bounds how many images are measured at once. Flipping the
    /// `cancel` flag to `true` stops in-flight and pending work.
    pub fn new(jobs: usize, cancel: watch::Receiver<bool>) -> Self {
        Self {
            jobs: jobs.max(1),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Pull, drain, inspect, then remove `reference`.
    ///
    /// Once a pull has been issued the image is removed on every exit path,
    /// cancellation included. A failed removal is only logged.
    #[instrument(skip_all, fields(image = reference))]
    pub async fn enrich<R: ImageRuntime>(
        &self,
        runtime: &R,
        reference: &str,
    ) -> Result<Measurement, EnrichError> {
        let mut materialized = false;
        let mut cancel = self.cancel.clone();

        let outcome = tokio::select! {
            res = measure(runtime, reference, &mut materialized) => res,
            () = cancelled(&mut cancel) => Err(EnrichError::Cancelled {
                reference: reference.to_string(),
            }),
        };

        if materialized {
            cleanup(runtime, reference).await;
        }
        outcome
    }

    /// Like [`Enricher::enrich`], folding failures into the record.
    pub async fn record<R: ImageRuntime>(&self, runtime: &R, image: ImageRef) -> ImageRecord {
        match self.enrich(runtime, &image.reference).await {
            Ok(m) => {
                info!(
                    image = %image.reference,
                    layers = m.layers,
                    size = %format_size(m.size_bytes),
                    "measured image"
                );
                ImageRecord {
                    name: image.name,
                    reference: image.reference,
                    metadata: Metadata::Available {
                        size_bytes: m.size_bytes,
                        layers: m.layers,
                    },
                }
            }
            Err(e) => unavailable(image, e),
        }
    }

    /// Measure every image of the set, at most `jobs` at a time.
    ///
    /// Each image gets its own runtime session, dropped as soon as that image
    /// is done. The returned records are in completion order.
    pub async fn enrich_all<C: Connector>(
        &self,
        connector: &C,
        images: ImageSet,
        on_measured: Option<OnImageMeasured>,
    ) -> Vec<ImageRecord> {
        let total = images.len();
        let mut done = 0;
        stream::iter(images)
            .map(|image| self.connect_and_record(connector, image))
            .buffer_unordered(self.jobs)
            .inspect(|record| {
                done += 1;
                if let Some(cb) = &on_measured {
                    cb(record, done, total);
                }
            })
            .collect()
            .await
    }

    async fn connect_and_record<C: Connector>(
        &self,
        connector: &C,
        image: ImageRef,
    ) -> ImageRecord {
        if self.is_cancelled() {
            let reference = image.reference.clone();
            return unavailable(image, EnrichError::Cancelled { reference });
        }

        match connector.connect().await {
            Ok(runtime) => self.record(&runtime, image).await,
            Err(e) => unavailable(image, EnrichError::Connect(e)),
        }
    }
}

async fn measure<R: ImageRuntime>(
    runtime: &R,
    reference: &str,
    materialized: &mut bool,
) -> Result<Measurement, EnrichError> {
    let mut progress = runtime.create_image(reference);
    *materialized = true;

    // Consume the whole stream even after an error so the call is released.
    let mut pulled = Ok(());
    while let Some(item) = progress.next().await {
        if let Err(e) = item {
            if pulled.is_ok() {
                pulled = Err(e);
            }
        }
    }
    drop(progress);

    if let Err(source) = pulled {
        *materialized = false;
        return Err(EnrichError::Materialize {
            reference: reference.to_string(),
            source,
        });
    }

    let details = runtime
        .inspect_image(reference)
        .await
        .map_err(|source| EnrichError::Inspect {
            reference: reference.to_string(),
            source,
        })?;

    Ok(Measurement {
        size_bytes: details.size_bytes,
        layers: details.layers.len(),
    })
}

async fn cleanup<R: ImageRuntime>(runtime: &R, reference: &str) {
    let options = RemoveOptions {
        force: true,
        prune_children: true,
    };
    match runtime.remove_image(reference, options).await {
        Ok(()) => debug!("removed image"),
        Err(RuntimeError::NotFound { .. }) => debug!("image already gone"),
        Err(e) => warn!(error = %e, "failed to remove image {reference}"),
    }
}

/// Resolves once the flag is raised; never if its sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn unavailable(image: ImageRef, err: EnrichError) -> ImageRecord {
    warn!(image = %image.reference, "{err}");
    ImageRecord {
        name: image.name,
        reference: image.reference,
        metadata: Metadata::Unavailable {
            reason: err.to_string(),
        },
    }
}
