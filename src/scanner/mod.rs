pub mod extract;
pub mod normalize;
pub mod validate;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::enrich::{Enricher, OnImageMeasured};
use crate::runtime::Connector;

/// An image reference found in a chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Repository path with the tag stripped; the deduplication key.
    pub name: String,

    /// The full reference as written in the chart (name plus optional tag).
    pub reference: String,
}

/// Outcome of measuring one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    Available { size_bytes: u64, layers: usize },
    Unavailable { reason: String },
}

/// One line of the final inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub name: String,
    pub reference: String,
    pub metadata: Metadata,
}

/// Printed in place of a size when metadata could not be fetched.
pub const SIZE_UNAVAILABLE: &str = "Failed to fetch";

/// Printed in place of a layer count when metadata could not be fetched.
pub const LAYERS_UNAVAILABLE: i64 = -1;

/// Flat `{name, size, layers}` view of a record, kept stable for consumers
/// of earlier scan output.
#[derive(Debug, Serialize)]
pub struct LegacyImageInfo<'a> {
    pub name: &'a str,
    pub size: String,
    pub layers: i64,
}

impl ImageRecord {
    pub fn is_available(&self) -> bool {
        matches!(self.metadata, Metadata::Available { .. })
    }

    pub fn size_display(&self) -> String {
        match self.metadata {
            Metadata::Available { size_bytes, .. } => format_size(size_bytes),
            Metadata::Unavailable { .. } => SIZE_UNAVAILABLE.to_string(),
        }
    }

    pub fn layers_display(&self) -> i64 {
        match self.metadata {
            Metadata::Available { layers, .. } => layers as i64,
            Metadata::Unavailable { .. } => LAYERS_UNAVAILABLE,
        }
    }

    pub fn legacy(&self) -> LegacyImageInfo<'_> {
        LegacyImageInfo {
            name: &self.name,
            size: self.size_display(),
            layers: self.layers_display(),
        }
    }
}

/// `"12.34 MB"` from one MiB up, plain `"n bytes"` below.
pub fn format_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Unique images of a chart keyed by canonical name.
///
/// A later reference to the same name replaces the earlier one.
#[derive(Debug, Default)]
pub struct ImageSet {
    images: BTreeMap<String, ImageRef>,
}

impl ImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: ImageRef) {
        if let Some(previous) = self.images.get(&image.name) {
            if previous.reference != image.reference {
                warn!(
                    name = %image.name,
                    replaced = %previous.reference,
                    kept = %image.reference,
                    "image referenced with several tags, keeping the last one"
                );
            }
        }
        self.images.insert(image.name.clone(), image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRef> {
        self.images.values()
    }
}

impl IntoIterator for ImageSet {
    type Item = ImageRef;
    type IntoIter = std::collections::btree_map::IntoValues<String, ImageRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_values()
    }
}

/// Fold every image reference in `text` into `images`.
pub fn collect_images(text: &str, images: &mut ImageSet) {
    for token in extract::extract(text) {
        if validate::is_valid(token) {
            images.insert(normalize::normalize(token));
        } else {
            debug!(token, "skipping non-image token");
        }
    }
}

/// Walk a chart directory and collect the images referenced by its YAML files.
///
/// Any walk or read error aborts the whole discovery.
pub fn discover(chart_dir: &Path) -> Result<ImageSet> {
    let mut images = ImageSet::new();

    for entry in WalkDir::new(chart_dir).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to walk chart directory {}", chart_dir.display()))?;
        if entry.file_type().is_dir() || !is_yaml(entry.path()) {
            continue;
        }

        // Only I/O fails a scan; stray non-UTF-8 bytes are replaced.
        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        let before = images.len();
        collect_images(&String::from_utf8_lossy(&bytes), &mut images);
        debug!(
            file = %entry.path().display(),
            new_images = images.len() - before,
            "scanned manifest"
        );
    }

    Ok(images)
}

/// Discover a chart's images, then measure each unique one.
pub async fn scan<C: Connector>(
    chart_dir: &Path,
    enricher: &Enricher,
    connector: &C,
    on_measured: Option<OnImageMeasured>,
) -> Result<Vec<ImageRecord>> {
    let images = discover(chart_dir)?;
    Ok(enricher.enrich_all(connector, images, on_measured).await)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    fn reference<'a>(images: &'a ImageSet, name: &str) -> &'a str {
        images
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.reference.as_str())
            .unwrap()
    }

    fn chart(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let path = dir.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn finds_images_across_values_and_templates() {
        let dir = chart(&[
            ("values.yaml", "image: \"redis:7\"\n"),
            ("templates/deploy.yaml", "repository: myrepo/app:v1\n"),
        ]);

        let images = discover(dir.path()).unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["myrepo/app", "redis"]);
        assert_eq!(reference(&images, "redis"), "redis:7");
        assert_eq!(reference(&images, "myrepo/app"), "myrepo/app:v1");
    }

    #[test]
    fn last_reference_in_walk_order_wins() {
        let dir = chart(&[
            ("a.yaml", "image: nginx:1.21\n"),
            ("b.yaml", "image: nginx:1.22\n"),
        ]);

        let images = discover(dir.path()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(reference(&images, "nginx"), "nginx:1.22");
    }

    #[test]
    fn only_yaml_files_are_read() {
        let dir = chart(&[
            ("Chart.yaml", "name: demo\nversion: 0.1.0\n"),
            ("values.yml", "image: busybox\n"),
            ("README.md", "image: not-scanned:1\n"),
            ("templates/_helpers.tpl", "image: helper:1\n"),
        ]);

        let images = discover(dir.path()).unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["busybox"]);
    }

    #[test]
    fn noise_is_filtered() {
        let dir = chart(&[(
            "values.yaml",
            "image: your-image\nrepository: registry\nimage: {{ .Values.x }}\nimage: alpine:3\n",
        )]);

        let images = discover(dir.path()).unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["alpine"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(discover(&missing).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = chart(&[("values.yaml", "image: nginx\n")]);
        let file = dir.path().join("values.yaml");
        fs::set_permissions(&file, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores permission bits
        if fs::read(&file).is_ok() {
            return;
        }
        assert!(discover(dir.path()).is_err());
    }

    #[test]
    fn non_utf8_manifest_is_still_scanned() {
        let dir = chart(&[("values.yaml", "image: nginx:1.21\n")]);
        fs::write(dir.path().join("z-notes.yaml"), b"# caf\xe9\nimage: redis:7\n").unwrap();

        let images = discover(dir.path()).unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["nginx", "redis"]);
        assert_eq!(reference(&images, "redis"), "redis:7");
    }

    #[test]
    fn size_formatting_boundary() {
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1024 * 1024 - 1), "1048575 bytes");
        assert_eq!(format_size(0), "0 bytes");
        assert_eq!(format_size(56_842_240), "54.21 MB");
    }

    #[test]
    fn unavailable_metadata_renders_sentinels() {
        let record = ImageRecord {
            name: "ghost".into(),
            reference: "ghost:1".into(),
            metadata: Metadata::Unavailable {
                reason: "pull denied".into(),
            },
        };
        let legacy = record.legacy();
        assert_eq!(legacy.size, "Failed to fetch");
        assert_eq!(legacy.layers, -1);
        assert_eq!(
            serde_json::to_value(&legacy).unwrap(),
            serde_json::json!({"name": "ghost", "size": "Failed to fetch", "layers": -1})
        );
    }
}
