use std::sync::LazyLock;

use regex::Regex;

/// `image: nginx:1.21`, `repository: "myrepo/app:v2"`, `image: 'postgres'`.
///
/// Only spaces and tabs may separate the key from the value, so a key that
/// opens a nested mapping never captures the next line.
static IMAGE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:image|repository):[ \t]*["']?([a-zA-Z0-9.-]+(?:/[a-zA-Z0-9.-]+)*(?::[a-zA-Z0-9.-]+)?)["']?"#,
    )
    .expect("image key pattern is valid")
});

/// Scan raw manifest text for candidate image tokens.
///
/// Works on text, not a YAML tree, so unrendered templates are fine.
pub fn extract(text: &str) -> impl Iterator<Item = &str> {
    IMAGE_KEY
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}
