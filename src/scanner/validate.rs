use std::sync::LazyLock;

use regex::{Regex, RegexSet};

/// Tokens that look like image references but are noise.
static NOISE: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"^\{\{.*\}\}$",                       // template placeholder
        r#"^["']+$"#,                          // only quotes
        r"^[{}]+$",                            // only braces
        r"^\s*$",                              // empty or whitespace
        r"^[/:.]+$",                           // only delimiters
        r"^(your-image|placeholder|example)$", // placeholder words
        r"^(oci|registry)$",                   // generic registry words
    ])
    .expect("noise patterns are valid")
});

static ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9]").expect("alphanumeric pattern is valid"));

/// Whether `token` is plausibly a real image reference.
///
/// Leans towards accepting: a spurious candidate only costs a failed
/// enrichment, a dropped one is a hole in the inventory.
pub fn is_valid(token: &str) -> bool {
    !NOISE.is_match(token) && ALPHANUMERIC.is_match(token)
}
