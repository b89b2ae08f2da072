use super::ImageRef;

/// Split a validated token into its canonical name and the reference to pull.
///
/// The name is everything before the first `:`. A tagless token is its own
/// name and is pulled as-is (the runtime resolves `latest`).
pub fn normalize(token: &str) -> ImageRef {
    let name = token.split_once(':').map_or(token, |(name, _)| name);
    ImageRef {
        name: name.to_string(),
        reference: token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_share_a_canonical_name() {
        let a = normalize("nginx:1.21");
        let b = normalize("nginx:1.22");
        assert_eq!(a.name, "nginx");
        assert_eq!(a.name, b.name);
        assert_eq!(a.reference, "nginx:1.21");
        assert_eq!(b.reference, "nginx:1.22");
    }

    #[test]
    fn tagless_token_is_its_own_name() {
        let image = normalize("myrepo/custom-app");
        assert_eq!(image.name, "myrepo/custom-app");
        assert_eq!(image.reference, "myrepo/custom-app");
    }

    #[test]
    fn splits_on_the_first_colon() {
        let image = normalize("localhost:5000/app:v1");
        assert_eq!(image.name, "localhost");
        assert_eq!(image.reference, "localhost:5000/app:v1");
    }
}
