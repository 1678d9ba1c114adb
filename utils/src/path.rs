//! String sanitization and random-word generation used by finalizer
//! naming (`sanitize_name`) and bundle-finalizer unique suffixes
//! (`randword`).

use rand::distr::{Alphanumeric, SampleString};

/// Characters that survive [`sanitize_name`] unchanged. Anything else
/// in the input becomes `_`.
const SAFE_CHARACTERS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789().-/_";

/// Scrub a string down to characters safe for an AMI name or other
/// cloud-provider metadata field: ASCII letters, digits, and
/// `().-/_`. Every other character is replaced with `_`, preserving
/// the original length and index of unaffected characters.
pub fn sanitize_name(word: &str) -> String {
    word.chars()
        .map(|c| if SAFE_CHARACTERS.contains(c) { c } else { '_' })
        .collect()
}

/// A short random lowercase-alphanumeric suffix, used by the bundle
/// finalizer to disambiguate concurrent image names in one bucket.
pub fn randword(length: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), length).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_safe_characters_at_index() {
        let input = "httpd-2.4.58_1(x86_64)/amd";
        assert_eq!(sanitize_name(input), input);
    }

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(sanitize_name("foo bar!baz"), "foo_bar_baz");
        assert_eq!(sanitize_name("naïve"), "na_ve");
    }

    #[test]
    fn randword_has_requested_length() {
        let w = randword(6);
        assert_eq!(w.len(), 6);
        assert!(w.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
