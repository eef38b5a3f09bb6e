//! Deterministic image tag derivation.
//!
//! For a fixed (repository URL, commit) pair the derived tag is invariant,
//! which is what makes the image-store probe an effective build cache.

/// Namespace prefix for all images this launcher builds.
pub const TAG_NAMESPACE: &str = "repospawn";

/// Escape a repository URL into the image-name charset.
///
/// ASCII alphanumerics pass through lowercased; every other byte becomes
/// `-xx` with two lowercase hex digits. Reversible in intent, not
/// guaranteed: lowercasing maps `A` and the original `a` to the same
/// output.
pub fn escape_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len() * 3);
    for b in url.bytes() {
        if b.is_ascii_alphanumeric() {
            out.push(b.to_ascii_lowercase() as char);
        } else {
            out.push_str(&format!("-{b:02x}"));
        }
    }
    out
}

/// Derive the deterministic image tag for a repository state.
///
/// Pure and total: identical inputs always produce the identical string,
/// and no ordinary URL or commit input can make it fail.
pub fn derive_tag(url: &str, commit: &str) -> String {
    format!("{TAG_NAMESPACE}-{}:{commit}", escape_url(url))
}
