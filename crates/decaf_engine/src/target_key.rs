use std::fmt::Write;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Target key for a standalone archive: `{slug}-{short_hash(slug)}`.
///
/// Only the final path component is used; the slug is lowercase ASCII
/// alphanumerics with every other run of characters collapsed to `-`.
pub fn archive_target_key(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let slug = slugify(&base);
    let hash = short_hash(&slug);
    format!("{slug}-{hash}")
}

fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("archive");
    }
    slug
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
