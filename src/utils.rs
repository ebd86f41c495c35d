//! Utility functions for artifact naming and identifiers

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::path::{Path, PathBuf};

/// Length of the random suffix in generated artifact names
const ARTIFACT_SUFFIX_LEN: usize = 6;

/// Longest filename stem kept in generated artifact names
const MAX_STEM_LEN: usize = 64;

/// Random lowercase alphanumeric string of `len` characters
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Filename stem reduced to characters safe on every platform
///
/// # Examples
///
/// ```
/// use vectorq::utils::sanitize_stem;
///
/// assert_eq!(sanitize_stem("My Logo (final).png"), "My_Logo_final");
/// assert_eq!(sanitize_stem(".png"), "image");
/// ```
pub fn sanitize_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed: String = out.trim_matches('_').chars().take(MAX_STEM_LEN).collect();

    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed
    }
}

/// Collision-free artifact path: `{dir}/{stem}-{timestamp}-{suffix}.{ext}`
///
/// The timestamp and random suffix keep sequential and concurrent runs from
/// overwriting each other without any locking.
pub fn artifact_path(dir: &Path, source_name: &str, extension: &str) -> PathBuf {
    artifact_path_at(dir, source_name, extension, Utc::now())
}

fn artifact_path_at(dir: &Path, source_name: &str, extension: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "{}-{}-{}.{}",
        sanitize_stem(source_name),
        at.format("%Y%m%d-%H%M%S%3f"),
        random_suffix(ARTIFACT_SUFFIX_LEN),
        extension
    ))
}

/// Temporary sibling of `path` used while an artifact is being written
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn suffix_has_requested_length() {
        let s = random_suffix(12);
        assert_eq!(s.len(), 12);
        assert!(s.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn stems_are_sanitized() {
        assert_eq!(sanitize_stem("photo.jpg"), "photo");
        assert_eq!(sanitize_stem("a  b//c.png"), "c");
        assert_eq!(sanitize_stem("über-bild.png"), "ber-bild");
        assert_eq!(sanitize_stem("__x__.png"), "x");
        assert_eq!(sanitize_stem(""), "image");
        assert_eq!(sanitize_stem(&"z".repeat(200)).len(), MAX_STEM_LEN);
    }

    #[test]
    fn artifact_path_layout() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).single().unwrap_or_default();
        let path = artifact_path_at(Path::new("/out"), "logo.png", "svg", at);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        assert!(path.starts_with("/out"));
        assert!(name.starts_with("logo-20260314-150926000-"), "{name}");
        assert!(name.ends_with(".svg"));
        assert_eq!(name.len(), "logo-20260314-150926000-".len() + ARTIFACT_SUFFIX_LEN + 4);
    }

    #[test]
    fn sequential_paths_differ() {
        let a = artifact_path(Path::new("out"), "x.png", "svg");
        let b = artifact_path(Path::new("out"), "x.png", "svg");
        assert_ne!(a, b);
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/out/a.svg")),
            PathBuf::from("/out/a.svg.part")
        );
    }
}
