//! On-disk layout of cached files.

use pigment_core::BlobHash;
use pigment_core::format::extension_for_mime;
use crate::error::{CacheError, CacheResult};
use std::path::{Component, Path, PathBuf};

/// Number of leading 4-character hash groups turned into directories.
pub const PARTITION_DEPTH: usize = 4;

/// Path of the cached file for `(hash, key, mime)` under `root`.
///
/// `912ec803b2ce49e4a541068d495ab570` with key `S100x100` and `image/png`
/// lands at `912e/c803/b2ce/49e4/a541068d495ab570/S100x100/png`. At least one
/// group is always kept for the final directory so short hashes still get a
/// per-hash directory.
///
/// The key and the mime extension must each be a single plain path
/// component; anything that could leave `root` is rejected.
pub fn destination(
    root: &Path,
    hash: &BlobHash,
    key: &str,
    mime: &str,
) -> CacheResult<PathBuf> {
    let groups: Vec<&str> = hash.groups().collect();
    let depth = PARTITION_DEPTH.min(groups.len().saturating_sub(1));

    let mut path = root.to_path_buf();
    for group in &groups[..depth] {
        path.push(group);
    }
    path.push(groups[depth..].concat());
    if !key.is_empty() {
        path.push(single_component(key)?);
    }
    path.push(single_component(extension_for_mime(mime))?);
    Ok(path)
}

fn single_component(part: &str) -> CacheResult<&str> {
    let mut components = Path::new(part).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == part => Ok(part),
        _ => Err(CacheError::InvalidKey(part.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> BlobHash {
        BlobHash::parse(s).unwrap()
    }

    #[test]
    fn test_destination_partitions_hash() {
        let path = destination(
            Path::new("/cache"),
            &hash("912ec803b2ce49e4a541068d495ab570"),
            "S100x100",
            "image/png",
        )
        .unwrap();
        assert_eq!(
            path,
            Path::new("/cache/912e/c803/b2ce/49e4/a541068d495ab570/S100x100/png")
        );
    }

    #[test]
    fn test_destination_short_hash() {
        let path = destination(Path::new("/cache"), &hash("abc123"), "", "image/jpeg").unwrap();
        assert_eq!(path, Path::new("/cache/abc1/23/jpg"));

        let path = destination(Path::new("/cache"), &hash("abc"), "G", "image/webp").unwrap();
        assert_eq!(path, Path::new("/cache/abc/G/webp"));
    }

    #[test]
    fn test_destination_depends_on_mime() {
        let h = hash("912ec803b2ce49e4a541068d495ab570");
        let png = destination(Path::new("/c"), &h, "S1", "image/png").unwrap();
        let webp = destination(Path::new("/c"), &h, "S1", "image/webp").unwrap();
        assert_ne!(png, webp);
        assert_eq!(png.parent(), webp.parent());
    }

    #[test]
    fn test_destination_rejects_escaping_parts() {
        let h = hash("abc123");
        let root = Path::new("/cache");
        for key in ["..", "R../../x", "a/b", "/etc", "."] {
            assert!(
                matches!(
                    destination(root, &h, key, "image/png"),
                    Err(CacheError::InvalidKey(_))
                ),
                "{key}"
            );
        }
        assert!(destination(root, &h, "S1", "image/..").is_err());
    }
}
