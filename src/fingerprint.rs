//! Content fingerprints and path canonicalization.
//!
//! Canonical paths are the identity keys of the whole system: the queue
//! dedup set, the progress store and the documents table all key on them.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

const HASH_READ_BUF: usize = 64 * 1024;

/// Resolve symlinks, normalize the path, and verify it stays inside `root`.
/// Returns both the absolute filesystem path and the canonical string key
/// (root-relative, `/`-separated).
pub fn canonicalize(root: &Path, path: &Path) -> EngineResult<(PathBuf, String)> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let abs = dunce::canonicalize(&joined)
        .map_err(|_| EngineError::NotFound(joined.display().to_string()))?;
    let root_abs = dunce::canonicalize(root)
        .map_err(|e| EngineError::Io(e))?;

    let rel = abs
        .strip_prefix(&root_abs)
        .map_err(|_| EngineError::PathEscapesRoot(path.display().to_string()))?;

    let key = rel.to_string_lossy().replace('\\', "/");
    Ok((abs, key))
}

/// Streaming SHA-256 of a file's contents, lowercase hex. Never loads the
/// whole file into memory.
pub fn hash_file(path: &Path) -> EngineResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_BUF];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory string. Matches `hash_file` for identical bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_hash_matches_bytes_hash() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        let mut f = File::create(&p).unwrap();
        f.write_all(b"the quick brown fox").unwrap();
        drop(f);

        assert_eq!(hash_file(&p).unwrap(), hash_bytes(b"the quick brown fox"));
    }

    #[test]
    fn hash_is_deterministic_and_hex() {
        let h = hash_bytes(b"abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_bytes(b"abc"));
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonicalize_rejects_escapes() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let p = outside.path().join("evil.txt");
        std::fs::write(&p, "x").unwrap();

        let err = canonicalize(root.path(), &p).unwrap_err();
        assert!(matches!(err, EngineError::PathEscapesRoot(_)));
    }

    #[test]
    fn canonicalize_relative_inside_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        std::fs::write(root.path().join("sub/n.md"), "hi").unwrap();

        let (abs, key) = canonicalize(root.path(), Path::new("sub/n.md")).unwrap();
        assert!(abs.is_absolute());
        assert_eq!(key, "sub/n.md");
    }
}
