//! Pluggable ingestion validation.
//!
//! The validator runs before extraction. `Reject` with critical severity
//! moves the file into the quarantine directory (preserved for audit);
//! non-critical rejections only mark progress. Warnings accept the file
//! with a logged note.

use std::io::Read;
use std::path::Path;

use tracing::warn;

use crate::config::QUARANTINE_DIR_NAME;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub enum Verdict {
    Accept,
    /// Accepted, but with a note worth logging.
    Warn(String),
    Reject {
        reason: String,
        severity: Severity,
    },
}

pub trait Validator: Send + Sync {
    fn validate(&self, path: &Path) -> EngineResult<Verdict>;
}

/// Built-in checks: regular-file, size cap, and a NUL-byte sniff that
/// catches binaries masquerading under text extensions.
pub struct DefaultValidator {
    max_file_size: u64,
}

const SNIFF_BYTES: usize = 8 * 1024;

impl DefaultValidator {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl Validator for DefaultValidator {
    fn validate(&self, path: &Path) -> EngineResult<Verdict> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Ok(Verdict::Reject {
                reason: "not a regular file".into(),
                severity: Severity::Warning,
            });
        }
        if meta.len() > self.max_file_size {
            return Ok(Verdict::Reject {
                reason: format!(
                    "file size {} exceeds limit {}",
                    meta.len(),
                    self.max_file_size
                ),
                severity: Severity::Warning,
            });
        }

        if meta.len() > 0 {
            let mut head = vec![0u8; SNIFF_BYTES.min(meta.len() as usize)];
            let mut f = std::fs::File::open(path)?;
            let n = f.read(&mut head)?;
            if head[..n].contains(&0) {
                return Ok(Verdict::Reject {
                    reason: "binary content under a text extension".into(),
                    severity: Severity::Critical,
                });
            }
        }

        Ok(Verdict::Accept)
    }
}

/// Move a critically rejected file into `<root>/.lodestone-quarantine/`,
/// preserving its root-relative layout. Returns the quarantine path.
pub fn quarantine(root: &Path, abs_path: &Path, canonical: &str) -> EngineResult<std::path::PathBuf> {
    let dest = root.join(QUARANTINE_DIR_NAME).join(canonical);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(abs_path, &dest) {
        Ok(()) => Ok(dest),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            std::fs::copy(abs_path, &dest)?;
            std::fs::remove_file(abs_path)?;
            Ok(dest)
        }
        Err(e) => {
            warn!(path = canonical, error = %e, "quarantine move failed");
            Err(EngineError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ok.md");
        std::fs::write(&p, "all good here").unwrap();
        let v = DefaultValidator::new(1024).validate(&p).unwrap();
        assert!(matches!(v, Verdict::Accept));
    }

    #[test]
    fn rejects_oversize() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("big.txt");
        std::fs::write(&p, vec![b'a'; 100]).unwrap();
        let v = DefaultValidator::new(10).validate(&p).unwrap();
        assert!(matches!(
            v,
            Verdict::Reject {
                severity: Severity::Warning,
                ..
            }
        ));
    }

    #[test]
    fn rejects_binary_as_critical() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("fake.txt");
        std::fs::write(&p, [b'a', 0, b'b']).unwrap();
        let v = DefaultValidator::new(1024).validate(&p).unwrap();
        assert!(matches!(
            v,
            Verdict::Reject {
                severity: Severity::Critical,
                ..
            }
        ));
    }

    #[test]
    fn quarantine_preserves_relative_layout() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("sub")).unwrap();
        let p = root.path().join("sub/evil.txt");
        std::fs::write(&p, "x").unwrap();

        let dest = quarantine(root.path(), &p, "sub/evil.txt").unwrap();
        assert!(!p.exists());
        assert!(dest.exists());
        assert!(dest.ends_with("sub/evil.txt"));
        assert!(dest.starts_with(root.path().join(QUARANTINE_DIR_NAME)));
    }
}
