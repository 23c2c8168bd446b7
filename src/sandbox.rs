//! Root-directory confinement for requested file names.
//!
//! Every filename arriving in a request is resolved through [`resolve`]
//! before any filesystem access. The check happens on canonicalized paths,
//! never on the raw request string, so `..` sequences, absolute paths and
//! symlink tricks all fail the same way.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("requested path escapes the served root")]
    Escape,
    #[error("cannot resolve requested path: {0}")]
    Io(#[from] io::Error),
}

/// Resolve `requested` against `root`, requiring the canonical result to be
/// equal to or a descendant of the canonical root.
///
/// Write targets may not exist yet; for those the containing directory is
/// canonicalized and the final component re-attached, so the escape check
/// still runs against the real directory the file would land in.
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf, SandboxError> {
    let root = root.canonicalize()?;
    let joined = root.join(requested);

    let canonical = match joined.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let parent = joined.parent().ok_or(SandboxError::Escape)?;
            let name = joined.file_name().ok_or(SandboxError::Escape)?;
            parent.canonicalize()?.join(name)
        }
        Err(e) => return Err(SandboxError::Io(e)),
    };

    if canonical.starts_with(&root) {
        Ok(canonical)
    } else {
        Err(SandboxError::Escape)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn existing_file_resolves() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        let file = root.join("test.txt");
        std::fs::write(&file, b"test content").unwrap();

        let resolved = resolve(root, "test.txt").unwrap();
        assert_eq!(resolved, file.canonicalize().unwrap());
    }

    #[test]
    fn missing_file_resolves_for_writes() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        let resolved = resolve(root, "new-file.bin").unwrap();
        assert_eq!(resolved, root.canonicalize().unwrap().join("new-file.bin"));
    }

    #[test]
    fn dot_dot_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        assert!(matches!(resolve(root, "../foo"), Err(SandboxError::Escape)));
        assert!(matches!(
            resolve(root, "../../../etc/passwd"),
            Err(SandboxError::Escape)
        ));
    }

    #[test]
    fn absolute_path_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        assert!(matches!(resolve(root, "/etc/passwd"), Err(SandboxError::Escape)));
    }

    #[test]
    fn nested_escape_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();

        assert!(matches!(
            resolve(root, "sub/../../escape.txt"),
            Err(SandboxError::Escape)
        ));
    }

    #[test]
    fn trailing_dot_dot_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        assert!(matches!(resolve(root, "sub/.."), Err(SandboxError::Escape)));
    }

    #[test]
    fn missing_intermediate_directory_is_io() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        assert!(matches!(
            resolve(root, "no-such-dir/file.txt"),
            Err(SandboxError::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let outside = tempdir().unwrap();
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert!(matches!(
            resolve(root, "link/secret.txt"),
            Err(SandboxError::Escape)
        ));
    }
}
