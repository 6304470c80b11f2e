//! Sandbox resolution for file reads requested by the model.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Allowed root plus the base directory used for relative requests.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    root_absolute: bool,
    config_dir: PathBuf,
}

impl Sandbox {
    /// `root_absolute` records whether the root was declared as an absolute
    /// path; relative requests are joined against the root in that case and
    /// against `config_dir` otherwise.
    pub fn new(root: impl Into<PathBuf>, root_absolute: bool, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            root_absolute,
            config_dir: config_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` to an existing file inside the root.
    ///
    /// Returns `None` when the file does not exist or lies outside the root;
    /// callers treat both the same way.
    pub fn resolve(&self, requested: &str) -> Option<PathBuf> {
        let requested_path = Path::new(requested);
        let joined = if requested_path.is_absolute() {
            requested_path.to_path_buf()
        } else if self.root_absolute {
            self.root.join(requested_path)
        } else {
            self.config_dir.join(requested_path)
        };

        let Ok(canonical) = fs::canonicalize(&joined) else {
            debug!(path = %joined.display(), "requested file not found");
            return None;
        };
        if !canonical.is_file() {
            debug!(path = %canonical.display(), "requested path is not a file");
            return None;
        }
        let Ok(canonical_root) = fs::canonicalize(&self.root) else {
            warn!(root = %self.root.display(), "sandbox root does not exist");
            return None;
        };
        if !canonical.starts_with(&canonical_root) {
            warn!(
                path = %canonical.display(),
                root = %canonical_root.display(),
                "access denied: requested file is outside the allowed root"
            );
            return None;
        }
        Some(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Layout {
        _temp: tempfile::TempDir,
        config_dir: PathBuf,
        root: PathBuf,
    }

    /// `<tmp>/cfg/data/a.txt`, `<tmp>/cfg/secret.txt`, `<tmp>/cfg/data2/b.txt`.
    fn layout() -> Layout {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_dir = temp.path().join("cfg");
        let root = config_dir.join("data");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("a.txt"), "a").expect("write");
        fs::write(config_dir.join("secret.txt"), "s").expect("write");
        fs::create_dir_all(config_dir.join("data2")).expect("mkdir");
        fs::write(config_dir.join("data2/b.txt"), "b").expect("write");
        Layout {
            _temp: temp,
            config_dir,
            root,
        }
    }

    #[test]
    fn relative_root_resolves_against_config_dir() {
        let l = layout();
        let sandbox = Sandbox::new(&l.root, false, &l.config_dir);
        let resolved = sandbox.resolve("data/a.txt").expect("resolved");
        assert!(resolved.ends_with("data/a.txt"));
    }

    #[test]
    fn absolute_root_resolves_against_root() {
        let l = layout();
        let sandbox = Sandbox::new(&l.root, true, &l.config_dir);
        assert!(sandbox.resolve("a.txt").is_some());
        assert!(sandbox.resolve("data/a.txt").is_none());
    }

    #[test]
    fn dot_dot_traversal_is_denied() {
        let l = layout();
        let sandbox = Sandbox::new(&l.root, true, &l.config_dir);
        assert!(sandbox.resolve("../secret.txt").is_none());
    }

    #[test]
    fn absolute_path_outside_root_is_denied() {
        let l = layout();
        let sandbox = Sandbox::new(&l.root, true, &l.config_dir);
        let outside = l.config_dir.join("secret.txt");
        assert!(sandbox.resolve(outside.to_str().expect("utf8")).is_none());
        let inside = l.root.join("a.txt");
        assert!(sandbox.resolve(inside.to_str().expect("utf8")).is_some());
    }

    #[test]
    fn sibling_with_shared_prefix_is_denied() {
        let l = layout();
        let sandbox = Sandbox::new(&l.root, true, &l.config_dir);
        assert!(sandbox.resolve("../data2/b.txt").is_none());
    }

    #[test]
    fn missing_file_and_directories_resolve_to_none() {
        let l = layout();
        let sandbox = Sandbox::new(&l.config_dir, false, &l.config_dir);
        assert!(sandbox.resolve("missing.txt").is_none());
        assert!(sandbox.resolve("data").is_none());
    }
}
