//! Path utilities.

use std::path::{Component, Path, PathBuf};

/// Get the docvault configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/docvault` if set
/// - `~/.config/docvault` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("docvault"))
}

/// Get the docvault data directory, the default storage root.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("docvault"))
}

/// Get the docvault logs directory.
pub fn logs_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(state_dir) = dirs::state_dir() {
            return Some(state_dir.join("docvault/logs"));
        }
    }

    data_dir().map(|p| p.join("logs"))
}

/// Check if a path is within a base directory.
///
/// Both paths are compared after [`normalize`], so neither has to exist.
pub fn is_within(path: &Path, base: &Path) -> bool {
    normalize(path).starts_with(normalize(base))
}

/// Normalize a path by removing `.` and `..` components.
///
/// Unlike `canonicalize`, this doesn't require the path to exist.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            _ => result.push(component),
        }
    }

    result
}

/// Resolve a path against the current directory and normalize it.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// The final component of a path as an owned string, or the whole path if
/// it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir() {
        if let Some(dir) = data_dir() {
            assert!(dir.ends_with("docvault"));
        }
    }

    #[test]
    fn test_is_within() {
        let base = PathBuf::from("/home/user/vault");
        assert!(is_within(Path::new("/home/user/vault/snapshots/a"), &base));
        assert!(!is_within(Path::new("/home/user/other"), &base));
        assert!(!is_within(Path::new("/home/user/vault/../other"), &base));
    }

    #[test]
    fn test_normalize() {
        let path = Path::new("/home/user/./project/../project/src");
        assert_eq!(normalize(path), PathBuf::from("/home/user/project/src"));
    }

    #[test]
    fn test_absolutize_relative() {
        let abs = absolutize(Path::new("notes/./todo.txt")).unwrap();
        assert!(abs.is_absolute());
        assert!(abs.ends_with("notes/todo.txt"));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new("/tmp/report.docx")), "report.docx");
        assert_eq!(display_name(Path::new("/")), "/");
    }
}
