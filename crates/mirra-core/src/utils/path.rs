//! Path utilities for safe file system operations.
//!
//! Storage keys are derived from client-supplied names, so every join into
//! the storage root goes through [`safe_join`].

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::error::{MirraError, MirraResult};

/// Check if a path is safe (relative, no directory traversal)
pub fn is_safe_path(path: &Utf8Path) -> bool {
    if path.is_absolute() {
        return false;
    }

    // Track depth to detect escaping
    let mut depth = 0i32;

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {},
            Utf8Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            },
            Utf8Component::Normal(_) => {
                depth += 1;
            },
            // Root and prefix components are never safe in relative paths
            _ => return false,
        }
    }

    true
}

/// Safely join paths, preventing directory traversal
pub fn safe_join(base: &Utf8Path, relative: impl AsRef<Utf8Path>) -> MirraResult<Utf8PathBuf> {
    let relative = relative.as_ref();
    if !is_safe_path(relative) || relative.components().any(|c| c == Utf8Component::ParentDir) {
        return Err(MirraError::io(
            format!("Refusing to access '{}' outside of {}", relative, base),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "unsafe path"),
        ));
    }
    Ok(base.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_safe_path() {
        assert!(is_safe_path(Utf8Path::new("jquery/package.json")));
        assert!(is_safe_path(Utf8Path::new("./@jquery/jquery")));
        assert!(!is_safe_path(Utf8Path::new("../../../etc/passwd")));
        assert!(!is_safe_path(Utf8Path::new("/absolute/path")));
    }

    #[test]
    fn test_safe_join() {
        let base = Utf8Path::new("/var/lib/mirra");

        // Safe path
        let result = safe_join(base, "@jquery/jquery/package.json").unwrap();
        assert_eq!(result, Utf8Path::new("/var/lib/mirra/@jquery/jquery/package.json"));

        // Unsafe paths
        assert!(safe_join(base, "../../../etc/passwd").is_err());
        assert!(safe_join(base, "jquery/../../secret").is_err());
    }
}
