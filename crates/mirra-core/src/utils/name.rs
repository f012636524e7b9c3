//! Package name helpers.
//!
//! Names are either plain (`jquery`) or scoped (`@jquery/jquery`). Registries
//! address a scoped package as a single URL segment with the separator
//! percent-encoded.

use crate::error::{MirraError, MirraResult};

const MAX_NAME_LENGTH: usize = 214;

/// Split a package name into its scope (without `@`) and bare name
pub fn split_scope(name: &str) -> (Option<&str>, &str) {
    match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, bare)) => (Some(scope), bare),
        None => (None, name),
    }
}

/// Encode a package name as one URL path segment (`@org/pkg` becomes `@org%2fpkg`)
pub fn encode_package_name(name: &str) -> String {
    name.replace('/', "%2f")
}

/// Validate a package name received from a client
pub fn validate_package_name(name: &str) -> MirraResult<()> {
    let invalid = |reason: &str| MirraError::InvalidPackageName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid("name is longer than 214 characters"));
    }

    let segments: Vec<&str> = match split_scope(name) {
        (Some(scope), bare) => vec![scope, bare],
        (None, bare) if bare.starts_with('@') => return Err(invalid("scope without package name")),
        (None, bare) => vec![bare],
    };

    for segment in segments {
        if segment.is_empty() {
            return Err(invalid("empty name segment"));
        }
        if segment.starts_with('.') || segment.starts_with('_') {
            return Err(invalid("segments cannot start with '.' or '_'"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '!' | '*' | '\'' | '(' | ')'))
        {
            return Err(invalid("name contains characters that are not url-safe"));
        }
    }

    Ok(())
}

/// Validate a tarball filename received from a client
pub fn validate_filename(filename: &str) -> MirraResult<()> {
    let invalid = |reason: &str| MirraError::InvalidFilename {
        filename: filename.to_string(),
        reason: reason.to_string(),
    };

    if filename.is_empty() {
        return Err(invalid("filename is empty"));
    }
    if filename.contains(['/', '\\']) {
        return Err(invalid("filename contains a path separator"));
    }
    if filename.starts_with('.') {
        return Err(invalid("filename starts with '.'"));
    }

    Ok(())
}
