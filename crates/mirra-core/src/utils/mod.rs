//! Utility functions and helpers.
//!
//! Common functionality used across multiple mirra crates.

pub mod name;
pub mod path;

// Re-export commonly used utilities
pub use name::{encode_package_name, split_scope, validate_filename, validate_package_name};
pub use path::{is_safe_path, safe_join};
