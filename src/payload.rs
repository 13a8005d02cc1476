//! Payload files: hex read from disk.
//!
//! Long payloads are easier to keep in a file wrapped over several lines, so
//! all whitespace is dropped. Anything else is left for [`crate::encode`] to
//! accept or reject.

use std::fs;
use std::io;
use std::path::Path;

/// Read a payload file, stripping every whitespace character.
pub fn load_payload(path: &Path) -> io::Result<String> {
    let raw = fs::read_to_string(path)?;
    Ok(strip_whitespace(&raw))
}

pub fn strip_whitespace(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}
