//! Object and part key naming
//!
//! Finished objects are named `<unix-millis>_<fileName>`; the parts of an
//! in-flight upload are `<objectName>.part<index>`. File names that already
//! end in a part suffix are rejected, so the two key spaces never overlap.

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};

/// Separator between an object name and a chunk index
pub const PART_MARKER: &str = ".part";

/// Final object name for a file created at `created_at`
pub fn object_name(created_at: DateTime<Utc>, file_name: &str) -> String {
    format!("{}_{}", created_at.timestamp_millis(), file_name)
}

/// Blob key holding chunk `index` of `object_name`
pub fn part_key(object_name: &str, index: u32) -> String {
    format!("{}{}{}", object_name, PART_MARKER, index)
}

/// Whether `key` names a chunk part rather than a finished object
pub fn is_part_key(key: &str) -> bool {
    match key.rsplit_once(PART_MARKER) {
        Some((stem, digits)) => {
            !stem.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// MIME type recorded on a finished object
pub fn content_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Reduce a client-supplied file name to a safe final path component
pub fn sanitize_file_name(raw: &str) -> Result<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(AppError::validation(format!("invalid fileName: {:?}", raw)));
    }

    if is_part_key(name) {
        return Err(AppError::validation(format!(
            "fileName must not end with a {}<n> suffix: {:?}",
            PART_MARKER, raw
        )));
    }

    Ok(name.to_string())
}
