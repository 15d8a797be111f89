// crates/core/src/validation.rs
//! Job name sanitizing and validation.

use crate::error::NameError;

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 100;

/// Trim the name and collapse internal whitespace runs to a single space.
pub fn sanitize_job_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validate a job name, returning its sanitized form.
///
/// Accepts 3 to 100 characters from `[A-Za-z0-9 _-]`.
pub fn validate_job_name(name: &str) -> Result<String, NameError> {
    let name = sanitize_job_name(name);
    let len = name.chars().count();

    if len == 0 {
        return Err(NameError::Empty);
    }
    if len < MIN_NAME_LEN {
        return Err(NameError::TooShort { min: MIN_NAME_LEN });
    }
    if len > MAX_NAME_LEN {
        return Err(NameError::TooLong { max: MAX_NAME_LEN });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
    {
        return Err(NameError::InvalidCharacters);
    }

    Ok(name)
}
