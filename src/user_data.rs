//! Cloud-init user-data resolution.
//!
//! User data can be given inline in the template or as a path to a file.
//! The two sources are mutually exclusive; the returned payload is passed to
//! the provider untouched.

use thiserror::Error;

use crate::paths::{expand_tilde, read_to_string_ambient};

/// Errors raised while resolving user data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum UserDataError {
    /// Both `user_data` and `user_data_file` were set.
    #[error("only one of user_data or user_data_file can be specified")]
    BothProvided,
    /// The file path is empty or only whitespace.
    #[error("user_data_file must not be empty")]
    FilePathEmpty,
    /// Reading the file failed.
    #[error("problem reading user data file {path}: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Resolves user data from an inline value or a file.
///
/// Empty inline payloads are treated as absent.
///
/// # Errors
///
/// Returns [`UserDataError`] when both sources are present or the file cannot
/// be read.
pub fn resolve_user_data(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, UserDataError> {
    if inline.is_some() && file.is_some() {
        return Err(UserDataError::BothProvided);
    }

    if let Some(payload) = inline {
        return Ok(Some(payload.to_owned()).filter(|text| !text.is_empty()));
    }

    let Some(path) = file else {
        return Ok(None);
    };

    if path.trim().is_empty() {
        return Err(UserDataError::FilePathEmpty);
    }

    let expanded = expand_tilde(path);
    read_to_string_ambient(&expanded)
        .map(Some)
        .map_err(|message| UserDataError::FileRead {
            path: expanded,
            message,
        })
}
