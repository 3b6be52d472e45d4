//! Path helpers shared by configuration and user-data loading.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Expands a leading `~/` prefix to the user's home directory.
///
/// Paths are returned unchanged when `HOME` is unset.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Reads a UTF-8 file through a capability handle on its parent directory.
pub(crate) fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let (dir, file) = split_path(path)?;
    let handle = Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| err.to_string())?;
    handle.read_to_string(file).map_err(|err| err.to_string())
}

/// Writes `contents` to a file through a capability handle on its parent.
pub(crate) fn write_ambient(path: &str, contents: &str) -> Result<(), String> {
    let (dir, file) = split_path(path)?;
    let handle = Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| err.to_string())?;
    handle.write(file, contents).map_err(|err| err.to_string())
}

/// Returns `true` when `path` names a regular file, checked through a
/// capability handle on its parent directory.
pub(crate) fn is_file_ambient(path: &str) -> bool {
    let Ok((dir, file)) = split_path(path) else {
        return false;
    };
    Dir::open_ambient_dir(dir, ambient_authority()).is_ok_and(|handle| handle.is_file(file))
}

fn split_path(path: &str) -> Result<(&Utf8Path, &Utf8Path), String> {
    let full = Utf8Path::new(path);
    let file_name = full
        .file_name()
        .ok_or_else(|| format!("path has no file name: {full}"))?;
    let parent = full
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, Utf8Path::new(file_name)))
}
