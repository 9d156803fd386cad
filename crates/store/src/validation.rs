use std::path::{Component, Path};

use crate::StoreError;

/// Longest accepted declared file name, in bytes.
const MAX_NAME_LEN: usize = 200;

/// Validates a client-declared file name.
///
/// The name ends up in `{artifact_dir}/{file_id}-{name}`, so it must be a
/// single plain path component. Rejects:
/// - Empty names and names longer than 200 bytes
/// - Anything containing `/`, `\` or NUL
/// - `.` and `..`
/// - Absolute paths and Windows prefixes (`C:`)
pub fn validate_file_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("empty name".into()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidName(format!(
            "name longer than {MAX_NAME_LEN} bytes"
        )));
    }

    if name.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) | (Some(Component::CurDir), _) => Err(
            StoreError::InvalidName(format!("relative directory not allowed: {name}")),
        ),
        (Some(Component::Prefix(_)), _) | (Some(Component::RootDir), _) => Err(
            StoreError::InvalidName(format!("absolute path not allowed: {name}")),
        ),
        _ => Err(StoreError::InvalidName(format!(
            "must be a single path component: {name}"
        ))),
    }
}
