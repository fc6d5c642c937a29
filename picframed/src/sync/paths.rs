use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("remote name is empty")]
    Empty,
    #[error("remote name `{0}` is not a plain file name")]
    UnsupportedComponent(String),
}

/// Maps a remote file name to a path directly inside `images_dir`.
///
/// Drive names may contain `/`; anything that is not exactly one normal path component is
/// rejected rather than creating directories or escaping the images directory.
pub fn local_path_for(images_dir: &Path, remote_name: &str) -> Result<PathBuf, PathError> {
    if remote_name.trim().is_empty() {
        return Err(PathError::Empty);
    }

    let mut components = Path::new(remote_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(images_dir.join(part)),
        _ => Err(PathError::UnsupportedComponent(remote_name.to_string())),
    }
}
