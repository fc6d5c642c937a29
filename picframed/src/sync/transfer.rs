use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::remote::RemoteError;

const PARTIAL_SUFFIX: &str = "partial";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("remote stream failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Streams `body` into `<target>.partial` and renames it onto `target` once complete.
///
/// On any failure the partial file is removed, so `target` either holds the whole body or
/// does not exist. Returns the number of bytes written.
pub async fn write_atomically<S>(body: S, target: &Path) -> Result<u64, TransferError>
where
    S: Stream<Item = Result<Bytes, RemoteError>> + Unpin,
{
    let partial = partial_path(target);
    match write_partial(body, &partial).await {
        Ok(written) => {
            if let Err(err) = tokio::fs::rename(&partial, target).await {
                discard_partial(&partial).await;
                return Err(err.into());
            }
            Ok(written)
        }
        Err(err) => {
            discard_partial(&partial).await;
            Err(err)
        }
    }
}

async fn write_partial<S>(mut body: S, partial: &Path) -> Result<u64, TransferError>
where
    S: Stream<Item = Result<Bytes, RemoteError>> + Unpin,
{
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn discard_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => debug!(file = %partial.display(), "removed partial download"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            file = %partial.display(),
            error = %err,
            "failed to remove partial download"
        ),
    }
}

pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}{PARTIAL_SUFFIX}",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

pub fn is_partial_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

/// Deletes leftovers of interrupted downloads directly inside `dir`.
pub async fn sweep_partials(dir: &Path) -> io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_partial_path(&path) {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(err) => warn!(
                file = %path.display(),
                error = %err,
                "failed to remove stale partial download"
            ),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;

    fn chunks(
        parts: Vec<Result<&'static [u8], RemoteError>>,
    ) -> impl Stream<Item = Result<Bytes, RemoteError>> + Unpin {
        stream::iter(
            parts
                .into_iter()
                .map(|part| part.map(Bytes::from_static))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn partial_path_keeps_original_extension() {
        assert_eq!(
            partial_path(Path::new("/img/a.jpg")),
            PathBuf::from("/img/a.jpg.partial")
        );
        assert_eq!(
            partial_path(Path::new("/img/noext")),
            PathBuf::from("/img/noext.partial")
        );
        assert!(is_partial_path(Path::new("/img/a.jpg.partial")));
        assert!(!is_partial_path(Path::new("/img/a.jpg")));
    }

    #[tokio::test]
    async fn writes_all_chunks_then_commits() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.png");

        let written = write_atomically(chunks(vec![Ok(b"hel"), Ok(b"lo")]), &target)
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.png");

        let err = write_atomically(
            chunks(vec![
                Ok(b"hel"),
                Err(RemoteError::Interrupted("connection reset".into())),
            ]),
            &target,
        )
        .await
        .expect_err("expected interrupted transfer");

        assert!(matches!(err, TransferError::Remote(_)));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn sweep_removes_only_partials() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.jpg.partial"), b"x").unwrap();

        assert_eq!(sweep_partials(dir.path()).await.unwrap(), 1);
        assert!(dir.path().join("a.jpg").exists());
        assert!(!dir.path().join("b.jpg.partial").exists());
    }
}
