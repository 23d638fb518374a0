//! Recursive directory enumeration.

use crate::error::{ErrorKind, Result};
use crate::identity::Signature;
use async_stream::stream;
use futures::Stream;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A regular file found below a walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Absolute path (the root joined with the relative location)
    pub path: PathBuf,
    pub signature: Signature,
}

enum WalkEntry {
    File(DiscoveredFile),
    Descend(PathBuf),
    Skip,
}

/// Stream every regular file below `root` that `accept` agrees to.
///
/// Entries are visited in lexicographic order, depth first, so two walks of
/// an unchanged tree yield the same sequence. Symbolic links are not
/// followed. Errors for individual entries are yielded in place and the walk
/// carries on; a root that is missing or not a directory yields a single
/// error and ends the stream.
pub fn walk<'a, F>(root: &'a Path, accept: F) -> impl Stream<Item = Result<DiscoveredFile>> + Send + 'a
where
    F: Fn(&Path) -> bool + Send + Sync + 'a,
{
    stream! {
        match fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {},
            Ok(_) => {
                yield Err(exn::Exn::from(ErrorKind::NotADirectory(root.to_path_buf())));
                return;
            },
            Err(err) => {
                yield Err(exn::Exn::from(ErrorKind::from_io(err, root)));
                return;
            },
        }

        let mut stack = vec![root.to_path_buf()];
        'dirs: while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::debug!(path = %current.display(), error = %err, "Skipping unreadable directory");
                    yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                    continue 'dirs;
                },
            };
            let mut children = Vec::new();
            'entries: loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => children.push(entry.path()),
                    Ok(None) => break 'entries,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                        break 'entries;
                    },
                }
            }
            children.sort();

            let mut subdirectories = Vec::new();
            for path in children {
                match classify(path, &accept).await {
                    Ok(WalkEntry::File(file)) => yield Ok(file),
                    Ok(WalkEntry::Descend(dir)) => subdirectories.push(dir),
                    Ok(WalkEntry::Skip) => {},
                    Err(e) => {
                        tracing::debug!(error = ?e, "Skipping entry that could not be inspected");
                        yield Err(e);
                    },
                }
            }
            // Popped from the back, so push in reverse to keep sorted order.
            stack.extend(subdirectories.into_iter().rev());
        }
    }
}

async fn classify<F>(path: PathBuf, accept: &F) -> Result<WalkEntry>
where
    F: Fn(&Path) -> bool,
{
    let metadata = fs::symlink_metadata(&path).await.map_err(|e| ErrorKind::from_io(e, &path))?;
    if metadata.is_dir() {
        return Ok(WalkEntry::Descend(path));
    }
    if metadata.is_file() && accept(&path) {
        let signature = Signature::from_metadata(&path, &metadata)?;
        return Ok(WalkEntry::File(DiscoveredFile { path, signature }));
    }
    if metadata.is_symlink() {
        tracing::trace!(path = %path.display(), "Not following symbolic link");
    }
    Ok(WalkEntry::Skip)
}
