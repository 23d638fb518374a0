use crate::error::{ErrorKind, Result, explain};
use crate::scan::Scanner;
use exn::OptionExt;
use lectern_catalog::{LibraryItem, NewItem};
use lectern_codec::{DocumentFormat, Metadata};
use lectern_storage::{ContentIdentity, DiscoveredFile, Signature};
use std::collections::BTreeSet;
use std::path::Path;

/// What scanning a single file did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Path and signature match the catalog; the file was not even read.
    Unchanged,
    /// Same content at the same path, only the signature moved on (the file
    /// was touched). The stored signature was refreshed.
    Refreshed,
    /// Identical to an item that still exists at its recorded path. Nothing
    /// was stored.
    Duplicate,
    /// Known content whose recorded path is gone: the item now points here.
    Moved,
    /// New content, added to the catalog.
    Added,
    /// The content at a known path changed; the old item was replaced.
    Replaced,
}

impl FileOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Added | Self::Replaced)
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Moved)
    }
}

/// Metadata and page count pulled out of a document by its codec.
struct Decoded {
    metadata: Metadata,
    pages: usize,
}

impl Scanner {
    /// Bring the catalog up to date with one file.
    ///
    /// The layers, cheapest first:
    /// 1. **Path + signature match**: nothing to do, no I/O.
    /// 2. **Identity match**: the content is known; refresh, relocate, or
    ///    ignore a duplicate copy.
    /// 3. **Unknown identity**: decode and insert, replacing whatever was
    ///    previously recorded at this path.
    ///
    /// Nothing is written unless every step before the write succeeded, so a
    /// failing file leaves the catalog as it was.
    pub(crate) async fn scan_file(&self, file: DiscoveredFile) -> Result<FileOutcome> {
        let DiscoveredFile { path, signature } = file;
        if let Some(item) = self.find_by_path(&path).await?
            && item.signature == signature
        {
            return Ok(FileOutcome::Unchanged);
        }

        let bytes = lectern_storage::read(&path).await.map_err(explain(ErrorKind::Unreadable))?;
        let identity = lectern_storage::identify(&bytes);
        // Everything from here on reads and writes state keyed by this
        // identity; concurrent scans of the same content take turns.
        let _guard = self.locks.lock(&identity).await;

        let at_path = self.find_by_path(&path).await?;
        if let Some(known) = self.find_by_identity(&identity).await? {
            return self.reconcile(known, at_path, &path, signature).await;
        }

        let format = DocumentFormat::from_path(&path)
            .ok_or_raise(|| ErrorKind::Decode(format!("unrecognised file type: {}", path.display())))?;
        let decoded = self.decode(format, bytes).await?;
        let new = new_item(&path, format, identity, signature, decoded);
        match at_path {
            Some(stale) => {
                tracing::info!(path = %path.display(), "File content has changed on disk; replacing catalog entry");
                self.catalog.replace(&stale.id, new).await.map_err(explain(ErrorKind::Catalog))?;
                Ok(FileOutcome::Replaced)
            },
            None => {
                self.catalog.insert(new).await.map_err(explain(ErrorKind::Catalog))?;
                Ok(FileOutcome::Added)
            },
        }
    }

    /// The content is already catalogued as `known`.
    async fn reconcile(
        &self,
        known: LibraryItem,
        at_path: Option<LibraryItem>,
        path: &Path,
        signature: Signature,
    ) -> Result<FileOutcome> {
        if known.path == path {
            if known.signature == signature {
                return Ok(FileOutcome::Unchanged);
            }
            self.catalog
                .update_location(&known.id, path, signature)
                .await
                .map_err(explain(ErrorKind::Catalog))?;
            return Ok(FileOutcome::Refreshed);
        }
        // A copy, unless the recorded file has gone or been rewritten.
        if self.still_holds(&known).await? {
            tracing::debug!(path = %path.display(), original = %known.path.display(), "Skipping duplicate copy");
            return Ok(FileOutcome::Duplicate);
        }
        match at_path {
            // Different content was recorded here; this path now belongs to
            // the moved item.
            Some(stale) => self.catalog.relocate(&known.id, &stale.id, path, signature).await,
            None => self.catalog.update_location(&known.id, path, signature).await,
        }
        .map_err(explain(ErrorKind::Catalog))?;
        tracing::info!(from = %known.path.display(), to = %path.display(), "Detected moved file");
        Ok(FileOutcome::Moved)
    }

    /// Whether `known`'s recorded path still holds its content. A file that
    /// was only touched counts, and gets its signature refreshed.
    async fn still_holds(&self, known: &LibraryItem) -> Result<bool> {
        let Ok(current) = lectern_storage::fast_signature(&known.path).await else {
            return Ok(false);
        };
        if current == known.signature {
            return Ok(true);
        }
        let Ok(bytes) = lectern_storage::read(&known.path).await else {
            return Ok(false);
        };
        if lectern_storage::identify(&bytes) != known.content_hash {
            return Ok(false);
        }
        self.catalog
            .update_location(&known.id, &known.path, current)
            .await
            .map_err(explain(ErrorKind::Catalog))?;
        Ok(true)
    }

    async fn decode(&self, format: DocumentFormat, bytes: Vec<u8>) -> Result<Decoded> {
        let codecs = self.codecs.clone();
        let task = tokio::task::spawn_blocking(move || {
            let handle = codecs.open(format, bytes)?;
            Ok::<_, lectern_codec::error::Error>(Decoded { metadata: handle.metadata(), pages: handle.page_count() })
        });
        match tokio::time::timeout(self.decode_timeout, task).await {
            Ok(Ok(decoded)) => decoded.map_err(explain(ErrorKind::Decode)),
            Ok(Err(join)) => exn::bail!(ErrorKind::Decode(format!("decoder crashed: {join}"))),
            Err(_) => exn::bail!(ErrorKind::Timeout(self.decode_timeout)),
        }
    }

    async fn find_by_path(&self, path: &Path) -> Result<Option<LibraryItem>> {
        self.catalog.find_by_path(path).await.map_err(explain(ErrorKind::Catalog))
    }

    async fn find_by_identity(&self, identity: &ContentIdentity) -> Result<Option<LibraryItem>> {
        self.catalog.find_by_identity(identity).await.map_err(explain(ErrorKind::Catalog))
    }
}

fn new_item(path: &Path, format: DocumentFormat, identity: ContentIdentity, signature: Signature, decoded: Decoded) -> NewItem {
    let Decoded { metadata, pages } = decoded;
    let title = metadata
        .title
        .filter(|title| !title.trim().is_empty())
        .or_else(|| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| path.display().to_string());
    NewItem {
        path: path.to_path_buf(),
        title,
        author: metadata.author,
        file_type: format,
        content_hash: identity,
        signature,
        page_count: Some(pages),
        tags: BTreeSet::new(),
    }
}
