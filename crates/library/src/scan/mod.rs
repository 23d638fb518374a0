mod file;

pub use self::file::FileOutcome;
use crate::locks::KeyedLocks;
use futures::StreamExt;
use lectern_catalog::Catalog;
use lectern_codec::Codecs;
use lectern_storage::{ContentIdentity, DiscoveredFile};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::Duration;
use tracing::instrument;

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary of one scan. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Files of a supported type that were visited, including failures.
    pub total: usize,
    pub new: usize,
    pub updated: usize,
    /// `"<path>: <reason>"`, in the order the files were discovered.
    pub errors: Vec<String>,
}

impl ScanReport {
    fn record(&mut self, outcome: FileOutcome) {
        self.new += usize::from(outcome.is_new());
        self.updated += usize::from(outcome.is_updated());
    }

    fn fail(&mut self, path: &Path, reason: impl std::fmt::Display) {
        tracing::warn!(path = %path.display(), %reason, "Failed to scan file");
        self.errors.push(format!("{}: {reason}", path.display()));
    }
}

/// Walks directories and keeps the [`Catalog`] in step with what is on disk.
///
/// A single `Scanner` may run any number of scans at once, including over
/// overlapping directories.
pub struct Scanner {
    catalog: Catalog,
    codecs: Codecs,
    concurrency: usize,
    decode_timeout: Duration,
    locks: KeyedLocks<ContentIdentity>,
}

impl Scanner {
    pub fn new(catalog: Catalog, codecs: Codecs) -> Self {
        Self {
            catalog,
            codecs,
            concurrency: DEFAULT_CONCURRENCY,
            decode_timeout: DEFAULT_DECODE_TIMEOUT,
            locks: KeyedLocks::new(),
        }
    }

    /// Files decoded at the same time within one scan (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_decode_timeout(mut self, timeout: Duration) -> Self {
        self.decode_timeout = timeout;
        self
    }

    /// Scan every directory in `roots`.
    ///
    /// Only files whose type has a registered codec are considered. Failures
    /// affecting a single file (or a single root) end up in
    /// [`ScanReport::errors`]; they never stop the scan.
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub async fn scan(&self, roots: &[PathBuf]) -> ScanReport {
        let mut report = ScanReport::default();
        for root in roots {
            match tokio::fs::canonicalize(root).await {
                Ok(root) => self.scan_root(&root, &mut report).await,
                Err(err) => report.fail(root, err),
            }
        }
        tracing::info!(
            total = report.total,
            new = report.new,
            updated = report.updated,
            errors = report.errors.len(),
            "Scan complete"
        );
        report
    }

    async fn scan_root(&self, root: &Path, report: &mut ScanReport) {
        let accept = |path: &Path| self.codecs.recognise(path).is_some();
        // `buffered` keeps results in discovery order while up to
        // `concurrency` files are in flight.
        let results = lectern_storage::walk(root, accept)
            .map(|entry| async move {
                match entry {
                    Ok(file) => {
                        let path = file.path.clone();
                        (Some(path), self.scan_discovered(file).await)
                    },
                    Err(err) => (None, Err((*err).to_string())),
                }
            })
            .buffered(self.concurrency);
        let mut results = pin!(results);
        while let Some((path, result)) = results.next().await {
            match (path, result) {
                (Some(_), Ok(outcome)) => {
                    report.total += 1;
                    report.record(outcome);
                },
                (Some(path), Err(reason)) => {
                    report.total += 1;
                    report.fail(&path, reason);
                },
                // Directory-level failures name their own path.
                (None, Err(reason)) => {
                    tracing::warn!(root = %root.display(), %reason, "Failed to read directory");
                    report.errors.push(reason);
                },
                (None, Ok(_)) => {},
            }
        }
    }

    async fn scan_discovered(&self, file: DiscoveredFile) -> Result<FileOutcome, String> {
        let path = file.path.clone();
        match self.scan_file(file).await {
            Ok(outcome) => {
                tracing::debug!(path = %path.display(), ?outcome, "Scanned file");
                Ok(outcome)
            },
            Err(err) => Err((*err).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_catalog::{Database, ItemFilter};
    use std::fs;
    use tempfile::TempDir;

    async fn scanner() -> (Scanner, Catalog) {
        let db = Database::connect_in_memory().await.unwrap();
        let catalog = Catalog::from(&db);
        (Scanner::new(catalog.clone(), Codecs::builtin()).with_concurrency(4), catalog)
    }

    fn library(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        dir
    }

    fn report(total: usize, new: usize, updated: usize) -> ScanReport {
        ScanReport { total, new, updated, errors: Vec::new() }
    }

    #[tokio::test]
    async fn empty_directory() {
        let (scanner, _) = scanner().await;
        let dir = library(&[]);
        assert_eq!(scanner.scan(&[dir.path().to_path_buf()]).await, report(0, 0, 0));
    }

    #[tokio::test]
    async fn new_files_are_catalogued_with_metadata() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[
            ("moby.txt", "Moby Dick\nAuthor: Herman Melville\n\x0cCall me Ishmael."),
            ("notes/plan.md", "# Plan\n\n- read more"),
            ("cover.png", "PNG"),
            ("book.pdf", "%PDF-1.7"),
        ]);
        let scanned = scanner.scan(&[dir.path().to_path_buf()]).await;
        assert_eq!(scanned, report(2, 2, 0));

        let items = catalog.query(&ItemFilter::default()).await.unwrap();
        let moby = items.iter().find(|i| i.title == "Moby Dick").unwrap();
        assert_eq!(moby.author.as_deref(), Some("Herman Melville"));
        assert_eq!(moby.page_count, Some(2));
        assert!(items.iter().any(|i| i.title == "Plan"));
    }

    #[tokio::test]
    async fn rescanning_is_idempotent() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("a.txt", "alpha"), ("b/c.txt", "gamma")]);
        let roots = [dir.path().to_path_buf()];
        assert_eq!(scanner.scan(&roots).await, report(2, 2, 0));
        let before = catalog.query(&ItemFilter::default()).await.unwrap();
        assert_eq!(scanner.scan(&roots).await, report(2, 0, 0));
        assert_eq!(catalog.query(&ItemFilter::default()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn identical_copies_share_one_item() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("one.txt", "same bytes"), ("two.txt", "same bytes")]);
        let roots = [dir.path().to_path_buf()];
        assert_eq!(scanner.scan(&roots).await, report(2, 1, 0));
        assert_eq!(catalog.count().await.unwrap(), 1);
        assert_eq!(scanner.scan(&roots).await, report(2, 0, 0));
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn moving_a_file_updates_its_path() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("old.txt", "wandering text")]);
        let roots = [dir.path().to_path_buf()];
        scanner.scan(&roots).await;
        let original = catalog.query(&ItemFilter::default()).await.unwrap().remove(0);

        fs::create_dir(dir.path().join("archive")).unwrap();
        fs::rename(dir.path().join("old.txt"), dir.path().join("archive/new.txt")).unwrap();
        assert_eq!(scanner.scan(&roots).await, report(1, 0, 1));

        let moved = catalog.require(&original.id).await.unwrap();
        assert!(moved.path.ends_with("archive/new.txt"));
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn moving_onto_a_stale_path_takes_it_over() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("a.txt", "alpha text"), ("b.txt", "beta text")]);
        let roots = [dir.path().to_path_buf()];
        scanner.scan(&roots).await;
        let alpha = catalog.find_by_identity(&lectern_storage::identify(b"alpha text")).await.unwrap().unwrap();

        fs::remove_file(dir.path().join("b.txt")).unwrap();
        fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt")).unwrap();
        assert_eq!(scanner.scan(&roots).await, report(1, 0, 1));
        assert_eq!(catalog.count().await.unwrap(), 1);
        assert!(catalog.require(&alpha.id).await.unwrap().path.ends_with("b.txt"));
    }

    #[tokio::test]
    async fn copy_of_a_touched_original_is_still_a_duplicate() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("a.txt", "original text")]);
        scanner.scan(&[dir.path().to_path_buf()]).await;
        let original = catalog.query(&ItemFilter::default()).await.unwrap().remove(0);

        let file = fs::File::options().write(true).open(dir.path().join("a.txt")).unwrap();
        file.set_modified(std::time::SystemTime::now() + Duration::from_secs(60)).unwrap();
        drop(file);
        let copies = dir.path().join("copies");
        fs::create_dir(&copies).unwrap();
        fs::write(copies.join("a.txt"), "original text").unwrap();

        // Only the copy is scanned, so it is seen before the touched original.
        assert_eq!(scanner.scan(&[copies]).await, report(1, 0, 0));
        let item = catalog.require(&original.id).await.unwrap();
        assert_eq!(item.path, original.path);
        assert_eq!(item.signature, lectern_storage::fast_signature(&original.path).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_file_is_reported_and_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let (scanner, catalog) = scanner().await;
        let dir = library(&[("fine.txt", "fine"), ("locked.txt", "secret")]);
        let locked = dir.path().join("locked.txt");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running with privileges that ignore file modes.
            return;
        }
        let scanned = scanner.scan(&[dir.path().to_path_buf()]).await;
        assert_eq!((scanned.total, scanned.new), (2, 1));
        assert_eq!(scanned.errors.len(), 1);
        assert!(scanned.errors[0].contains("locked.txt"), "{}", scanned.errors[0]);
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn changed_content_replaces_the_item() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("draft.txt", "first draft")]);
        let roots = [dir.path().to_path_buf()];
        scanner.scan(&roots).await;
        fs::write(dir.path().join("draft.txt"), b"second draft, longer").unwrap();
        assert_eq!(scanner.scan(&roots).await, report(1, 1, 0));
        let items = catalog.query(&ItemFilter::default()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content_hash, lectern_storage::identify(b"second draft, longer"));
    }

    #[tokio::test]
    async fn touched_file_is_refreshed_silently() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("same.txt", "unchanged")]);
        let roots = [dir.path().to_path_buf()];
        scanner.scan(&roots).await;
        let path = dir.path().join("same.txt");
        let file = fs::File::options().write(true).open(&path).unwrap();
        let later = std::time::SystemTime::now() + Duration::from_secs(60);
        file.set_modified(later).unwrap();
        drop(file);

        assert_eq!(scanner.scan(&roots).await, report(1, 0, 0));
        let item = catalog.query(&ItemFilter::default()).await.unwrap().remove(0);
        assert_eq!(item.signature, lectern_storage::fast_signature(&path).await.unwrap());
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_and_skipped() {
        let (scanner, catalog) = scanner().await;
        let dir = library(&[("fine.txt", "fine")]);
        fs::write(dir.path().join("broken.txt"), [0xff, 0xfe, 0xfd]).unwrap();
        let scanned = scanner.scan(&[dir.path().to_path_buf()]).await;
        assert_eq!((scanned.total, scanned.new, scanned.updated), (2, 1, 0));
        assert_eq!(scanned.errors.len(), 1);
        let broken = fs::canonicalize(dir.path().join("broken.txt")).unwrap();
        assert!(scanned.errors[0].starts_with(&format!("{}: ", broken.display())), "{}", scanned.errors[0]);
        assert!(scanned.errors[0].contains("UTF-8"));
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_root_is_one_error() {
        let (scanner, _) = scanner().await;
        let dir = library(&[("a.txt", "a")]);
        let missing = dir.path().join("missing");
        let scanned = scanner.scan(&[missing.clone(), dir.path().to_path_buf()]).await;
        assert_eq!((scanned.total, scanned.new), (1, 1));
        assert_eq!(scanned.errors.len(), 1);
        assert!(scanned.errors[0].starts_with(&missing.display().to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overlapping_scans_do_not_duplicate() {
        let (scanner, catalog) = scanner().await;
        let files: Vec<(String, String)> =
            (0..20).map(|n| (format!("doc{n:02}.txt"), format!("document number {n}"))).collect();
        let borrowed: Vec<(&str, &str)> = files.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
        let dir = library(&borrowed);
        let roots = [dir.path().to_path_buf()];
        let (a, b) = tokio::join!(scanner.scan(&roots), scanner.scan(&roots));
        assert!(a.errors.is_empty() && b.errors.is_empty(), "{a:?} {b:?}");
        assert_eq!(a.new + b.new, 20);
        assert_eq!(catalog.count().await.unwrap(), 20);
    }
}
