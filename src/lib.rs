//! Lectern: a local document library engine.
//!
//! [`Engine`] ties the components together and exposes the request surface
//! a front end talks to: scanning directories into the catalog, querying it,
//! opening documents as reading sessions, rendering and searching pages, and
//! managing annotations.
//!
//! The engine is process-wide state with an explicit lifecycle:
//! [`Engine::start`] connects the catalog and starts the idle-session
//! sweeper, [`Engine::shutdown`] stops it, discards every cache and flushes
//! the database. Nothing is reachable through globals.

pub mod error;

use crate::error::{ErrorKind, Result, from_catalog, from_config, from_reader};
use exn::ResultExt;
use lectern_catalog::{AnnotationStore, Catalog, Database};
use lectern_codec::Codecs;
use lectern_library::Scanner;
use lectern_reader::SessionManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub use lectern_catalog::{
    Annotation, AnnotationChanges, AnnotationKind, ItemFilter, LibraryItem, MetadataPatch, NewAnnotation, Rect,
};
pub use lectern_codec::DocumentFormat;
pub use lectern_config::Config;
pub use lectern_library::ScanReport;
pub use lectern_reader::{CacheStats, ReaderOptions, ReaderSession, RenderedPage, SearchMatch};

/// Load the layered configuration: defaults, then `file`, then `LECTERN_*`
/// environment variables.
pub fn load_config(file: Option<&Path>) -> Result<Config> {
    Config::load(file).map_err(from_config)
}

/// How [`Engine::export_annotations`] renders an item's annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

pub struct Engine {
    database: Database,
    catalog: Catalog,
    scanner: Scanner,
    reader: Arc<SessionManager>,
    annotations: AnnotationStore,
    sweeper_cancel: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Engine {
    /// Start an engine with the built-in codecs.
    pub async fn start(config: Config) -> Result<Self> {
        Self::start_with_codecs(config, Codecs::builtin()).await
    }

    #[instrument(skip_all, fields(database = %config.database.display()))]
    pub async fn start_with_codecs(config: Config, codecs: Codecs) -> Result<Self> {
        config.validate().map_err(from_config)?;
        if let Some(parent) = config.database.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .or_raise(|| ErrorKind::IoFailure(format!("cannot create {}", parent.display())))?;
        }
        let database = Database::connect(&config.database).await.map_err(from_catalog)?;
        let catalog = Catalog::from(&database);

        let scanner = Scanner::new(catalog.clone(), codecs.clone())
            .with_concurrency(config.scan.concurrency)
            .with_decode_timeout(config.reader.decode_timeout());
        let options = ReaderOptions {
            idle_timeout: config.reader.idle_timeout(),
            render_timeout: config.reader.render_timeout(),
            decode_timeout: config.reader.decode_timeout(),
            default_scale: config.reader.default_scale,
            render_budget_bytes: config.reader.render_budget_bytes,
            max_indexes: config.reader.max_indexes,
        };
        let reader = Arc::new(SessionManager::new(catalog.clone(), codecs, options));
        let sweeper_cancel = CancellationToken::new();
        let sweeper = reader.clone().spawn_sweeper(config.reader.sweep_interval(), sweeper_cancel.clone());

        tracing::info!("Engine started");
        Ok(Self { annotations: AnnotationStore::from(&database), database, catalog, scanner, reader, sweeper_cancel, sweeper })
    }

    /// Stop the sweeper, close every session, discard caches and flush the
    /// catalog.
    pub async fn shutdown(self) {
        self.sweeper_cancel.cancel();
        if let Err(err) = self.sweeper.await {
            tracing::warn!(error = %err, "Session sweeper did not stop cleanly");
        }
        self.reader.shutdown();
        self.database.close().await;
        tracing::info!("Engine stopped");
    }

    // Library

    pub async fn scan_library(&self, paths: &[PathBuf]) -> ScanReport {
        self.scanner.scan(paths).await
    }

    pub async fn query_library(&self, filter: &ItemFilter) -> Result<Vec<LibraryItem>> {
        self.catalog.query(filter).await.map_err(from_catalog)
    }

    pub async fn get_item(&self, id: &str) -> Result<LibraryItem> {
        self.catalog.require(id).await.map_err(from_catalog)
    }

    pub async fn update_item(&self, id: &str, patch: MetadataPatch) -> Result<LibraryItem> {
        self.catalog.update_metadata(id, patch).await.map_err(from_catalog)
    }

    /// Remove an item from the catalog. Its annotations are kept.
    pub async fn remove_item(&self, id: &str) -> Result<LibraryItem> {
        self.catalog.remove(id).await.map_err(from_catalog)
    }

    // Reading

    pub async fn open_document(&self, id: &str) -> Result<ReaderSession> {
        self.reader.open(id).await.map_err(from_reader)
    }

    pub async fn render_page(&self, session_id: &str, page: usize) -> Result<Arc<RenderedPage>> {
        self.reader.render(session_id, page).await.map_err(from_reader)
    }

    pub async fn render_page_at(&self, session_id: &str, page: usize, scale: f32) -> Result<Arc<RenderedPage>> {
        self.reader.render_at(session_id, page, scale).await.map_err(from_reader)
    }

    pub async fn search_document(&self, session_id: &str, query: &str) -> Result<Vec<SearchMatch>> {
        self.reader.search(session_id, query).await.map_err(from_reader)
    }

    pub fn goto_page(&self, session_id: &str, page: usize) -> Result<ReaderSession> {
        self.reader.goto(session_id, page).map_err(from_reader)
    }

    pub fn session(&self, session_id: &str) -> Result<ReaderSession> {
        self.reader.session(session_id).map_err(from_reader)
    }

    /// Idempotent.
    pub fn close_document(&self, session_id: &str) {
        self.reader.close(session_id);
    }

    /// Evict idle sessions now instead of waiting for the sweeper.
    pub fn sweep_idle_sessions(&self) -> usize {
        self.reader.sweep_idle()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.reader.cache_stats()
    }

    // Annotations

    pub async fn list_annotations(&self, item_id: &str) -> Result<Vec<Annotation>> {
        self.annotations.list(item_id).await.map_err(from_catalog)
    }

    pub async fn get_annotation(&self, id: &str) -> Result<Annotation> {
        self.annotations
            .get(id)
            .await
            .map_err(from_catalog)?
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(id.to_string())))
    }

    pub async fn create_annotation(&self, new: NewAnnotation) -> Result<Annotation> {
        self.annotations.create(new).await.map_err(from_catalog)
    }

    pub async fn update_annotation(&self, id: &str, changes: AnnotationChanges) -> Result<Annotation> {
        self.annotations.update(id, changes).await.map_err(from_catalog)
    }

    pub async fn delete_annotation(&self, id: &str) -> Result<()> {
        self.annotations.delete(id).await.map_err(from_catalog)
    }

    /// Export an item's annotations. Annotations of removed items can still
    /// be exported; the Markdown heading then falls back to the item id.
    pub async fn export_annotations(&self, item_id: &str, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => self.annotations.export_json(item_id).await.map_err(from_catalog),
            ExportFormat::Markdown => {
                let item = self.catalog.get(item_id).await.map_err(from_catalog)?;
                let title = item.map_or_else(|| item_id.to_string(), |item| item.title);
                self.annotations.export_markdown(item_id, &title).await.map_err(from_catalog)
            },
        }
    }
}
