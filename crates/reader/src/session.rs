use crate::cache::{CacheStats, RenderCache, RenderKey, RenderedPage};
use crate::error::{ErrorKind, Result, explain};
use crate::handles::{HandlePool, OpenDocument};
use crate::search::{SearchIndex, SearchIndexes, SearchMatch};
use exn::OptionExt;
use lectern_catalog::{Catalog, LibraryItem};
use lectern_codec::{Codecs, DocumentFormat, DocumentHandle};
use lectern_storage::ContentIdentity;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Sessions untouched for longer than this are closed.
    pub idle_timeout: Duration,
    pub render_timeout: Duration,
    /// Applies to opening a document and to building its search index.
    pub decode_timeout: Duration,
    pub default_scale: f32,
    /// Pixel bytes the render cache may hold.
    pub render_budget_bytes: usize,
    /// Search indexes kept in memory.
    pub max_indexes: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(900),
            render_timeout: Duration::from_secs(30),
            decode_timeout: Duration::from_secs(30),
            default_scale: 1.0,
            render_budget_bytes: 256 * 1024 * 1024,
            max_indexes: 32,
        }
    }
}

/// A point-in-time view of a reading session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderSession {
    pub session_id: String,
    pub document_id: String,
    /// 1-based.
    pub current_page: usize,
    pub total_pages: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
}

struct Activity {
    current_page: usize,
    at: Instant,
    wall: OffsetDateTime,
}

impl Activity {
    fn now(current_page: usize) -> Self {
        Self { current_page, at: Instant::now(), wall: OffsetDateTime::now_utc() }
    }
}

struct Session {
    id: String,
    document_id: String,
    content_hash: ContentIdentity,
    total_pages: usize,
    handle: Arc<dyn DocumentHandle>,
    activity: Mutex<Activity>,
    /// Requests currently using the session. Idle eviction waits for zero.
    in_flight: AtomicUsize,
}

impl Session {
    fn is_idle(&self, timeout: Duration) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && self.activity.lock().at.elapsed() > timeout
    }

    fn touch(&self) {
        let mut activity = self.activity.lock();
        activity.at = Instant::now();
        activity.wall = OffsetDateTime::now_utc();
    }

    fn check_page(&self, page: usize) -> Result<()> {
        if page == 0 || page > self.total_pages {
            exn::bail!(ErrorKind::InvalidPage { page, total: self.total_pages });
        }
        Ok(())
    }

    fn snapshot(&self) -> ReaderSession {
        let activity = self.activity.lock();
        ReaderSession {
            session_id: self.id.clone(),
            document_id: self.document_id.clone(),
            current_page: activity.current_page,
            total_pages: self.total_pages,
            last_activity: activity.wall,
        }
    }
}

/// A session held by a running request. Dropping it records the activity
/// and lets the sweeper consider the session again.
struct InUse(Arc<Session>);

impl Deref for InUse {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.0
    }
}

impl Drop for InUse {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns every reading session, the document handles behind them, the render
/// cache and the search indexes.
///
/// Rendered pages and search indexes are keyed by content identity, so all
/// sessions on the same content share them.
pub struct SessionManager {
    catalog: Catalog,
    codecs: Codecs,
    options: ReaderOptions,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    handles: HandlePool,
    cache: RenderCache,
    indexes: SearchIndexes,
}

impl SessionManager {
    pub fn new(catalog: Catalog, codecs: Codecs, options: ReaderOptions) -> Self {
        Self {
            cache: RenderCache::new(options.render_budget_bytes),
            indexes: SearchIndexes::new(options.max_indexes),
            handles: HandlePool::default(),
            sessions: RwLock::new(HashMap::new()),
            catalog,
            codecs,
            options,
        }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Open a new session on the library item `document_id`, at page 1.
    ///
    /// Fails with [`ErrorKind::NotFound`] for unknown ids, [`ErrorKind::Io`]
    /// when the item's file can no longer be read, and
    /// [`ErrorKind::DecodeFailure`] when the codec rejects its contents.
    #[instrument(skip(self))]
    pub async fn open(&self, document_id: &str) -> Result<ReaderSession> {
        let item = self
            .catalog
            .get(document_id)
            .await
            .map_err(explain(ErrorKind::Catalog))?
            .ok_or_raise(|| ErrorKind::NotFound(document_id.to_string()))?;
        let (content_hash, document) = self.open_document(&item).await?;

        let total_pages = match item.page_count {
            Some(pages) if content_hash == item.content_hash => pages,
            _ => document.pages,
        };
        if item.page_count.is_none()
            && content_hash == item.content_hash
            && let Err(err) = self.catalog.set_page_count(&item.id, total_pages).await
        {
            tracing::warn!(document = %item.id, error = ?err, "Failed to record page count");
        }

        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            document_id: item.id,
            content_hash,
            total_pages,
            handle: document.handle,
            activity: Mutex::new(Activity::now(1)),
            in_flight: AtomicUsize::new(0),
        });
        let snapshot = session.snapshot();
        self.sessions.write().insert(session.id.clone(), session);
        tracing::info!(session = %snapshot.session_id, pages = total_pages, "Opened reading session");
        Ok(snapshot)
    }

    /// A pooled handle for the item's content, decoding the file if no other
    /// session has it open.
    async fn open_document(&self, item: &LibraryItem) -> Result<(ContentIdentity, OpenDocument)> {
        if let Some(document) = self.handles.acquire(&item.content_hash) {
            return Ok((item.content_hash.clone(), document));
        }
        let bytes = lectern_storage::read(&item.path).await.map_err(explain(ErrorKind::Io))?;
        let identity = lectern_storage::identify(&bytes);
        if identity != item.content_hash {
            tracing::warn!(
                document = %item.id,
                path = %item.path.display(),
                "Document changed on disk since it was scanned; opening the current content"
            );
            if let Some(document) = self.handles.acquire(&identity) {
                return Ok((identity, document));
            }
        }
        let document = self.decode(item.file_type, bytes).await?;
        let document = self.handles.insert(identity.clone(), document);
        Ok((identity, document))
    }

    async fn decode(&self, format: DocumentFormat, bytes: Vec<u8>) -> Result<OpenDocument> {
        let codecs = self.codecs.clone();
        let task = tokio::task::spawn_blocking(move || {
            let handle: Arc<dyn DocumentHandle> = Arc::from(codecs.open(format, bytes)?);
            Ok::<_, lectern_codec::error::Error>(OpenDocument { pages: handle.page_count(), handle })
        });
        match tokio::time::timeout(self.options.decode_timeout, task).await {
            Ok(Ok(document)) => document.map_err(explain(ErrorKind::DecodeFailure)),
            Ok(Err(join)) => exn::bail!(ErrorKind::DecodeFailure(format!("decoder crashed: {join}"))),
            Err(_) => exn::bail!(ErrorKind::Timeout(self.options.decode_timeout)),
        }
    }

    /// Mark the session as in use. Sessions past their idle timeout are
    /// closed here even if the sweeper has not reached them yet.
    fn begin(&self, session_id: &str) -> Result<InUse> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(session_id)
            .cloned()
            .ok_or_raise(|| ErrorKind::SessionExpired(session_id.to_string()))?;
        if session.is_idle(self.options.idle_timeout) {
            drop(sessions);
            self.evict(&session);
            exn::bail!(ErrorKind::SessionExpired(session_id.to_string()));
        }
        // Still under the read lock: the sweeper cannot evict in between.
        session.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(InUse(session))
    }

    fn evict(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write();
        let current = sessions.get(&session.id).is_some_and(|current| Arc::ptr_eq(current, session));
        if !current || !session.is_idle(self.options.idle_timeout) {
            return;
        }
        sessions.remove(&session.id);
        drop(sessions);
        self.release(session, "Evicted idle reading session");
    }

    fn release(&self, session: &Session, message: &'static str) {
        let closed = self.handles.release(&session.content_hash);
        tracing::info!(session = %session.id, document = %session.document_id, handle_closed = closed, "{message}");
    }

    /// Render `page` at the configured default scale.
    pub async fn render(&self, session_id: &str, page: usize) -> Result<Arc<RenderedPage>> {
        self.render_at(session_id, page, self.options.default_scale).await
    }

    /// Render `page` at `scale` and make it the session's current page.
    ///
    /// The returned page is immutable and stays valid after it is evicted
    /// from the cache.
    #[instrument(skip(self))]
    pub async fn render_at(&self, session_id: &str, page: usize, scale: f32) -> Result<Arc<RenderedPage>> {
        let session = self.begin(session_id)?;
        session.check_page(page)?;
        session.activity.lock().current_page = page;

        let key = RenderKey::new(session.content_hash.clone(), page, scale);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let scale_percent = key.scale_percent();
        let handle = session.handle.clone();
        let task = tokio::task::spawn_blocking(move || handle.rasterize(page, scale_percent as f32 / 100.0));
        let raster = match tokio::time::timeout(self.options.render_timeout, task).await {
            Ok(Ok(raster)) => raster.map_err(explain(ErrorKind::DecodeFailure))?,
            Ok(Err(join)) => exn::bail!(ErrorKind::DecodeFailure(format!("renderer crashed: {join}"))),
            Err(_) => {
                tracing::warn!(session = %session.id, page, "Render timed out");
                exn::bail!(ErrorKind::Timeout(self.options.render_timeout));
            },
        };
        let rendered = RenderedPage {
            content_hash: session.content_hash.clone(),
            page,
            scale_percent,
            width: raster.width,
            height: raster.height,
            pixels: raster.pixels,
        };
        Ok(self.cache.insert(key, rendered))
    }

    /// Search the session's document. The index is built on first use.
    #[instrument(skip(self))]
    pub async fn search(&self, session_id: &str, query: &str) -> Result<Vec<SearchMatch>> {
        let session = self.begin(session_id)?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let handle = session.handle.clone();
        let timeout = self.options.decode_timeout;
        let index = self.indexes.get_or_build(&session.content_hash, || build_index(handle, timeout)).await?;
        Ok(index.search(query))
    }

    pub fn goto(&self, session_id: &str, page: usize) -> Result<ReaderSession> {
        let session = self.begin(session_id)?;
        session.check_page(page)?;
        session.activity.lock().current_page = page;
        Ok(session.snapshot())
    }

    pub fn session(&self, session_id: &str) -> Result<ReaderSession> {
        Ok(self.begin(session_id)?.snapshot())
    }

    /// Close a session. Unknown or already closed sessions are ignored.
    pub fn close(&self, session_id: &str) {
        let removed = self.sessions.write().remove(session_id);
        if let Some(session) = removed {
            self.release(&session, "Closed reading session");
        }
    }

    /// Close every session that has been idle for too long and is not in use.
    pub fn sweep_idle(&self) -> usize {
        let mut expired = Vec::new();
        self.sessions.write().retain(|_, session| {
            let idle = session.is_idle(self.options.idle_timeout);
            if idle {
                expired.push(session.clone());
            }
            !idle
        });
        for session in &expired {
            self.release(session, "Evicted idle reading session");
        }
        expired.len()
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` until `cancel`
    /// fires. A zero interval is treated as one millisecond.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep_idle();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Idle session sweep");
                        }
                    },
                }
            }
            tracing::debug!("Session sweeper stopped");
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Close every session and drop all cached pages and indexes.
    pub fn shutdown(&self) {
        let closed = self.sessions.write().drain().count();
        self.handles.clear();
        self.cache.clear();
        self.indexes.clear();
        tracing::info!(closed, "Reader shut down");
    }
}

async fn build_index(handle: Arc<dyn DocumentHandle>, timeout: Duration) -> Result<SearchIndex> {
    let task = tokio::task::spawn_blocking(move || {
        let pages = (1..=handle.page_count())
            .map(|page| handle.page_text(page))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok::<_, lectern_codec::error::Error>(SearchIndex::build(pages))
    });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(index)) => index.map_err(explain(ErrorKind::DecodeFailure)),
        Ok(Err(join)) => exn::bail!(ErrorKind::DecodeFailure(format!("indexer crashed: {join}"))),
        Err(_) => exn::bail!(ErrorKind::Timeout(timeout)),
    }
}
