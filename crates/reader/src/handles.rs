//! Open document handles, shared by every session on the same content.

use lectern_codec::DocumentHandle;
use lectern_storage::ContentIdentity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A decoded document and its page count.
#[derive(Clone)]
pub(crate) struct OpenDocument {
    pub(crate) handle: Arc<dyn DocumentHandle>,
    pub(crate) pages: usize,
}

struct Pooled {
    document: OpenDocument,
    sessions: usize,
}

/// Reference counts handles per content identity. The handle is dropped
/// from the pool when the last session using it lets go; operations still
/// running keep their own `Arc` until they finish.
#[derive(Default)]
pub(crate) struct HandlePool {
    handles: Mutex<HashMap<ContentIdentity, Pooled>>,
}

impl HandlePool {
    /// The pooled handle for `identity`, counting one more user.
    pub(crate) fn acquire(&self, identity: &ContentIdentity) -> Option<OpenDocument> {
        let mut handles = self.handles.lock();
        let pooled = handles.get_mut(identity)?;
        pooled.sessions += 1;
        Some(pooled.document.clone())
    }

    /// Pool a freshly opened document. If another session got there first,
    /// its handle wins and `document` is dropped.
    pub(crate) fn insert(&self, identity: ContentIdentity, document: OpenDocument) -> OpenDocument {
        let mut handles = self.handles.lock();
        let pooled = handles.entry(identity).or_insert(Pooled { document, sessions: 0 });
        pooled.sessions += 1;
        pooled.document.clone()
    }

    /// One user fewer. Returns `true` if that closed the handle.
    pub(crate) fn release(&self, identity: &ContentIdentity) -> bool {
        let mut handles = self.handles.lock();
        let Some(pooled) = handles.get_mut(identity) else {
            return false;
        };
        pooled.sessions = pooled.sessions.saturating_sub(1);
        if pooled.sessions > 0 {
            return false;
        }
        handles.remove(identity);
        tracing::debug!(hash = %identity, "Closed document handle");
        true
    }

    pub(crate) fn clear(&self) {
        self.handles.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.lock().len()
    }
}
