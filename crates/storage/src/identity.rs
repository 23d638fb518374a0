use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::path::Path;
use time::OffsetDateTime;
use tokio::fs;

/// Length of a hex-encoded BLAKE3 digest.
const HEX_LENGTH: usize = blake3::OUT_LEN * 2;

/// Stable identity of a file's bytes.
///
/// Two files with identical bytes always share an identity, regardless of
/// their name or location. The digest is BLAKE3, stored as lowercase hex so
/// it can be used directly as a database column and a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentIdentity(String);

impl ContentIdentity {
    /// Rebuild an identity previously rendered with [`as_str`](Self::as_str).
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != HEX_LENGTH || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            exn::bail!(ErrorKind::InvalidIdentity(hex));
        }
        Ok(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}
impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl AsRef<str> for ContentIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the identity of some bytes.
pub fn identify(bytes: impl AsRef<[u8]>) -> ContentIdentity {
    ContentIdentity(blake3::hash(bytes.as_ref()).to_hex().to_string())
}

/// Cheap change-detection fingerprint taken from filesystem metadata.
///
/// Equal signatures are treated as "unchanged" without reading the file. A
/// differing signature says nothing about the content; the identity has to
/// be recomputed to find out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl Signature {
    pub fn new(size: u64, modified: OffsetDateTime) -> Self {
        Self { size, modified }
    }

    pub(crate) fn from_metadata(path: &Path, metadata: &Metadata) -> Result<Self> {
        let modified = metadata.modified().map_err(|e| ErrorKind::from_io(e, path))?;
        Ok(Self::new(metadata.len(), modified.into()))
    }
}

/// Read the size and modification time of a file without opening it.
pub async fn fast_signature(path: impl AsRef<Path>) -> Result<Signature> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
    Signature::from_metadata(path, &metadata)
}

/// Read a whole file into memory.
pub async fn read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    Ok(fs::read(path).await.map_err(|e| ErrorKind::from_io(e, path))?)
}
