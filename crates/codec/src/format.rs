use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A document format the library knows how to recognise.
///
/// Recognising a format does not mean it can be opened: that depends on
/// whether a codec for it is registered in [`Codecs`](crate::Codecs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Epub,
    Cbz,
    Cbr,
    Txt,
    Markdown,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 6] = [Self::Pdf, Self::Epub, Self::Cbz, Self::Cbr, Self::Txt, Self::Markdown];

    /// Match a file extension (without the dot), ignoring case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "epub" => Some(Self::Epub),
            "cbz" => Some(Self::Cbz),
            "cbr" => Some(Self::Cbr),
            "txt" => Some(Self::Txt),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref().extension().and_then(|ext| ext.to_str()).and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Cbz => "cbz",
            Self::Cbr => "cbr",
            Self::Txt => "txt",
            Self::Markdown => "markdown",
        }
    }
}
impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for DocumentFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::from_extension(s) {
            Some(format) => Ok(format),
            None => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}
