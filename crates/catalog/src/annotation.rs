use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    #[display("highlight")]
    Highlight,
    #[display("note")]
    Note,
    #[display("bookmark")]
    Bookmark,
}

impl FromStr for AnnotationKind {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "highlight" => Ok(Self::Highlight),
            "note" => Ok(Self::Note),
            "bookmark" => Ok(Self::Bookmark),
            _ => Err(()),
        }
    }
}

/// Page-space rectangle covered by an annotation, in points from the top
/// left corner of the page.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Corners reordered so that `(x0, y0)` is the top left one.
    pub(crate) fn normalized(self) -> Self {
        Self {
            x0: self.x0.min(self.x1),
            y0: self.y0.min(self.y1),
            x1: self.x0.max(self.x1),
            y1: self.y0.max(self.y1),
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1].iter().all(|v| v.is_finite())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub item_id: String,
    pub page: usize,
    pub range: Rect,
    pub kind: AnnotationKind,
    pub text: String,
    pub color: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewAnnotation {
    pub item_id: String,
    pub page: usize,
    pub range: Rect,
    pub kind: AnnotationKind,
    pub text: String,
    pub color: Option<String>,
}

/// Fields to change on an existing annotation; `None` keeps the current
/// value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnnotationChanges {
    pub page: Option<usize>,
    pub range: Option<Rect>,
    pub kind: Option<AnnotationKind>,
    pub text: Option<String>,
    pub color: Option<Option<String>>,
}
