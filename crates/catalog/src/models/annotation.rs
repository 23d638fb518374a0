use super::{count_from_db, count_to_db, timestamp_from_db, timestamp_to_db};
use crate::annotation::{Annotation, AnnotationKind, Rect};
use crate::error::{Error, ErrorKind};
use exn::OptionExt;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AnnotationRow {
    pub id: String,
    pub item_id: String,
    pub page: i64,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub kind: String,
    pub text: String,
    pub color: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<&Annotation> for AnnotationRow {
    type Error = Error;
    fn try_from(annotation: &Annotation) -> Result<Self, Self::Error> {
        Ok(Self {
            id: annotation.id.clone(),
            item_id: annotation.item_id.clone(),
            page: count_to_db(annotation.page, "page")?,
            x0: annotation.range.x0,
            y0: annotation.range.y0,
            x1: annotation.range.x1,
            y1: annotation.range.y1,
            kind: annotation.kind.to_string(),
            text: annotation.text.clone(),
            color: annotation.color.clone(),
            created_at: timestamp_to_db(annotation.created_at, "created time")?,
            updated_at: timestamp_to_db(annotation.updated_at, "updated time")?,
        })
    }
}

impl TryFrom<AnnotationRow> for Annotation {
    type Error = Error;
    fn try_from(row: AnnotationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            item_id: row.item_id,
            page: count_from_db(row.page, "page")?,
            range: Rect::new(row.x0, row.y0, row.x1, row.y1),
            kind: row.kind.parse::<AnnotationKind>().ok().ok_or_raise(|| ErrorKind::InvalidData("annotation kind"))?,
            text: row.text,
            color: row.color,
            created_at: timestamp_from_db(row.created_at, "created time")?,
            updated_at: timestamp_from_db(row.updated_at, "updated time")?,
        })
    }
}
