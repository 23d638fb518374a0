//! Annotations.
//!
//! Every write goes straight to the database; there is no caching layer.
//! Annotations are keyed by item id and are deliberately not removed with
//! their item (see [`Catalog::remove`](crate::Catalog::remove)).

use crate::Database;
use crate::annotation::{Annotation, AnnotationChanges, NewAnnotation, Rect};
use crate::error::{ErrorKind, Result};
use crate::models::AnnotationRow;
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::fmt::Write;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AnnotationStore {
    pool: SqlitePool,
}
impl From<&Database> for AnnotationStore {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

fn validate(page: usize, range: Rect) -> Result<Rect> {
    if page == 0 {
        exn::bail!(ErrorKind::InvalidData("page"));
    }
    if !range.is_finite() {
        exn::bail!(ErrorKind::InvalidData("range"));
    }
    Ok(range.normalized())
}

impl AnnotationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[instrument(skip_all, fields(item = %new.item_id, page = new.page))]
    pub async fn create(&self, new: NewAnnotation) -> Result<Annotation> {
        let now = OffsetDateTime::now_utc();
        let annotation = Annotation {
            id: Uuid::new_v4().to_string(),
            range: validate(new.page, new.range)?,
            item_id: new.item_id,
            page: new.page,
            kind: new.kind,
            text: new.text,
            color: new.color,
            created_at: now,
            updated_at: now,
        };
        let row = AnnotationRow::try_from(&annotation)?;
        sqlx::query(include_str!("../queries/insert_annotation.sql"))
            .bind(row.id)
            .bind(row.item_id)
            .bind(row.page)
            .bind(row.x0)
            .bind(row.y0)
            .bind(row.x1)
            .bind(row.y1)
            .bind(row.kind)
            .bind(row.text)
            .bind(row.color)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(annotation)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Annotation>> {
        let row: Option<AnnotationRow> = sqlx::query_as(include_str!("../queries/get_annotation.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Annotation::try_from).transpose()
    }

    /// Apply `changes` and bump `updated_at`. Unknown ids are an error.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: &str, changes: AnnotationChanges) -> Result<Annotation> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let row: Option<AnnotationRow> = sqlx::query_as(include_str!("../queries/get_annotation.sql"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut annotation = Annotation::try_from(row.ok_or_raise(|| ErrorKind::AnnotationNotFound(id.to_string()))?)?;
        let page = changes.page.unwrap_or(annotation.page);
        annotation.range = validate(page, changes.range.unwrap_or(annotation.range))?;
        annotation.page = page;
        annotation.kind = changes.kind.unwrap_or(annotation.kind);
        if let Some(text) = changes.text {
            annotation.text = text;
        }
        if let Some(color) = changes.color {
            annotation.color = color;
        }
        // Never earlier than creation, even if the clock went backwards.
        annotation.updated_at = OffsetDateTime::now_utc().max(annotation.created_at);

        let row = AnnotationRow::try_from(&annotation)?;
        sqlx::query(include_str!("../queries/update_annotation.sql"))
            .bind(row.page)
            .bind(row.x0)
            .bind(row.y0)
            .bind(row.x1)
            .bind(row.y1)
            .bind(row.kind)
            .bind(row.text)
            .bind(row.color)
            .bind(row.updated_at)
            .bind(row.id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(annotation)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/delete_annotation.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::AnnotationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// All annotations on an item in reading order: by page, then top edge,
    /// then left edge.
    pub async fn list(&self, item_id: &str) -> Result<Vec<Annotation>> {
        let rows: Vec<AnnotationRow> = sqlx::query_as(include_str!("../queries/list_annotations.sql"))
            .bind(item_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Annotation::try_from).collect()
    }

    pub async fn export_json(&self, item_id: &str) -> Result<String> {
        let annotations = self.list(item_id).await?;
        serde_json::to_string_pretty(&annotations).or_raise(|| ErrorKind::InvalidData("annotation export"))
    }

    /// Render an item's annotations as a Markdown document, grouped by page.
    pub async fn export_markdown(&self, item_id: &str, title: &str) -> Result<String> {
        let annotations = self.list(item_id).await?;
        Ok(render_markdown(title, &annotations))
    }
}

fn render_markdown(title: &str, annotations: &[Annotation]) -> String {
    let mut by_page: BTreeMap<usize, Vec<&Annotation>> = BTreeMap::new();
    for annotation in annotations {
        by_page.entry(annotation.page).or_default().push(annotation);
    }
    let mut out = format!("# {title}\n");
    if by_page.is_empty() {
        out.push_str("\n_No annotations._\n");
    }
    for (page, annotations) in by_page {
        // Writing to a String can't fail.
        _ = write!(out, "\n## Page {page}\n\n");
        for annotation in annotations {
            _ = write!(out, "- **{}**", annotation.kind);
            if let Some(color) = &annotation.color {
                _ = write!(out, " ({color})");
            }
            match annotation.text.trim() {
                "" => out.push('\n'),
                text => {
                    _ = writeln!(out, ": {}", text.replace('\n', " "));
                },
            }
        }
    }
    out
}
