//! Repository layer for database operations
//!
//! Maps a document and its spreadsheet collections onto the relational
//! schema. Create and replace run in a single transaction each; dropping the
//! transaction on an early return rolls everything back.

use super::models::*;
use crate::error::{AppError, Result};
use crate::xlsx::{CellRange, CellRecord, ExtractedImage};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeMap, HashMap};

// SQLite allows 999 bound parameters per statement in older builds
const CELL_CHUNK: usize = 200;
const STYLE_CHUNK: usize = 60;
const MERGE_CHUNK: usize = 150;
const DIMENSION_CHUNK: usize = 300;
const IMAGE_CHUNK: usize = 80;

const CELL_COLUMNS: &str = r#"
    SELECT c.row_num, c.col_num, c.value,
           s.id AS style_id, s.bold, s.font_color, s.font_size, s.fill_color,
           s.border_top_style, s.border_top_color,
           s.border_right_style, s.border_right_color,
           s.border_bottom_style, s.border_bottom_color,
           s.border_left_style, s.border_left_color,
           s.align_horizontal, s.align_vertical
    FROM cells c
    LEFT JOIN cell_styles s ON s.cell_id = c.id
"#;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a repository over a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a document and all of its collections.
    pub async fn create_document(
        &self,
        owner_id: i64,
        metadata: &DocumentMetadata,
        content: &DocumentContent,
    ) -> Result<Document> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let document = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents
                (title, body, owner_id, original_filename, source_hash, source_size,
                 parsed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&metadata.title)
        .bind(&metadata.body)
        .bind(owner_id)
        .bind(&metadata.original_filename)
        .bind(&metadata.source_hash)
        .bind(metadata.source_size)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        insert_content(&mut tx, document.id, content).await?;
        tx.commit().await?;

        tracing::debug!(
            "Created document {} with {} cells",
            document.id,
            content.sheet.cells.len()
        );
        Ok(document)
    }

    /// Replace a document's metadata and every child row.
    ///
    /// The document row is updated first, which takes the database write lock
    /// for the rest of the transaction.
    pub async fn replace_document(
        &self,
        id: i64,
        metadata: &DocumentMetadata,
        content: &DocumentContent,
    ) -> Result<Document> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let document = sqlx::query_as::<_, Document>(
            r#"
            UPDATE documents
            SET title = ?, body = ?, original_filename = ?, source_hash = ?, source_size = ?,
                parsed_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&metadata.title)
        .bind(&metadata.body)
        .bind(&metadata.original_filename)
        .bind(&metadata.source_hash)
        .bind(metadata.source_size)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::DocumentNotFound(id))?;

        sqlx::query(
            "DELETE FROM cell_styles WHERE cell_id IN (SELECT id FROM cells WHERE document_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        for table in ["cells", "merges", "column_dimensions", "row_dimensions", "images"] {
            sqlx::query(&format!("DELETE FROM {} WHERE document_id = ?", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        insert_content(&mut tx, id, content).await?;
        tx.commit().await?;

        tracing::debug!(
            "Replaced content of document {} with {} cells",
            id,
            content.sheet.cells.len()
        );
        Ok(document)
    }

    /// Get a document by ID
    pub async fn get_document(&self, id: i64) -> Result<Document> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::DocumentNotFound(id))
    }

    /// List documents, newest first
    pub async fn list_documents(&self, skip: i64, limit: i64) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }

    /// Total number of documents
    pub async fn count_documents(&self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    /// Number of documents whose original upload is the given blob
    pub async fn count_source_references(&self, hash: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source_hash = ?")
            .bind(hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Cells with their styles, in row-major order
    pub async fn list_cells(&self, document_id: i64) -> Result<Vec<CellRecord>> {
        let rows = sqlx::query_as::<_, CellRow>(&format!(
            "{} WHERE c.document_id = ? ORDER BY c.row_num, c.col_num",
            CELL_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CellRecord::from).collect())
    }

    /// Merge ranges in insertion order
    pub async fn list_merges(&self, document_id: i64) -> Result<Vec<CellRange>> {
        let rows = sqlx::query_as::<_, MergeRow>(
            r#"
            SELECT start_row, start_col, end_row, end_col FROM merges
            WHERE document_id = ? ORDER BY id
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CellRange::from).collect())
    }

    /// Explicit column widths keyed by 1-based column
    pub async fn list_column_dimensions(&self, document_id: i64) -> Result<BTreeMap<u32, f64>> {
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT col_num, width FROM column_dimensions WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(col, width)| (col as u32, width)).collect())
    }

    /// Explicit row heights keyed by 1-based row
    pub async fn list_row_dimensions(&self, document_id: i64) -> Result<BTreeMap<u32, f64>> {
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT row_num, height FROM row_dimensions WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(row, height)| (row as u32, height)).collect())
    }

    /// Deduplicated images with their placement
    pub async fn list_images(&self, document_id: i64) -> Result<Vec<DocumentImage>> {
        let images = sqlx::query_as::<_, DocumentImage>(
            "SELECT * FROM images WHERE document_id = ? ORDER BY id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(images)
    }

    /// Delete a document. Child rows go with it through ON DELETE CASCADE.
    pub async fn delete_document(&self, id: i64) -> Result<Document> {
        let document = sqlx::query_as::<_, Document>("DELETE FROM documents WHERE id = ? RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::DocumentNotFound(id))?;

        tracing::debug!("Deleted document: {}", id);
        Ok(document)
    }
}

async fn insert_content(
    tx: &mut Transaction<'static, Sqlite>,
    document_id: i64,
    content: &DocumentContent,
) -> Result<()> {
    let sheet = &content.sheet;

    for chunk in sheet.cells.chunks(CELL_CHUNK) {
        let mut query = QueryBuilder::<Sqlite>::new(
            "INSERT INTO cells (document_id, row_num, col_num, value) ",
        );
        query.push_values(chunk, |mut row, cell| {
            row.push_bind(document_id)
                .push_bind(cell.row as i64)
                .push_bind(cell.col as i64)
                .push_bind(cell.value.clone());
        });
        query.build().execute(&mut **tx).await?;
    }

    // Bulk inserts return no ids, so read them back by position
    let styled: Vec<&CellRecord> = sheet.cells.iter().filter(|c| c.style.is_some()).collect();
    if !styled.is_empty() {
        let ids: HashMap<(i64, i64), i64> = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT id, row_num, col_num FROM cells WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|(id, row, col)| ((row, col), id))
        .collect();

        let mut rows = Vec::with_capacity(styled.len());
        for cell in styled {
            let id = ids
                .get(&(cell.row as i64, cell.col as i64))
                .copied()
                .ok_or_else(|| {
                    AppError::Storage(format!("cell ({}, {}) was not inserted", cell.row, cell.col))
                })?;
            if let Some(style) = &cell.style {
                rows.push((id, style));
            }
        }

        for chunk in rows.chunks(STYLE_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(
                r#"INSERT INTO cell_styles (
                    cell_id, bold, font_color, font_size, fill_color,
                    border_top_style, border_top_color, border_right_style, border_right_color,
                    border_bottom_style, border_bottom_color, border_left_style, border_left_color,
                    align_horizontal, align_vertical) "#,
            );
            query.push_values(chunk, |mut row, (cell_id, style)| {
                let border = &style.border;
                let side_style = |side: &Option<crate::xlsx::style::BorderSide>| {
                    side.as_ref().and_then(|s| s.style).map(|s| s.as_str())
                };
                let side_color = |side: &Option<crate::xlsx::style::BorderSide>| {
                    side.as_ref().and_then(|s| s.color.clone())
                };

                row.push_bind(*cell_id)
                    .push_bind(style.font.bold)
                    .push_bind(style.font.color.clone())
                    .push_bind(style.font.size)
                    .push_bind(style.fill.bg_color.clone())
                    .push_bind(side_style(&border.top))
                    .push_bind(side_color(&border.top))
                    .push_bind(side_style(&border.right))
                    .push_bind(side_color(&border.right))
                    .push_bind(side_style(&border.bottom))
                    .push_bind(side_color(&border.bottom))
                    .push_bind(side_style(&border.left))
                    .push_bind(side_color(&border.left))
                    .push_bind(style.alignment.horizontal.map(|a| a.as_str()))
                    .push_bind(style.alignment.vertical.map(|a| a.as_str()));
            });
            query.build().execute(&mut **tx).await?;
        }
    }

    for chunk in sheet.merges.chunks(MERGE_CHUNK) {
        let mut query = QueryBuilder::<Sqlite>::new(
            "INSERT INTO merges (document_id, start_row, start_col, end_row, end_col) ",
        );
        query.push_values(chunk, |mut row, merge| {
            row.push_bind(document_id)
                .push_bind(merge.start_row as i64)
                .push_bind(merge.start_col as i64)
                .push_bind(merge.end_row as i64)
                .push_bind(merge.end_col as i64);
        });
        query.build().execute(&mut **tx).await?;
    }

    let columns: Vec<(u32, f64)> = sheet.column_dimensions.iter().map(|(&c, &w)| (c, w)).collect();
    for chunk in columns.chunks(DIMENSION_CHUNK) {
        let mut query =
            QueryBuilder::<Sqlite>::new("INSERT INTO column_dimensions (document_id, col_num, width) ");
        query.push_values(chunk, |mut row, (col, width)| {
            row.push_bind(document_id)
                .push_bind(*col as i64)
                .push_bind(*width);
        });
        query.build().execute(&mut **tx).await?;
    }

    let rows: Vec<(u32, f64)> = sheet.row_dimensions.iter().map(|(&r, &h)| (r, h)).collect();
    for chunk in rows.chunks(DIMENSION_CHUNK) {
        let mut query =
            QueryBuilder::<Sqlite>::new("INSERT INTO row_dimensions (document_id, row_num, height) ");
        query.push_values(chunk, |mut row, (row_num, height)| {
            row.push_bind(document_id)
                .push_bind(*row_num as i64)
                .push_bind(*height);
        });
        query.build().execute(&mut **tx).await?;
    }

    insert_images(tx, document_id, &content.images).await?;

    Ok(())
}

async fn insert_images(
    tx: &mut Transaction<'static, Sqlite>,
    document_id: i64,
    images: &[ExtractedImage],
) -> Result<()> {
    for chunk in images.chunks(IMAGE_CHUNK) {
        let mut query = QueryBuilder::<Sqlite>::new(
            r#"INSERT INTO images (
                document_id, image_data, image_type, content_hash,
                from_row, from_col, to_row, to_col, width, height, anchor_resolved) "#,
        );
        query.push_values(chunk, |mut row, image| {
            row.push_bind(document_id)
                .push_bind(image.data.clone())
                .push_bind(image.image_type.clone())
                .push_bind(image.content_hash.clone())
                .push_bind(image.from_row as i64)
                .push_bind(image.from_col as i64)
                .push_bind(image.to_row as i64)
                .push_bind(image.to_col as i64)
                .push_bind(image.width as i64)
                .push_bind(image.height as i64)
                .push_bind(image.anchor_resolved);
        });
        query.build().execute(&mut **tx).await?;
    }

    Ok(())
}
