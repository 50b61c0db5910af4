//! Persistence gateway for documents and their blocks
//!
//! Sessions never write on their own; the coordinator calls [`DocumentStore::save`]
//! when someone explicitly saves or publishes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Block, DocumentKind, DocumentRecord, DocumentSummary, NewDocument, WorkflowStatus,
};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, document_id: &str) -> Result<Option<DocumentRecord>>;

    /// Write block content and the workflow status
    async fn save(&self, document_id: &str, blocks: &[Block], status: WorkflowStatus)
        -> Result<()>;

    async fn create(&self, doc: NewDocument) -> Result<DocumentRecord>;

    async fn list(&self) -> Result<Vec<DocumentSummary>>;

    async fn mark_published(&self, document_id: &str, at: DateTime<Utc>) -> Result<()>;
}

fn validate_new(doc: &NewDocument) -> Result<()> {
    if doc.title.trim().is_empty() {
        return Err(AppError::BadRequest("title is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for id in &doc.blocks {
        if id.is_empty() {
            return Err(AppError::BadRequest("block id is empty".to_string()));
        }
        if !seen.insert(id.as_str()) {
            return Err(AppError::BadRequest(format!("duplicate block id: {}", id)));
        }
    }
    Ok(())
}

fn new_record(doc: NewDocument, now: DateTime<Utc>) -> DocumentRecord {
    DocumentRecord {
        id: doc.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        title: doc.title,
        kind: doc.kind,
        status: WorkflowStatus::Draft,
        blocks: doc
            .blocks
            .into_iter()
            .map(|id| Block::new(id, serde_json::Value::Null))
            .collect(),
        published_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn load(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let Some(row) = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, title, kind, status, published_at, created_at, updated_at
            FROM documents
            WHERE id = ?
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let blocks = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT id, content, version, last_modified_by, last_modified_at
            FROM blocks
            WHERE document_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Block::try_from)
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(row.into_record(blocks)?))
    }

    async fn save(
        &self,
        document_id: &str,
        blocks: &[Block],
        status: WorkflowStatus,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE documents SET status = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }

        for block in blocks {
            let content = serde_json::to_string(&block.content)
                .map_err(|e| AppError::Internal(format!("Invalid block content: {}", e)))?;
            sqlx::query(
                r#"
                UPDATE blocks
                SET content = ?, version = ?, last_modified_by = ?, last_modified_at = ?
                WHERE document_id = ? AND id = ?
                "#,
            )
            .bind(content)
            .bind(block.version as i64)
            .bind(block.last_modified_by.as_deref())
            .bind(block.last_modified_at)
            .bind(document_id)
            .bind(&block.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create(&self, doc: NewDocument) -> Result<DocumentRecord> {
        validate_new(&doc)?;
        if let Some(id) = &doc.id {
            if self.load(id).await?.is_some() {
                return Err(AppError::BadRequest(format!(
                    "Document {} already exists",
                    id
                )));
            }
        }

        let record = new_record(doc, Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, kind, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, block) in record.blocks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO blocks (document_id, id, position)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&block.id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, title, kind, status, published_at, created_at, updated_at
            FROM documents
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn mark_published(&self, document_id: &str, at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE documents SET published_at = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(at)
        .bind(at)
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    title: String,
    kind: String,
    status: String,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn kind(&self) -> Result<DocumentKind> {
        self.kind
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid document kind: {}", e)))
    }

    fn status(&self) -> Result<WorkflowStatus> {
        self.status
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))
    }

    fn into_record(self, blocks: Vec<Block>) -> Result<DocumentRecord> {
        Ok(DocumentRecord {
            kind: self.kind()?,
            status: self.status()?,
            id: self.id,
            title: self.title,
            blocks,
            published_at: self.published_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<DocumentRow> for DocumentSummary {
    type Error = AppError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        Ok(DocumentSummary {
            kind: row.kind()?,
            status: row.status()?,
            id: row.id,
            title: row.title,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    id: String,
    content: String,
    version: i64,
    last_modified_by: Option<String>,
    last_modified_at: Option<DateTime<Utc>>,
}

impl TryFrom<BlockRow> for Block {
    type Error = AppError;

    fn try_from(row: BlockRow) -> Result<Self> {
        Ok(Block {
            content: serde_json::from_str(&row.content)
                .map_err(|e| AppError::Internal(format!("Invalid block content: {}", e)))?,
            id: row.id,
            version: row.version.max(0) as u64,
            last_modified_by: row.last_modified_by,
            last_modified_at: row.last_modified_at,
        })
    }
}

/// In-process store for tests and throwaway servers
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, DocumentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.documents.read().await.get(document_id).cloned())
    }

    async fn save(
        &self,
        document_id: &str,
        blocks: &[Block],
        status: WorkflowStatus,
    ) -> Result<()> {
        let mut documents = self.documents.write().await;
        let record = documents
            .get_mut(document_id)
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", document_id)))?;

        for block in blocks {
            if let Some(stored) = record.blocks.iter_mut().find(|b| b.id == block.id) {
                *stored = block.clone();
            }
        }
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn create(&self, doc: NewDocument) -> Result<DocumentRecord> {
        validate_new(&doc)?;
        let record = new_record(doc, Utc::now());

        let mut documents = self.documents.write().await;
        if documents.contains_key(&record.id) {
            return Err(AppError::BadRequest(format!(
                "Document {} already exists",
                record.id
            )));
        }
        documents.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<DocumentSummary>> {
        let documents = self.documents.read().await;
        let mut summaries: Vec<DocumentSummary> = documents
            .values()
            .map(|d| DocumentSummary {
                id: d.id.clone(),
                title: d.title.clone(),
                kind: d.kind,
                status: d.status,
                updated_at: d.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn mark_published(&self, document_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut documents = self.documents.write().await;
        let record = documents
            .get_mut(document_id)
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", document_id)))?;
        record.published_at = Some(at);
        record.updated_at = at;
        Ok(())
    }
}
