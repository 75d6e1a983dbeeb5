//! Knowledge Store - rusqlite 기반 문서/청크 저장소
//!
//! 문서, 청크, 임베딩 상태를 저장하고 FTS5로 청크 키워드 검색을 제공합니다.
//! unicode61 토크나이저는 한중일 문자열을 공백 단위로만 자르므로, 색인과 쿼리 모두
//! 한중일 구간을 바이그램으로 나눕니다.
//! 저장 위치: ~/.kbase-rag/knowledge.db
//!
//! 벡터는 LanceDB(`lance.rs`)에 저장되고, 이 저장소는 청크 텍스트의 원본입니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::chunker::is_wide;
use super::types::{ChunkHit, EmbeddingStatus, SearchScope};

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub kb_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub embedding_status: EmbeddingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub kb_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub content: String,
}

/// 저장된 청크 (벡터 제외)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub content_hash: String,
    pub token_count: usize,
}

/// 지식베이스 임베딩 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    pub total_documents: usize,
    pub embedded_documents: usize,
    pub pending_documents: usize,
    pub processing_documents: usize,
    pub failed_documents: usize,
    pub outdated_documents: usize,
    pub total_chunks: usize,
}

/// 문서 콘텐츠 해시 (SHA-256 hex)
pub fn content_sha256(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

const DOCUMENT_COLUMNS: &str = "id, kb_id, title, source_url, content, content_hash, \
     embedding_status, created_at, updated_at";

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 문서/청크 저장소
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                kb_id TEXT NOT NULL,
                title TEXT NOT NULL,
                source_url TEXT,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                embedding_status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_kb ON documents(kb_id);
            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(kb_id, embedding_status);

            CREATE TABLE IF NOT EXISTS document_chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(document_id, chunk_index)
            );
            "#,
        )
        .context("Failed to create tables")?;

        // FTS5 렉시컬 인덱스 (청크 rowid 공유, 분할된 텍스트는 insert_chunks에서 기록)
        // source: https://www.sqlite.org/fts5.html
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                terms,
                tokenize = 'unicode61'
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON document_chunks BEGIN
                DELETE FROM chunks_fts WHERE rowid = old.rowid;
            END;
            "#,
        )
        .context("Failed to create FTS5 index")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// 문서 저장 (상태: pending)
    pub fn add_document(&self, doc: NewDocument) -> Result<String> {
        let conn = self.lock()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO documents
                (id, kb_id, title, source_url, content, content_hash, embedding_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                doc.kb_id,
                doc.title,
                doc.source_url,
                doc.content,
                content_sha256(&doc.content),
                EmbeddingStatus::Pending.as_str(),
                now
            ],
        )
        .context("Failed to insert document")?;

        tracing::info!("Added document: {} (id={}, kb={})", doc.title, id, doc.kb_id);
        Ok(id)
    }

    /// 콘텐츠 변경 (해시가 바뀌면 상태를 pending으로 되돌림)
    ///
    /// # Returns
    /// 콘텐츠가 실제로 바뀌었는지 여부
    pub fn update_content(&self, id: &str, content: &str) -> Result<bool> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let changed = conn
            .execute(
                "UPDATE documents
                 SET content = ?1, content_hash = ?2, embedding_status = 'pending', updated_at = ?3
                 WHERE id = ?4 AND content_hash != ?2",
                params![content, content_sha256(content), now, id],
            )
            .context("Failed to update document content")?;

        Ok(changed > 0)
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);

        conn.query_row(&sql, params![id], row_to_document)
            .optional()
            .context("Failed to load document")
    }

    /// 문서 목록 조회
    pub fn list_documents(&self, kb_id: &str, limit: usize) -> Result<Vec<Document>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM documents WHERE kb_id = ?1 ORDER BY created_at DESC, id LIMIT ?2",
            DOCUMENT_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params![kb_id, limit as i64], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// 지정 상태의 문서 (생성 순)
    pub fn documents_with_status(
        &self,
        kb_id: &str,
        statuses: &[EmbeddingStatus],
    ) -> Result<Vec<Document>> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM documents WHERE kb_id = ? AND embedding_status IN ({})
             ORDER BY created_at, id",
            DOCUMENT_COLUMNS,
            placeholders(statuses.len())
        );

        let values: Vec<String> = std::iter::once(kb_id.to_string())
            .chain(statuses.iter().map(|s| s.as_str().to_string()))
            .collect();

        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(values.iter()), row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// 지식베이스의 모든 문서 ID
    pub fn document_ids(&self, kb_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM documents WHERE kb_id = ?1 ORDER BY created_at, id")?;
        let ids = stmt
            .query_map(params![kb_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// 문서별 지식베이스 ID
    pub fn kb_ids_for_documents(&self, document_ids: &[String]) -> Result<HashMap<String, String>> {
        if document_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        let sql = format!(
            "SELECT id, kb_id FROM documents WHERE id IN ({})",
            placeholders(document_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let pairs = stmt
            .query_map(params_from_iter(document_ids.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(pairs)
    }

    /// 문서 삭제 (청크는 CASCADE)
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------------
    // Embedding Status
    // ------------------------------------------------------------------------

    /// 임베딩 상태 변경
    pub fn set_status(&self, id: &str, status: EmbeddingStatus) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE documents SET embedding_status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update embedding status")?;
        Ok(rows > 0)
    }

    /// 여러 문서의 임베딩 상태 변경
    pub fn set_status_for_documents(&self, ids: &[String], status: EmbeddingStatus) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let sql = format!(
            "UPDATE documents SET embedding_status = ?, updated_at = ? WHERE id IN ({})",
            placeholders(ids.len())
        );
        let values: Vec<String> = [status.as_str().to_string(), Utc::now().to_rfc3339()]
            .into_iter()
            .chain(ids.iter().cloned())
            .collect();

        let rows = conn
            .execute(&sql, params_from_iter(values.iter()))
            .context("Failed to update embedding status")?;
        Ok(rows)
    }

    /// 완료된 문서를 outdated로 표시 (임베딩 모델 변경 시)
    pub fn mark_knowledge_base_outdated(&self, kb_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE documents SET embedding_status = 'outdated', updated_at = ?1
             WHERE kb_id = ?2 AND embedding_status = 'completed'",
            params![Utc::now().to_rfc3339(), kb_id],
        )?;

        tracing::info!("Marked {} documents outdated in kb {}", rows, kb_id);
        Ok(rows)
    }

    /// 지식베이스 임베딩 통계
    pub fn embedding_stats(&self, kb_id: &str) -> Result<EmbeddingStats> {
        let conn = self.lock()?;

        let mut stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(embedding_status = 'completed'), 0),
                COALESCE(SUM(embedding_status = 'pending'), 0),
                COALESCE(SUM(embedding_status = 'processing'), 0),
                COALESCE(SUM(embedding_status = 'failed'), 0),
                COALESCE(SUM(embedding_status = 'outdated'), 0)
             FROM documents WHERE kb_id = ?1",
            params![kb_id],
            |row| {
                Ok(EmbeddingStats {
                    total_documents: row.get::<_, i64>(0)? as usize,
                    embedded_documents: row.get::<_, i64>(1)? as usize,
                    pending_documents: row.get::<_, i64>(2)? as usize,
                    processing_documents: row.get::<_, i64>(3)? as usize,
                    failed_documents: row.get::<_, i64>(4)? as usize,
                    outdated_documents: row.get::<_, i64>(5)? as usize,
                    total_chunks: 0,
                })
            },
        )?;

        let chunks: i64 = conn.query_row(
            "SELECT COUNT(*) FROM document_chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE d.kb_id = ?1",
            params![kb_id],
            |row| row.get(0),
        )?;
        stats.total_chunks = chunks as usize;

        Ok(stats)
    }

    // ------------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------------

    /// 청크 일괄 삽입 (트랜잭션, 전부 성공 또는 전부 실패)
    pub fn insert_chunks(&self, chunks: &[StoredChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO document_chunks
                    (id, document_id, chunk_index, content, content_hash, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut fts_stmt = tx.prepare("INSERT INTO chunks_fts(rowid, terms) VALUES (?1, ?2)")?;

            for chunk in chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.document_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.content_hash,
                    chunk.token_count as i64,
                    now
                ])
                .with_context(|| {
                    format!(
                        "Failed to insert chunk {} of document {}",
                        chunk.chunk_index, chunk.document_id
                    )
                })?;

                fts_stmt
                    .execute(params![tx.last_insert_rowid(), segment_cjk(&chunk.content)])
                    .context("Failed to index chunk")?;
            }
        }

        tx.commit().context("Failed to commit chunks")?;
        Ok(chunks.len())
    }

    /// 문서의 청크 삭제
    pub fn delete_chunks(&self, document_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "DELETE FROM document_chunks WHERE document_id = ?1",
                params![document_id],
            )
            .context("Failed to delete chunks")?;
        Ok(rows)
    }

    /// 문서의 청크 목록 (chunk_index 순)
    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<StoredChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, content, content_hash, token_count
             FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )?;

        let chunks = stmt
            .query_map(params![document_id], |row| {
                Ok(StoredChunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    chunk_index: row.get::<_, i64>(2)? as usize,
                    content: row.get(3)?,
                    content_hash: row.get(4)?,
                    token_count: row.get::<_, i64>(5)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// ID로 청크 조회 (문서 정보 포함, score = 0)
    pub fn chunks_by_ids(&self, ids: &[String]) -> Result<HashMap<String, ChunkHit>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        let sql = format!(
            "SELECT c.id, c.document_id, d.kb_id, c.chunk_index, c.content, c.token_count,
                    d.title, d.source_url, 0.0
             FROM document_chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.id IN ({})",
            placeholders(ids.len())
        );

        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(ids.iter()), row_to_hit)?
            .map(|r| r.map(|hit| (hit.chunk_id.clone(), hit)))
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(hits)
    }

    /// FTS5 렉시컬 검색
    ///
    /// BM25 관련도 내림차순으로 반환합니다 (score = -bm25).
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_lexical(
        &self,
        scope: &SearchScope,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let (clause, scope_values) = scope_clause(scope);
        let sql = format!(
            r#"
            SELECT c.id, c.document_id, d.kb_id, c.chunk_index, c.content, c.token_count,
                   d.title, d.source_url, bm25(chunks_fts) AS bm25_score
            FROM chunks_fts
            JOIN document_chunks c ON c.rowid = chunks_fts.rowid
            JOIN documents d ON d.id = c.document_id
            WHERE chunks_fts MATCH ? AND {}
            ORDER BY bm25_score, c.document_id, c.chunk_index
            LIMIT {}
            "#,
            clause, limit
        );

        let values: Vec<String> = std::iter::once(fts_query).chain(scope_values).collect();

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let mut hit = row_to_hit(row)?;
                hit.score = -hit.score;
                Ok(hit)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to run lexical search")?;

        Ok(hits)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// 검색 범위 WHERE 절 (d = documents, c = document_chunks)
fn scope_clause(scope: &SearchScope) -> (String, Vec<String>) {
    match scope {
        SearchScope::KnowledgeBase(kb_id) => ("d.kb_id = ?".to_string(), vec![kb_id.clone()]),
        SearchScope::Document(doc_id) => ("c.document_id = ?".to_string(), vec![doc_id.clone()]),
        SearchScope::KnowledgeBases(kb_ids) if kb_ids.is_empty() => ("0".to_string(), vec![]),
        SearchScope::KnowledgeBases(kb_ids) => (
            format!("d.kb_id IN ({})", placeholders(kb_ids.len())),
            kb_ids.clone(),
        ),
    }
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let status: String = row.get(6)?;
    let embedding_status = status
        .parse::<EmbeddingStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;

    Ok(Document {
        id: row.get(0)?,
        kb_id: row.get(1)?,
        title: row.get(2)?,
        source_url: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        embedding_status,
        created_at: parse_datetime(row.get::<_, String>(7)?),
        updated_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

fn row_to_hit(row: &Row<'_>) -> rusqlite::Result<ChunkHit> {
    Ok(ChunkHit {
        chunk_id: row.get(0)?,
        document_id: row.get(1)?,
        kb_id: row.get(2)?,
        chunk_index: row.get::<_, i64>(3)? as usize,
        content: row.get(4)?,
        token_count: row.get::<_, i64>(5)? as usize,
        document_title: row.get(6)?,
        source_url: row.get(7)?,
        score: row.get::<_, f64>(8)? as f32,
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// 한중일 문자 구간과 나머지 구간으로 나눔 (is_wide, 문자열)
fn wide_runs(text: &str) -> Vec<(bool, String)> {
    let mut runs: Vec<(bool, String)> = Vec::new();
    for c in text.chars() {
        let wide = is_wide(c);
        match runs.last_mut() {
            Some((last_wide, run)) if *last_wide == wide => run.push(c),
            _ => runs.push((wide, c.to_string())),
        }
    }
    runs
}

/// 한중일 구간의 색인 토큰: 바이그램 + 마지막 글자
///
/// 마지막 글자는 구간 끝에 있는 한 글자 검색이 접두사 쿼리로 잡히게 합니다.
fn cjk_terms(run: &str) -> Vec<String> {
    let chars: Vec<char> = run.chars().collect();
    let mut terms: Vec<String> = chars.windows(2).map(|w| w.iter().collect()).collect();
    if let Some(last) = chars.last() {
        terms.push(last.to_string());
    }
    terms
}

/// 색인용 텍스트 (한중일 구간만 공백으로 구분된 토큰으로 바꿈)
fn segment_cjk(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for (wide, run) in wide_runs(text) {
        if wide {
            out.push(' ');
            out.push_str(&cjk_terms(&run).join(" "));
            out.push(' ');
        } else {
            out.push_str(&run);
        }
    }
    out
}

/// FTS5 쿼리 생성
///
/// 특수 문자를 제거한 단어들을 따옴표로 감싸 OR로 연결합니다 (BM25가 순위를 매김).
/// 한중일 구간은 연속 바이그램 구문, 한 글자면 접두사 쿼리가 됩니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_fts_query(query: &str) -> String {
    let mut terms = Vec::new();

    for word in query.split_whitespace() {
        let word: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();

        for (wide, run) in wide_runs(&word) {
            if !wide {
                terms.push(format!("\"{}\"", run));
            } else if run.chars().count() == 1 {
                terms.push(format!("\"{}\"*", run));
            } else {
                let chars: Vec<char> = run.chars().collect();
                let bigrams: Vec<String> = chars.windows(2).map(|w| w.iter().collect()).collect();
                terms.push(format!("\"{}\"", bigrams.join(" ")));
            }
        }
    }

    terms.join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = KnowledgeStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn add_doc(store: &KnowledgeStore, kb: &str, title: &str, content: &str) -> String {
        store
            .add_document(NewDocument {
                kb_id: kb.to_string(),
                title: title.to_string(),
                source_url: Some(format!("https://example.com/{}", title)),
                content: content.to_string(),
            })
            .unwrap()
    }

    fn chunk(doc_id: &str, index: usize, content: &str) -> StoredChunk {
        StoredChunk {
            id: format!("{}-{}", doc_id, index),
            document_id: doc_id.to_string(),
            chunk_index: index,
            content: content.to_string(),
            content_hash: format!("h{}", index),
            token_count: content.len() / 4,
        }
    }

    fn fts_rows(store: &KnowledgeStore) -> i64 {
        store
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM chunks_fts", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_add_and_get_document() {
        let (_dir, store) = create_test_store();
        let id = add_doc(&store, "kb1", "Guide", "This is test content");

        let doc = store.get_document(&id).unwrap().unwrap();
        assert_eq!(doc.kb_id, "kb1");
        assert_eq!(doc.title, "Guide");
        assert_eq!(doc.embedding_status, EmbeddingStatus::Pending);
        assert_eq!(doc.content_hash, content_sha256("This is test content"));

        assert!(store.get_document("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_content_resets_status() {
        let (_dir, store) = create_test_store();
        let id = add_doc(&store, "kb1", "Doc", "v1");
        store.set_status(&id, EmbeddingStatus::Completed).unwrap();

        // 같은 내용이면 변경 없음
        assert!(!store.update_content(&id, "v1").unwrap());
        assert_eq!(
            store.get_document(&id).unwrap().unwrap().embedding_status,
            EmbeddingStatus::Completed
        );

        assert!(store.update_content(&id, "v2").unwrap());
        let doc = store.get_document(&id).unwrap().unwrap();
        assert_eq!(doc.content, "v2");
        assert_eq!(doc.embedding_status, EmbeddingStatus::Pending);
    }

    #[test]
    fn test_documents_with_status() {
        let (_dir, store) = create_test_store();
        let a = add_doc(&store, "kb1", "a", "a");
        let b = add_doc(&store, "kb1", "b", "b");
        let c = add_doc(&store, "kb1", "c", "c");
        add_doc(&store, "kb2", "d", "d");

        store.set_status(&a, EmbeddingStatus::Completed).unwrap();
        store.set_status(&b, EmbeddingStatus::Failed).unwrap();

        let docs = store
            .documents_with_status("kb1", &EmbeddingStatus::NEEDS_EMBEDDING)
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&b));
        assert!(ids.contains(&c));
    }

    #[test]
    fn test_mark_outdated_and_stats() {
        let (_dir, store) = create_test_store();
        let a = add_doc(&store, "kb1", "a", "a");
        let b = add_doc(&store, "kb1", "b", "b");
        add_doc(&store, "kb1", "c", "c");

        store.set_status(&a, EmbeddingStatus::Completed).unwrap();
        store.set_status(&b, EmbeddingStatus::Failed).unwrap();
        store.insert_chunks(&[chunk(&a, 0, "alpha"), chunk(&a, 1, "beta")]).unwrap();

        let stats = store.embedding_stats("kb1").unwrap();
        assert_eq!(
            stats,
            EmbeddingStats {
                total_documents: 3,
                embedded_documents: 1,
                pending_documents: 1,
                processing_documents: 0,
                failed_documents: 1,
                outdated_documents: 0,
                total_chunks: 2,
            }
        );

        assert_eq!(store.mark_knowledge_base_outdated("kb1").unwrap(), 1);
        let stats = store.embedding_stats("kb1").unwrap();
        assert_eq!(stats.outdated_documents, 1);
        assert_eq!(stats.embedded_documents, 0);

        assert_eq!(store.embedding_stats("empty").unwrap(), EmbeddingStats::default());
    }

    #[test]
    fn test_insert_and_delete_chunks() {
        let (_dir, store) = create_test_store();
        let id = add_doc(&store, "kb1", "Doc", "content");

        let inserted = store
            .insert_chunks(&[chunk(&id, 0, "first"), chunk(&id, 1, "second")])
            .unwrap();
        assert_eq!(inserted, 2);

        let chunks = store.chunks_for_document(&id).unwrap();
        assert_eq!(chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(), vec![0, 1]);

        assert_eq!(fts_rows(&store), 2);

        assert_eq!(store.delete_chunks(&id).unwrap(), 2);
        assert!(store.chunks_for_document(&id).unwrap().is_empty());
        assert_eq!(fts_rows(&store), 0);
        // 청크가 없어도 안전
        assert_eq!(store.delete_chunks(&id).unwrap(), 0);
    }

    #[test]
    fn test_insert_chunks_is_atomic() {
        let (_dir, store) = create_test_store();
        let id = add_doc(&store, "kb1", "Doc", "content");

        let mut dup = chunk(&id, 0, "dup");
        dup.id = "other".to_string();
        let result = store.insert_chunks(&[chunk(&id, 0, "first"), dup]);
        assert!(result.is_err());
        assert!(store.chunks_for_document(&id).unwrap().is_empty());
        assert_eq!(fts_rows(&store), 0);
    }

    #[test]
    fn test_delete_document_cascades_chunks() {
        let (_dir, store) = create_test_store();
        let id = add_doc(&store, "kb1", "Doc", "content");
        store.insert_chunks(&[chunk(&id, 0, "first")]).unwrap();

        assert!(store.delete_document(&id).unwrap());
        assert!(store.chunks_for_document(&id).unwrap().is_empty());
    }

    #[test]
    fn test_lexical_search_scopes() {
        let (_dir, store) = create_test_store();
        let a = add_doc(&store, "kb1", "rust", "rust");
        let b = add_doc(&store, "kb2", "tokio", "tokio");

        store
            .insert_chunks(&[
                chunk(&a, 0, "Rust ownership and borrowing rules"),
                chunk(&a, 1, "Unrelated gardening notes"),
            ])
            .unwrap();
        store
            .insert_chunks(&[chunk(&b, 0, "Tokio runtime for async Rust")])
            .unwrap();

        let kb1 = store
            .search_lexical(&SearchScope::KnowledgeBase("kb1".into()), "rust", 10)
            .unwrap();
        assert_eq!(kb1.len(), 1);
        assert_eq!(kb1[0].chunk_id, format!("{}-0", a));
        assert_eq!(kb1[0].document_title.as_deref(), Some("rust"));
        assert!(kb1[0].score > 0.0);

        let both = store
            .search_lexical(
                &SearchScope::KnowledgeBases(vec!["kb1".into(), "kb2".into()]),
                "rust",
                10,
            )
            .unwrap();
        assert_eq!(both.len(), 2);
        assert!(both.windows(2).all(|w| w[0].score >= w[1].score));

        let doc = store
            .search_lexical(&SearchScope::Document(b.clone()), "rust gardening", 10)
            .unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc[0].document_id, b);

        let none = store
            .search_lexical(&SearchScope::KnowledgeBases(vec![]), "rust", 10)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_chunks_by_ids() {
        let (_dir, store) = create_test_store();
        let a = add_doc(&store, "kb1", "Doc", "content");
        store.insert_chunks(&[chunk(&a, 0, "first"), chunk(&a, 1, "second")]).unwrap();

        let hits = store
            .chunks_by_ids(&[format!("{}-1", a), "missing".to_string()])
            .unwrap();
        assert_eq!(hits.len(), 1);
        let hit = &hits[&format!("{}-1", a)];
        assert_eq!(hit.content, "second");
        assert_eq!(hit.kb_id, "kb1");
        assert_eq!(hit.chunk_index, 1);
    }

    #[test]
    fn test_build_fts_query() {
        assert_eq!(build_fts_query("hello world"), "\"hello\" OR \"world\"");
        assert_eq!(build_fts_query("  "), "");
        assert_eq!(build_fts_query("hello:world"), "\"helloworld\"");
        assert_eq!(build_fts_query("\"quoted\" -"), "\"quoted\"");
        assert_eq!(build_fts_query("文档切分"), "\"文档 档切 切分\"");
        assert_eq!(build_fts_query("文"), "\"文\"*");
        assert_eq!(build_fts_query("Rust文档"), "\"Rust\" OR \"文档\"");
    }

    #[test]
    fn test_segment_cjk() {
        assert_eq!(segment_cjk("plain text"), "plain text");
        assert_eq!(segment_cjk("文档"), " 文档 档 ");
        assert_eq!(segment_cjk("a文b"), "a 文 b");
        assert_eq!(segment_cjk("검색어"), " 검색 색어 어 ");
    }

    #[test]
    fn test_lexical_search_cjk() {
        let (_dir, store) = create_test_store();
        let id = add_doc(&store, "kb", "RAG", "content");
        store
            .insert_chunks(&[chunk(
                &id,
                0,
                "检索增强生成把文档切分成片段。Retrieval augmented generation",
            )])
            .unwrap();

        let kb = SearchScope::KnowledgeBase("kb".into());
        let hits = |q: &str| store.search_lexical(&kb, q, 10).unwrap().len();

        assert_eq!(hits("文档"), 1);
        assert_eq!(hits("片段"), 1);
        assert_eq!(hits("增强生成"), 1);
        assert_eq!(hits("检"), 1);
        assert_eq!(hits("段"), 1);
        assert_eq!(hits("retrieval"), 1);
        // 바이그램이 연속하지 않으면 구문 불일치
        assert_eq!(hits("生成文档"), 0);

        let found = store.search_lexical(&kb, "文档", 10).unwrap();
        assert_eq!(found[0].content, "检索增强生成把文档切分成片段。Retrieval augmented generation");
    }
}
