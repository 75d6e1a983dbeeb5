//! LanceDB Vector Store - 청크 벡터 인덱스
//!
//! 코사인 거리로 ANN 검색을 하고, 지식베이스/문서 범위는 `only_if` 필터로 적용합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::types::SearchScope;
use super::vector::{VectorEntry, VectorHit, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunk_vectors";

/// 벡터 컬럼 이름
const VECTOR_COLUMN: &str = "vector";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// 벡터 차원은 첫 삽입 배치에서 정해집니다. 테이블이 비어 있을 때만
/// 다른 차원으로 다시 만들 수 있습니다 (임베딩 모델 변경 후 전체 리셋).
pub struct LanceVectorStore {
    db: Connection,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("kb_id", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(entries: &[VectorEntry]) -> Result<RecordBatch> {
        let dimension = entries
            .first()
            .map(|e| e.embedding.len())
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty entries"))?;

        if dimension == 0 {
            anyhow::bail!("Cannot store zero-dimension vectors");
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
            anyhow::bail!(
                "Vector dimension mismatch for chunk {}: expected {}, got {}",
                bad.chunk_id,
                dimension,
                bad.embedding.len()
            );
        }
        let dimension = i32::try_from(dimension).context("Vector dimension too large")?;

        let chunk_ids: Vec<&str> = entries.iter().map(|e| e.chunk_id.as_str()).collect();
        let document_ids: Vec<&str> = entries.iter().map(|e| e.document_id.as_str()).collect();
        let kb_ids: Vec<&str> = entries.iter().map(|e| e.kb_id.as_str()).collect();
        let chunk_indices: Vec<i32> = entries.iter().map(|e| e.chunk_index).collect();

        let values: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(Float32Array::from(values)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(StringArray::from(document_ids)),
                Arc::new(StringArray::from(kb_ids)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(vectors),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;
        Ok(Some(table))
    }

    /// 저장된 벡터 컬럼의 차원
    async fn table_dimension(table: &lancedb::table::Table) -> Result<Option<i32>> {
        let schema = table.schema().await.context("Failed to read table schema")?;
        let dimension = schema
            .field_with_name(VECTOR_COLUMN)
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size),
                _ => None,
            });
        Ok(dimension)
    }

    /// 기존 테이블이 새 차원과 맞는지 확인
    ///
    /// 차원이 다르고 비어 있으면 테이블을 지우고 None을 돌려줍니다 (새로 생성).
    async fn table_for_dimension(&self, dimension: i32) -> Result<Option<lancedb::table::Table>> {
        let Some(table) = self.open_table().await? else {
            return Ok(None);
        };

        match Self::table_dimension(&table).await? {
            Some(existing) if existing == dimension => Ok(Some(table)),
            existing => {
                let existing = existing.map_or_else(|| "unknown".to_string(), |d| d.to_string());
                let rows = table.count_rows(None).await.context("Failed to count rows")?;
                if rows > 0 {
                    anyhow::bail!(
                        "Vector index holds {} vectors of dimension {} but got {}-dimension embeddings; \
                         reset every knowledge base embedded with the previous model first",
                        rows,
                        existing,
                        dimension
                    );
                }

                tracing::info!(
                    "Recreating empty vector table ({} -> {} dimensions)",
                    existing,
                    dimension
                );
                self.db
                    .drop_table(TABLE_NAME)
                    .await
                    .context("Failed to drop vector table")?;
                Ok(None)
            }
        }
    }

    async fn delete_where(&self, filter: &str) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let matching = table
            .count_rows(Some(filter.to_string()))
            .await
            .context("Failed to count rows before delete")?;

        if matching > 0 {
            table
                .delete(filter)
                .await
                .context("Failed to delete vectors")?;
        }
        Ok(matching)
    }
}

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn in_list(column: &str, values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("{} IN ({})", column, quoted.join(", "))
}

/// 검색 범위 필터 식
fn scope_filter(scope: &SearchScope) -> Option<String> {
    match scope {
        SearchScope::KnowledgeBase(kb_id) => Some(format!("kb_id = {}", quote(kb_id))),
        SearchScope::Document(doc_id) => Some(format!("document_id = {}", quote(doc_id))),
        SearchScope::KnowledgeBases(kb_ids) if kb_ids.is_empty() => None,
        SearchScope::KnowledgeBases(kb_ids) => Some(in_list("kb_id", kb_ids)),
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = Self::entries_to_batch(entries)?;
        let schema = batch.schema();
        let dimension = match schema.field_with_name(VECTOR_COLUMN)?.data_type() {
            DataType::FixedSizeList(_, size) => *size,
            other => anyhow::bail!("Unexpected vector column type: {:?}", other),
        };
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.table_for_dimension(dimension).await? {
            Some(table) => {
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add vectors to table")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
            }
        }

        tracing::debug!("Inserted {} vectors", entries.len());
        Ok(entries.len())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        scope: &SearchScope,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let Some(filter) = scope_filter(scope) else {
            return Ok(vec![]);
        };
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .only_if(filter)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut hits = Vec::new();

        for batch in batches {
            let chunk_ids = string_column(&batch, "chunk_id")?;
            let document_ids = string_column(&batch, "document_id")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                // 코사인 거리 = 1 - 코사인 유사도
                hits.push(VectorHit {
                    chunk_id: chunk_ids.value(i).to_string(),
                    document_id: document_ids.value(i).to_string(),
                    similarity: 1.0 - distances.value(i),
                });
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        self.delete_where(&format!("document_id = {}", quote(document_id)))
            .await
    }

    async fn delete_by_documents(&self, document_ids: &[String]) -> Result<usize> {
        if document_ids.is_empty() {
            return Ok(0);
        }
        self.delete_where(&in_list("document_id", document_ids)).await
    }

    async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

// ============================================================================
// Tests
// ============================================================================
