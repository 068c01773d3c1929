use anyhow::{anyhow, Context};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::DistanceMetric;
use crate::error::{RagError, RagResult};
use crate::types::{ChunkRecord, DocumentChunk, ScoredChunk};

const TABLE_NAME: &str = "chunks";

/// Persistent vector index over document chunks.
///
/// Rows carry a monotonically increasing `seq` so equal-distance results come
/// back in insertion order. Writers are serialized through `next_seq`.
pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
    metric: DistanceMetric,
    table_name: String,
    next_seq: Mutex<u64>,
}

impl LanceStore {
    /// Open (or create) the store at `path`. An existing table built with a
    /// different vector dimension is rejected.
    pub async fn open(path: &Path, dimension: usize, metric: DistanceMetric) -> RagResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            RagError::StoreUnavailable(format!("cannot create {}: {}", path.display(), e))
        })?;
        let uri = path
            .to_str()
            .ok_or_else(|| RagError::StoreUnavailable(format!("non UTF-8 path {}", path.display())))?;

        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| RagError::StoreUnavailable(format!("failed to connect to LanceDB: {}", e)))?;

        let store = Self {
            db,
            dimension,
            metric,
            table_name: TABLE_NAME.to_string(),
            next_seq: Mutex::new(0),
        };

        store.ensure_table().await?;
        let next = store.max_seq().await?.map(|s| s + 1).unwrap_or(0);
        *store.next_seq.lock().await = next;

        tracing::info!(
            path = %path.display(),
            dimension,
            next_seq = next,
            "Vector store opened"
        );
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("seq", DataType::UInt64, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("page", DataType::UInt32, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
            Field::new("created_at", DataType::Int64, false),
        ]))
    }

    async fn ensure_table(&self) -> RagResult<()> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::StoreUnavailable(format!("failed to list tables: {}", e)))?;

        if names.contains(&self.table_name) {
            let existing = self.existing_dimension().await?;
            if existing != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: existing,
                    found: self.dimension,
                });
            }
            return Ok(());
        }

        self.db
            .create_empty_table(&self.table_name, self.schema())
            .execute()
            .await
            .map_err(|e| RagError::StoreUnavailable(format!("failed to create table: {}", e)))?;
        tracing::debug!(table = %self.table_name, "Created empty chunk table");
        Ok(())
    }

    async fn existing_dimension(&self) -> RagResult<usize> {
        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::StoreUnavailable(format!("failed to read schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }
        Err(RagError::StoreUnavailable(
            "existing table has no fixed-size vector column".into(),
        ))
    }

    async fn open_table(&self) -> RagResult<lancedb::Table> {
        self.db
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::StoreUnavailable(format!("failed to open table: {}", e)))
    }

    async fn max_seq(&self) -> RagResult<Option<u64>> {
        let table = self.open_table().await?;
        let results = table
            .query()
            .select(lancedb::query::Select::columns(&["seq"]))
            .execute()
            .await
            .context("Failed to scan seq column")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .context("Failed to read seq column")?;

        let mut max = None;
        for batch in &batches {
            if let Some(col) = batch
                .column_by_name("seq")
                .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
            {
                for i in 0..col.len() {
                    max = max.max(Some(col.value(i)));
                }
            }
        }
        Ok(max)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn check_dimensions(&self, entries: &[(Vec<f32>, DocumentChunk)]) -> RagResult<()> {
        match entries.iter().find(|(v, _)| v.len() != self.dimension) {
            Some((vector, _)) => Err(RagError::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
            }),
            None => Ok(()),
        }
    }

    /// Append one row per `(vector, chunk)`. Either every row is written or
    /// none is. Returns the number of rows added.
    pub async fn upsert(&self, entries: Vec<(Vec<f32>, DocumentChunk)>) -> RagResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        self.check_dimensions(&entries)?;

        let table = self.open_table().await?;
        let mut next_seq = self.next_seq.lock().await;
        self.append(&table, &mut next_seq, entries).await
    }

    /// Write `entries`, then drop the rows of `sources` that predate them.
    ///
    /// The new rows are committed before anything is deleted, so a failed
    /// write leaves the previous rows of every source in place.
    pub async fn replace_sources(
        &self,
        sources: &BTreeSet<String>,
        entries: Vec<(Vec<f32>, DocumentChunk)>,
    ) -> RagResult<usize> {
        self.check_dimensions(&entries)?;

        let table = self.open_table().await?;
        let mut next_seq = self.next_seq.lock().await;
        let first_new = *next_seq;
        let added = self.append(&table, &mut next_seq, entries).await?;

        for source in sources {
            let predicate = format!("{} AND seq < {}", source_predicate(source), first_new);
            table
                .delete(&predicate)
                .await
                .with_context(|| format!("Failed to remove previous rows of {}", source))?;
            tracing::debug!(source = %source, before_seq = first_new, "Replaced previous entries");
        }
        Ok(added)
    }

    async fn append(
        &self,
        table: &lancedb::Table,
        next_seq: &mut u64,
        entries: Vec<(Vec<f32>, DocumentChunk)>,
    ) -> RagResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let created_at = chrono::Utc::now().timestamp();
        let records: Vec<ChunkRecord> = entries
            .into_iter()
            .enumerate()
            .map(|(i, (vector, chunk))| ChunkRecord {
                id: uuid::Uuid::new_v4().to_string(),
                seq: *next_seq + i as u64,
                source: chunk.source_path,
                page: chunk.page_number,
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                vector,
                created_at,
            })
            .collect();
        let len = records.len();

        let batch = self.record_batch(&records)?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)], self.schema());
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to insert chunks")?;

        *next_seq += len as u64;
        tracing::debug!("Inserted {} chunks into LanceDB", len);
        Ok(len)
    }

    fn record_batch(&self, records: &[ChunkRecord]) -> RagResult<RecordBatch> {
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        let sources: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
        let pages: Vec<u32> = records.iter().map(|r| r.page).collect();
        let chunk_indices: Vec<u32> = records.iter().map(|r| r.chunk_index).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let created_ats: Vec<i64> = records.iter().map(|r| r.created_at).collect();

        // Build FixedSizeListArray for vectors
        let flat_vectors: Vec<f32> = records.iter().flat_map(|r| r.vector.iter().copied()).collect();
        let values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(UInt64Array::from(seqs)),
                Arc::new(StringArray::from(sources)),
                Arc::new(UInt32Array::from(pages)),
                Arc::new(UInt32Array::from(chunk_indices)),
                Arc::new(StringArray::from(texts)),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(Int64Array::from(created_ats)),
            ],
        )
        .context("Failed to create RecordBatch")?;
        Ok(batch)
    }

    /// The `k` nearest chunks to `vector`, nearest first. Fewer than `k` come
    /// back when the store holds fewer rows; ties keep insertion order.
    pub async fn query(&self, vector: &[f32], k: usize) -> RagResult<Vec<ScoredChunk>> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
            });
        }
        if k == 0 || self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;
        let distance_type = match self.metric {
            DistanceMetric::Cosine => lancedb::DistanceType::Cosine,
            DistanceMetric::L2 => lancedb::DistanceType::L2,
        };

        let results = table
            .query()
            .nearest_to(vector)
            .context("Invalid query vector")?
            .distance_type(distance_type)
            .limit(k)
            .execute()
            .await
            .context("LanceDB vector search failed")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .context("Failed to read search results")?;

        let mut hits = extract_hits_from_batches(&batches)?;
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.seq.cmp(&b.seq)));
        hits.truncate(k);
        Ok(hits)
    }

    pub async fn count(&self) -> RagResult<usize> {
        let table = self.open_table().await?;
        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    pub async fn count_by_source(&self, source: &str) -> RagResult<usize> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(Some(source_predicate(source)))
            .await
            .context("Failed to count rows by source")?;
        Ok(count)
    }

    /// Remove every row of `source`, returning how many were deleted.
    pub async fn delete_by_source(&self, source: &str) -> RagResult<usize> {
        let table = self.open_table().await?;
        let _guard = self.next_seq.lock().await;
        let count_before = table.count_rows(None).await.context("Failed to count rows")?;
        table
            .delete(&source_predicate(source))
            .await
            .context("Failed to delete by source")?;
        let count_after = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count_before - count_after)
    }

    /// Distinct sources currently indexed, sorted.
    pub async fn sources(&self) -> RagResult<Vec<String>> {
        let table = self.open_table().await?;
        let results = table
            .query()
            .select(lancedb::query::Select::columns(&["source"]))
            .execute()
            .await
            .context("Failed to query sources")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .context("Failed to read sources")?;
        let mut sources = BTreeSet::new();
        for batch in &batches {
            if let Some(col) = batch
                .column_by_name("source")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            {
                for i in 0..col.len() {
                    sources.insert(col.value(i).to_string());
                }
            }
        }
        Ok(sources.into_iter().collect())
    }

    pub async fn clear(&self) -> RagResult<()> {
        let mut next_seq = self.next_seq.lock().await;
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        if names.contains(&self.table_name) {
            self.db
                .drop_table(&self.table_name, &[])
                .await
                .context("Failed to drop table")?;
        }
        self.ensure_table().await?;
        *next_seq = 0;
        Ok(())
    }
}

fn source_predicate(source: &str) -> String {
    format!("source = '{}'", source.replace('\'', "''"))
}

fn extract_hits_from_batches(batches: &[RecordBatch]) -> RagResult<Vec<ScoredChunk>> {
    let mut hits = Vec::new();
    for batch in batches {
        let seqs = batch.column_by_name("seq").and_then(|c| c.as_any().downcast_ref::<UInt64Array>());
        let sources = batch.column_by_name("source").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let pages = batch.column_by_name("page").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let chunk_indices = batch.column_by_name("chunk_index").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let texts = batch.column_by_name("text").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(seqs), Some(sources), Some(pages), Some(texts)) = (seqs, sources, pages, texts) else {
            return Err(anyhow!("search result is missing chunk columns").into());
        };

        for i in 0..batch.num_rows() {
            hits.push(ScoredChunk {
                chunk: DocumentChunk {
                    text: texts.value(i).to_string(),
                    source_path: sources.value(i).to_string(),
                    page_number: pages.value(i),
                    chunk_index: chunk_indices.map(|c| c.value(i)).unwrap_or(0),
                },
                distance: distances.map(|d| d.value(i)).unwrap_or(0.0),
                seq: seqs.value(i),
            });
        }
    }
    Ok(hits)
}
