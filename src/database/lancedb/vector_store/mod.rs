
use super::VectorRecord;
use crate::config::{Config, ConfigError};
use crate::database::{Visibility, VisibilityFilter};
use crate::{CoachError, Result};
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// IVF-PQ training needs at least this many rows; smaller tables are searched exhaustively
const MIN_ROWS_FOR_INDEX: usize = 256;

/// LanceDB table of chunk vectors, searched by cosine distance
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    dimension: usize,
    list_size: i32,
}

/// A nearest-neighbour hit from [`VectorStore::search_similar`]
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub lesson_id: String,
    /// Cosine similarity, `1 - distance`
    pub score: f32,
    pub distance: f32,
}

fn db_error(context: &str, e: impl std::fmt::Display) -> CoachError {
    CoachError::Database(format!("{context}: {e}"))
}

impl VectorStore {
    /// Open the vector index described by the configuration
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(
            &config.vector_index_uri(),
            &config.vector_index.table_name,
            config.embedding_dimension(),
        )
        .await
    }

    /// Connect to `uri` and make sure `table_name` exists with vectors of `dimension`
    ///
    /// An existing table with a different vector width is refused rather than
    /// recreated, since its rows could never be compared with new queries.
    #[inline]
    pub async fn open(uri: &str, table_name: &str, dimension: usize) -> Result<Self> {
        debug!("Opening LanceDB at {} (table {})", uri, table_name);
        let list_size =
            i32::try_from(dimension).map_err(|_| ConfigError::VectorWidthOutOfRange(dimension))?;

        let local_path = uri
            .strip_prefix("file://")
            .or_else(|| (!uri.contains("://")).then_some(uri));
        if let Some(path) = local_path {
            std::fs::create_dir_all(path)
                .map_err(|e| db_error("Failed to create vector database directory", e))?;
        }

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| db_error("Failed to connect to LanceDB", e))?;

        let store = Self {
            connection,
            table_name: table_name.to_string(),
            dimension,
            list_size,
        };
        store.initialize_table().await?;

        info!(
            "Vector store ready ({} dimensions, table {})",
            dimension, table_name
        );
        Ok(store)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| db_error("Failed to list tables", e))?;

        if table_names.contains(&self.table_name) {
            let existing = self.detect_existing_dimension().await?;
            if existing != self.dimension {
                return Err(ConfigError::DimensionMismatch {
                    backend: "lancedb".to_string(),
                    expected: self.dimension,
                    actual: existing,
                }
                .into());
            }
            debug!("Using existing table {}", self.table_name);
            return Ok(());
        }

        info!(
            "Creating vector table {} with {} dimensions",
            self.table_name, self.dimension
        );
        self.connection
            .create_empty_table(&self.table_name, self.create_schema())
            .execute()
            .await
            .map_err(|e| db_error("Failed to create table", e))?;
        Ok(())
    }

    async fn detect_existing_dimension(&self) -> Result<usize> {
        let schema = self
            .open_table()
            .await?
            .schema()
            .await
            .map_err(|e| db_error("Failed to get table schema", e))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                CoachError::Database("Could not find vector column or determine dimension".into())
            })
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.list_size,
                ),
                false,
            ),
            Field::new("lesson_id", DataType::Utf8, false),
            Field::new("owner_id", DataType::Utf8, false),
            Field::new("visibility", DataType::Utf8, false),
        ]))
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| db_error("Failed to open table", e))
    }

    /// Append records; every vector must have the table's dimension
    #[inline]
    pub async fn add_records(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            debug!("No vectors to store");
            return Ok(());
        }

        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dimension) {
            return Err(ConfigError::DimensionMismatch {
                backend: "lancedb".to_string(),
                expected: self.dimension,
                actual: bad.vector.len(),
            }
            .into());
        }

        let batch = self.create_record_batch(records)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        self.open_table()
            .await?
            .add(reader)
            .execute()
            .await
            .map_err(|e| db_error("Failed to insert vectors", e))?;

        debug!("Stored {} vectors", records.len());
        Ok(())
    }

    fn create_record_batch(&self, records: &[VectorRecord]) -> Result<RecordBatch> {
        let flat_values: Vec<f32> = records
            .iter()
            .flat_map(|r| r.vector.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.list_size,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| db_error("Failed to create vector array", e))?;

        let strings = |f: fn(&VectorRecord) -> &str| -> Arc<dyn Array> {
            Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
        };

        let arrays: Vec<Arc<dyn Array>> = vec![
            strings(|r| r.id.as_str()),
            Arc::new(vector_array),
            strings(|r| r.lesson_id.as_str()),
            strings(|r| r.owner_id.as_str()),
            strings(|r| r.visibility.as_str()),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| db_error("Failed to create record batch", e))
    }

    /// Cosine nearest neighbours visible under `filter`, closest first
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: &VisibilityFilter,
    ) -> Result<Vec<VectorHit>> {
        if query_vector.len() != self.dimension {
            return Err(ConfigError::DimensionMismatch {
                backend: "lancedb".to_string(),
                expected: self.dimension,
                actual: query_vector.len(),
            }
            .into());
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        debug!("Searching {} nearest vectors", limit);
        let mut stream = self
            .open_table()
            .await?
            .vector_search(query_vector)
            .map_err(|e| db_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .only_if(filter.to_predicate())
            .execute()
            .await
            .map_err(|e| db_error("Failed to execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| db_error("Failed to read result stream", e))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        debug!("Vector search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Remove every vector belonging to a lesson
    #[inline]
    pub async fn delete_lesson(&self, lesson_id: &str) -> Result<()> {
        let predicate = format!("lesson_id = '{}'", lesson_id.replace('\'', "''"));
        self.open_table()
            .await?
            .delete(&predicate)
            .await
            .map_err(|e| db_error("Failed to delete lesson vectors", e))?;

        debug!("Deleted vectors for lesson {}", lesson_id);
        Ok(())
    }

    #[inline]
    pub async fn update_visibility(&self, lesson_id: &str, visibility: Visibility) -> Result<()> {
        self.open_table()
            .await?
            .update()
            .only_if(format!("lesson_id = '{}'", lesson_id.replace('\'', "''")))
            .column("visibility", format!("'{}'", visibility.as_str()))
            .execute()
            .await
            .map_err(|e| db_error("Failed to update lesson visibility", e))?;

        debug!("Set vectors of lesson {} to {}", lesson_id, visibility);
        Ok(())
    }

    #[inline]
    pub async fn count(&self) -> Result<usize> {
        self.open_table()
            .await?
            .count_rows(None)
            .await
            .map_err(|e| db_error("Failed to count rows", e))
    }

    /// Build an IVF-PQ cosine index once the table is large enough to train one
    ///
    /// Returns whether an index was created.
    #[inline]
    pub async fn create_vector_index(&self) -> Result<bool> {
        let rows = self.count().await?;
        if rows < MIN_ROWS_FOR_INDEX {
            debug!(
                "Skipping vector index: {} rows (need {})",
                rows, MIN_ROWS_FOR_INDEX
            );
            return Ok(false);
        }

        self.open_table()
            .await?
            .create_index(
                &["vector"],
                Index::IvfPq(IvfPqIndexBuilder::default().distance_type(DistanceType::Cosine)),
            )
            .execute()
            .await
            .map_err(|e| db_error("Failed to create vector index", e))?;

        info!("Vector index created over {} rows", rows);
        Ok(true)
    }

    /// Compact files and prune old versions
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        self.open_table()
            .await?
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| db_error("Failed to optimize table", e))?;

        info!("Vector database optimization completed");
        Ok(())
    }

    /// Whether the table can be listed, opened and counted
    #[inline]
    pub async fn validate_integrity(&self) -> bool {
        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list tables during integrity check: {}", e);
                return false;
            }
        };

        if !table_names.contains(&self.table_name) {
            warn!("Vector table {} missing", self.table_name);
            return false;
        }

        match self.count().await {
            Ok(rows) => {
                debug!("Vector index integrity check passed, {} rows", rows);
                true
            }
            Err(e) => {
                error!("Vector index integrity check failed: {}", e);
                false
            }
        }
    }

    /// Drop the table and recreate it empty
    #[inline]
    pub async fn reset(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| db_error("Failed to list tables for drop", e))?;

        if table_names.contains(&self.table_name) {
            info!("Dropping vector table {}", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| db_error("Failed to drop table", e))?;
        }

        self.initialize_table().await
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| CoachError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| CoachError::Database(format!("Invalid {name} column type")))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<VectorHit>> {
    let ids = string_column(batch, "id")?;
    let lesson_ids = string_column(batch, "lesson_id")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| CoachError::Database("Missing _distance column".into()))?;

    Ok((0..batch.num_rows())
        .map(|row| {
            let distance = distances.value(row);
            VectorHit {
                chunk_id: ids.value(row).to_string(),
                lesson_id: lesson_ids.value(row).to_string(),
                score: 1.0 - distance,
                distance,
            }
        })
        .collect())
}
