//! Batch to Parquet serialization.
//!
//! Column types are inferred per batch from the JSON values. Mixing kinds
//! under one column fails the whole batch rather than coercing.

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use bytes::Bytes;
use object_store::PutPayload;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;

use crate::config::{ParquetCompression, SinkConfig};
use crate::emit;
use crate::error::{
    ParquetWriteSnafu, RecordBatchSnafu, SchemaConflictSnafu, SerializeError, StagingSnafu,
};
use crate::event::{EVENT_TYPE, INGESTION_TIMESTAMP, NormalizedEvent, TIMESTAMP, USER_ID};
use crate::metrics::events::ParquetWriteCompleted;

/// Inferred kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Null,
    Utf8,
    Boolean,
    Int64,
    Float64,
    /// Objects and arrays, stored as compact JSON text.
    Json,
}

impl ColumnKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnKind::Null,
            Value::String(_) => ColumnKind::Utf8,
            Value::Bool(_) => ColumnKind::Boolean,
            Value::Number(n) if n.is_i64() => ColumnKind::Int64,
            Value::Number(_) => ColumnKind::Float64,
            Value::Array(_) | Value::Object(_) => ColumnKind::Json,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ColumnKind::Null => "null",
            ColumnKind::Utf8 => "string",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Int64 => "int64",
            ColumnKind::Float64 => "float64",
            ColumnKind::Json => "json",
        }
    }

    /// Combine two observations of one column. `None` on a kind conflict.
    fn unify(self, other: Self) -> Option<Self> {
        use ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Null, k) | (k, Null) => Some(k),
            (Int64, Float64) | (Float64, Int64) => Some(Float64),
            _ => None,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Null | ColumnKind::Utf8 | ColumnKind::Json => DataType::Utf8,
        }
    }
}

/// Values of one column, row-aligned with the batch.
struct ColumnValues<'a> {
    name: &'a str,
    values: Vec<Option<&'a Value>>,
}

impl ColumnValues<'_> {
    fn kind(&self) -> Result<ColumnKind, SerializeError> {
        let mut kind = ColumnKind::Null;
        for value in self.values.iter().flatten() {
            let found = ColumnKind::of(value);
            kind = kind.unify(found).context(SchemaConflictSnafu {
                column: self.name,
                expected: kind.name(),
                found: found.name(),
            })?;
        }
        Ok(kind)
    }

    fn build(&self, kind: ColumnKind) -> ArrayRef {
        match kind {
            ColumnKind::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(self.values.len());
                for value in &self.values {
                    builder.append_option(value.and_then(Value::as_bool));
                }
                Arc::new(builder.finish())
            }
            ColumnKind::Int64 => {
                let mut builder = Int64Builder::with_capacity(self.values.len());
                for value in &self.values {
                    builder.append_option(value.and_then(Value::as_i64));
                }
                Arc::new(builder.finish())
            }
            ColumnKind::Float64 => {
                let mut builder = Float64Builder::with_capacity(self.values.len());
                for value in &self.values {
                    builder.append_option(value.and_then(Value::as_f64));
                }
                Arc::new(builder.finish())
            }
            ColumnKind::Null | ColumnKind::Utf8 | ColumnKind::Json => {
                let mut builder = StringBuilder::new();
                for value in &self.values {
                    match value {
                        Some(Value::String(s)) => builder.append_value(s),
                        Some(v @ (Value::Array(_) | Value::Object(_))) => {
                            builder.append_value(v.to_string())
                        }
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
        }
    }
}

/// Convert a batch of normalized events into one Arrow record batch.
///
/// Columns are `user_id`, `event_type`, `timestamp`, `ingestion_timestamp`,
/// then every attribute in first-seen order.
pub fn to_record_batch(events: &[NormalizedEvent]) -> Result<RecordBatch, SerializeError> {
    let rows = events.len();

    let user_ids = ColumnValues {
        name: USER_ID,
        values: events.iter().map(|e| Some(&e.user_id)).collect(),
    };

    let mut attributes: Vec<ColumnValues<'_>> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (row, event) in events.iter().enumerate() {
        for (key, value) in &event.attributes {
            let idx = *positions.entry(key.as_str()).or_insert_with(|| {
                attributes.push(ColumnValues {
                    name: key.as_str(),
                    values: Vec::with_capacity(rows),
                });
                attributes.len() - 1
            });
            let column = &mut attributes[idx];
            column.values.resize(row, None);
            column.values.push(Some(value));
        }
    }
    for column in &mut attributes {
        column.values.resize(rows, None);
    }

    let timestamp_type = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
    let user_id_kind = user_ids.kind()?;

    let mut fields = vec![
        Field::new(USER_ID, user_id_kind.data_type(), false),
        Field::new(EVENT_TYPE, DataType::Utf8, false),
        Field::new(TIMESTAMP, timestamp_type.clone(), false),
        Field::new(INGESTION_TIMESTAMP, timestamp_type, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        user_ids.build(user_id_kind),
        Arc::new(arrow::array::StringArray::from_iter_values(
            events.iter().map(|e| e.event_type.as_str()),
        )),
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(
                events.iter().map(|e| e.timestamp.timestamp_micros()),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(
                events.iter().map(|e| e.ingestion_timestamp.timestamp_micros()),
            )
            .with_timezone("UTC"),
        ),
    ];

    for column in &attributes {
        let kind = column.kind()?;
        fields.push(Field::new(column.name, kind.data_type(), true));
        columns.push(column.build(kind));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context(RecordBatchSnafu)
}

/// A serialized batch, in memory or in a staging file.
#[derive(Debug)]
pub struct Artifact {
    pub rows: usize,
    pub size: u64,
    body: ArtifactBody,
}

#[derive(Debug)]
enum ArtifactBody {
    Memory(Bytes),
    /// Removed from disk when dropped.
    Staged(NamedTempFile),
}

impl Artifact {
    /// Payload for upload.
    pub async fn payload(&self) -> Result<PutPayload, std::io::Error> {
        match &self.body {
            ArtifactBody::Memory(bytes) => Ok(PutPayload::from(bytes.clone())),
            ArtifactBody::Staged(file) => {
                let bytes = tokio::fs::read(file.path()).await?;
                Ok(PutPayload::from(Bytes::from(bytes)))
            }
        }
    }

    /// Path of the staging file, if any.
    pub fn staging_path(&self) -> Option<&Path> {
        match &self.body {
            ArtifactBody::Memory(_) => None,
            ArtifactBody::Staged(file) => Some(file.path()),
        }
    }
}

/// Serializes batches into Parquet artifacts.
#[derive(Debug, Clone)]
pub struct ColumnarWriter {
    compression: ParquetCompression,
    staging_dir: Option<PathBuf>,
}

impl ColumnarWriter {
    pub fn new(compression: ParquetCompression, staging_dir: Option<PathBuf>) -> Self {
        Self {
            compression,
            staging_dir,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(config.compression, config.staging_dir.clone())
    }

    /// Serialize `events`. Synchronous and local.
    pub fn write(&self, events: &[NormalizedEvent]) -> Result<Artifact, SerializeError> {
        let start = Instant::now();
        let batch = to_record_batch(events)?;
        let properties = self.writer_properties();

        let artifact = match &self.staging_dir {
            None => {
                let mut buffer = Vec::new();
                write_parquet(&mut buffer, &batch, properties)?;
                Artifact {
                    rows: batch.num_rows(),
                    size: buffer.len() as u64,
                    body: ArtifactBody::Memory(Bytes::from(buffer)),
                }
            }
            Some(dir) => {
                let mut file = tempfile::Builder::new()
                    .prefix("clickstream-")
                    .suffix(".parquet")
                    .tempfile_in(dir)
                    .context(StagingSnafu)?;
                write_parquet(file.as_file_mut(), &batch, properties)?;
                let size = file.as_file().metadata().context(StagingSnafu)?.len();
                Artifact {
                    rows: batch.num_rows(),
                    size,
                    body: ArtifactBody::Staged(file),
                }
            }
        };

        emit!(ParquetWriteCompleted {
            duration: start.elapsed(),
            bytes: artifact.size as usize,
        });
        Ok(artifact)
    }

    fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Lz4 => Compression::LZ4,
        };
        WriterProperties::builder()
            .set_compression(compression)
            .build()
    }
}

fn write_parquet<W: std::io::Write + Send>(
    sink: W,
    batch: &RecordBatch,
    properties: WriterProperties,
) -> Result<(), SerializeError> {
    let mut writer =
        ArrowWriter::try_new(sink, batch.schema(), Some(properties)).context(ParquetWriteSnafu)?;
    writer.write(batch).context(ParquetWriteSnafu)?;
    writer.close().context(ParquetWriteSnafu)?;
    Ok(())
}
