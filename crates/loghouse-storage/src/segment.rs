//! Segment Compactor and Reader
//!
//! A segment is an immutable Parquet file produced from exactly one detached
//! batch.
//!
//! ## Layout
//!
//! | column        | type   | nullable |
//! |---------------|--------|----------|
//! | `p_timestamp` | Int64  | no       |
//! | `p_origin`    | Utf8   | no       |
//! | `p_sequence`  | UInt64 | no       |
//! | schema fields | per field type, in name order | yes |
//!
//! Rows are stably sorted by timestamp, so records with equal timestamps keep
//! their arrival order.
//!
//! ## Determinism
//!
//! Writer properties are fixed (including `created_by`), so the same batch
//! always encodes to byte-identical output. The segment's checksum (hex
//! SHA-256 of the bytes) names its storage key,
//! `{stream}/segments/{checksum}.parquet`, which makes re-uploads of a retried
//! batch overwrite rather than duplicate.
//!
//! ## Worker pool
//!
//! Encoding is CPU-bound. [`SegmentCompactor::compact`] takes a permit from a
//! semaphore sized by `compaction_workers` and runs the encoder on the
//! blocking thread pool.

use crate::config::{CompactionConfig, Compression};
use crate::error::{Error, Result};
use crate::staging::DetachedBatch;
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema as ArrowSchema, UInt64Type};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use loghouse_catalog::ManifestEntry;
use loghouse_core::{
    FieldType, FieldValue, Record, Schema, TimeRange, ORIGIN_COLUMN, SEQUENCE_COLUMN,
    TIMESTAMP_COLUMN,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

const CREATED_BY: &str = "loghouse";

/// Encoded segment plus the manifest entry describing it.
#[derive(Debug, Clone)]
pub struct CompactedSegment {
    pub entry: ManifestEntry,
    pub bytes: Bytes,
    /// Batch this segment was produced from
    pub batch_no: u64,
}

/// Storage key for a segment of `stream` with `checksum`.
pub fn segment_location(stream: &str, checksum: &str) -> String {
    format!("{}/segments/{}.parquet", stream, checksum)
}

/// Hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Converts detached batches into segments on a bounded worker pool.
#[derive(Debug, Clone)]
pub struct SegmentCompactor {
    writer: String,
    compression: Compression,
    permits: Arc<Semaphore>,
}

impl SegmentCompactor {
    /// `writer` is the node id recorded in produced manifest entries.
    pub fn new(writer: impl Into<String>, config: &CompactionConfig) -> Self {
        Self {
            writer: writer.into(),
            compression: config.compression,
            permits: Arc::new(Semaphore::new(config.compaction_workers.max(1))),
        }
    }

    /// Compact `batch` into a segment.
    ///
    /// # Errors
    ///
    /// - `EmptyBatch`: the batch has no records
    /// - `SegmentError`: encoding failed
    #[tracing::instrument(skip(self, batch), fields(stream = %batch.stream, batch_no = batch.batch_no))]
    pub async fn compact(&self, batch: DetachedBatch) -> Result<CompactedSegment> {
        if batch.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::SegmentError("compaction pool closed".to_string()))?;

        let writer = self.writer.clone();
        let compression = self.compression;
        let segment = tokio::task::spawn_blocking(move || encode(&batch, &writer, compression))
            .await
            .map_err(|e| Error::SegmentError(format!("compaction task failed: {}", e)))??;

        tracing::debug!(
            rows = segment.entry.row_count,
            size = segment.entry.size_bytes,
            checksum = %segment.entry.checksum,
            "Batch compacted"
        );
        Ok(segment)
    }
}

/// Encode `batch` synchronously.
pub fn encode(batch: &DetachedBatch, writer: &str, compression: Compression) -> Result<CompactedSegment> {
    if batch.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let mut rows: Vec<&Record> = batch.records.iter().collect();
    // Vec::sort_by_key is stable
    rows.sort_by_key(|r| r.timestamp);

    let arrow_schema = Arc::new(arrow_schema(&batch.schema));
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.timestamp))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.origin.as_str()))),
        Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.sequence))),
    ];
    for (name, ty) in batch.schema.fields() {
        columns.push(field_column(&rows, name, ty)?);
    }

    let record_batch = RecordBatch::try_new(arrow_schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(parquet_compression(compression))
        .set_created_by(CREATED_BY.to_string())
        .build();

    let mut buf = Vec::new();
    let mut parquet_writer = ArrowWriter::try_new(&mut buf, arrow_schema, Some(props))?;
    parquet_writer.write(&record_batch)?;
    parquet_writer.close()?;

    let bytes = Bytes::from(buf);
    let checksum = checksum(&bytes);
    let min_timestamp = rows.first().map_or(0, |r| r.timestamp);
    let max_timestamp = rows.last().map_or(0, |r| r.timestamp);

    let entry = ManifestEntry {
        segment_id: format!("{}-{}", batch.stream, &checksum[..16]),
        stream: batch.stream.clone(),
        min_timestamp,
        max_timestamp,
        row_count: rows.len() as u64,
        location: segment_location(&batch.stream, &checksum),
        checksum,
        size_bytes: bytes.len() as u64,
        writer: writer.to_string(),
        writer_sequence: 0,
        committed_at: 0,
    };

    Ok(CompactedSegment {
        entry,
        bytes,
        batch_no: batch.batch_no,
    })
}

fn arrow_schema(schema: &Schema) -> ArrowSchema {
    let mut fields = vec![
        Field::new(TIMESTAMP_COLUMN, DataType::Int64, false),
        Field::new(ORIGIN_COLUMN, DataType::Utf8, false),
        Field::new(SEQUENCE_COLUMN, DataType::UInt64, false),
    ];
    for (name, ty) in schema.fields() {
        let data_type = match ty {
            FieldType::Bool => DataType::Boolean,
            FieldType::Int => DataType::Int64,
            FieldType::Float => DataType::Float64,
            FieldType::Text => DataType::Utf8,
        };
        fields.push(Field::new(name, data_type, true));
    }
    ArrowSchema::new(fields)
}

fn field_column(rows: &[&Record], name: &str, ty: FieldType) -> Result<ArrayRef> {
    let mismatch = |value: &FieldValue| {
        Error::SegmentError(format!(
            "field '{}' holds {:?}, schema says {}",
            name, value, ty
        ))
    };

    let array: ArrayRef = match ty {
        FieldType::Bool => {
            let values = rows
                .iter()
                .map(|r| match r.get(name) {
                    None | Some(FieldValue::Null) => Ok(None),
                    Some(FieldValue::Bool(b)) => Ok(Some(*b)),
                    Some(other) => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(BooleanArray::from(values))
        }
        FieldType::Int => {
            let values = rows
                .iter()
                .map(|r| match r.get(name) {
                    None | Some(FieldValue::Null) => Ok(None),
                    Some(FieldValue::Int(i)) => Ok(Some(*i)),
                    Some(other) => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(Int64Array::from(values))
        }
        FieldType::Float => {
            let values = rows
                .iter()
                .map(|r| match r.get(name) {
                    None | Some(FieldValue::Null) => Ok(None),
                    Some(FieldValue::Float(f)) => Ok(Some(*f)),
                    Some(other) => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(Float64Array::from(values))
        }
        FieldType::Text => {
            let values = rows
                .iter()
                .map(|r| match r.get(name) {
                    None | Some(FieldValue::Null) => Ok(None),
                    Some(FieldValue::Text(s)) => Ok(Some(s.as_str())),
                    Some(other) => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(StringArray::from(values))
        }
    };
    Ok(array)
}

fn parquet_compression(compression: Compression) -> ParquetCompression {
    match compression {
        Compression::Uncompressed => ParquetCompression::UNCOMPRESSED,
        Compression::Snappy => ParquetCompression::SNAPPY,
        Compression::Gzip => ParquetCompression::GZIP(GzipLevel::default()),
        Compression::Lz4 => ParquetCompression::LZ4_RAW,
        Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
    }
}

/// Decodes segment bytes back into records.
pub struct SegmentReader;

impl SegmentReader {
    /// Verify `bytes` against `expected_checksum` and return rows within `range`.
    ///
    /// Rows come back in segment order (timestamp, then arrival). Null field
    /// values are omitted from the returned records.
    pub fn read(
        location: &str,
        bytes: Bytes,
        expected_checksum: &str,
        range: TimeRange,
    ) -> Result<Vec<Record>> {
        let actual = checksum(&bytes);
        if actual != expected_checksum {
            return Err(Error::ChecksumMismatch {
                location: location.to_string(),
                expected: expected_checksum.to_string(),
                actual,
            });
        }

        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
        let mut records = Vec::new();
        for batch in reader {
            let batch = batch?;
            decode_batch(&batch, &range, &mut records)?;
        }
        Ok(records)
    }
}

fn decode_batch(batch: &RecordBatch, range: &TimeRange, out: &mut Vec<Record>) -> Result<()> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .ok_or_else(|| Error::SegmentError(format!("segment has no '{}' column", name)))
    };
    let timestamps = column(TIMESTAMP_COLUMN)?.as_primitive_opt::<Int64Type>();
    let origins = column(ORIGIN_COLUMN)?.as_string_opt::<i32>();
    let sequences = column(SEQUENCE_COLUMN)?.as_primitive_opt::<UInt64Type>();
    let (Some(timestamps), Some(origins), Some(sequences)) = (timestamps, origins, sequences)
    else {
        return Err(Error::SegmentError("unexpected system column types".to_string()));
    };

    let schema = batch.schema();
    let field_columns: Vec<(&str, &ArrayRef)> = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| (field.name().as_str(), array))
        .filter(|(name, _)| {
            *name != TIMESTAMP_COLUMN && *name != ORIGIN_COLUMN && *name != SEQUENCE_COLUMN
        })
        .collect();

    for row in 0..batch.num_rows() {
        let timestamp = timestamps.value(row);
        if !range.contains(timestamp) {
            continue;
        }

        let mut fields = BTreeMap::new();
        for (name, array) in &field_columns {
            if array.is_null(row) {
                continue;
            }
            fields.insert(name.to_string(), field_value(name, array, row)?);
        }

        out.push(Record {
            timestamp,
            origin: origins.value(row).to_string(),
            sequence: sequences.value(row),
            fields,
        });
    }
    Ok(())
}

fn field_value(name: &str, array: &ArrayRef, row: usize) -> Result<FieldValue> {
    let value = match array.data_type() {
        DataType::Boolean => array.as_boolean_opt().map(|a| FieldValue::Bool(a.value(row))),
        DataType::Int64 => array
            .as_primitive_opt::<Int64Type>()
            .map(|a| FieldValue::Int(a.value(row))),
        DataType::Float64 => array
            .as_primitive_opt::<Float64Type>()
            .map(|a| FieldValue::Float(a.value(row))),
        DataType::Utf8 => array
            .as_string_opt::<i32>()
            .map(|a| FieldValue::Text(a.value(row).to_string())),
        _ => None,
    };
    value.ok_or_else(|| {
        Error::SegmentError(format!(
            "unsupported column type {} for field '{}'",
            array.data_type(),
            name
        ))
    })
}
