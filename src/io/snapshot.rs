//! Parquet sample snapshot read/write operations
//!
//! One file holds one sample. Records, diagnostics and the metadata row share
//! a single nullable-column schema; the populated columns tell the row kinds
//! apart.

use crate::models::{
    Diagnostic, DiagnosticKind, DirectoryMetrics, EntityMetrics, FileMetrics, MetricRecord, Sample,
};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
    UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::path::Path;
use std::sync::Arc;

/// Return the Arrow schema shared by snapshot writers and readers.
#[must_use]
pub fn snapshot_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("path", DataType::Utf8, true),
        Field::new("kind", DataType::Utf8, true),
        Field::new("size", DataType::UInt64, true),
        Field::new("last_modified", DataType::Float64, true),
        Field::new("creation_time", DataType::Float64, true),
        Field::new("owner_uid", DataType::UInt32, true),
        Field::new("owner_gid", DataType::UInt32, true),
        Field::new("mode", DataType::UInt32, true),
        Field::new("content_md5", DataType::Utf8, true),
        Field::new("content_sha256", DataType::Utf8, true),
        Field::new("pattern_found", DataType::Boolean, true),
        Field::new("file_count", DataType::UInt64, true),
        Field::new("dir_count", DataType::UInt64, true),
        Field::new("children_json", DataType::Utf8, true),
        Field::new("meta_watch_group", DataType::Utf8, true),
        Field::new("meta_epoch", DataType::Int64, true),
        Field::new("error_subject", DataType::Utf8, true),
        Field::new("error_kind", DataType::Utf8, true),
        Field::new("error_code", DataType::Utf8, true),
        Field::new("error_message", DataType::Utf8, true),
    ]))
}

/// Column buffers in schema order. Every row pushes to every column.
#[derive(Default)]
struct Columns {
    path: Vec<Option<String>>,
    kind: Vec<Option<&'static str>>,
    size: Vec<Option<u64>>,
    last_modified: Vec<Option<f64>>,
    creation_time: Vec<Option<f64>>,
    owner_uid: Vec<Option<u32>>,
    owner_gid: Vec<Option<u32>>,
    mode: Vec<Option<u32>>,
    content_md5: Vec<Option<String>>,
    content_sha256: Vec<Option<String>>,
    pattern_found: Vec<Option<bool>>,
    file_count: Vec<Option<u64>>,
    dir_count: Vec<Option<u64>>,
    children_json: Vec<Option<String>>,
    meta_watch_group: Vec<Option<String>>,
    meta_epoch: Vec<Option<i64>>,
    error_subject: Vec<Option<String>>,
    error_kind: Vec<Option<&'static str>>,
    error_code: Vec<Option<String>>,
    error_message: Vec<Option<String>>,
}

impl Columns {
    fn push_record(&mut self, record: &MetricRecord) -> Result<()> {
        self.path.push(Some(record.path.clone()));
        self.kind.push(Some(record.kind().as_str()));
        self.last_modified.push(Some(record.last_modified));
        self.creation_time.push(Some(record.creation_time));
        self.owner_uid.push(Some(record.owner_uid));
        self.owner_gid.push(Some(record.owner_gid));
        self.mode.push(Some(record.mode));

        match &record.entity {
            EntityMetrics::File(m) => {
                self.size.push(Some(m.size));
                self.content_md5.push(m.content_md5.clone());
                self.content_sha256.push(m.content_sha256.clone());
                self.pattern_found.push(m.pattern_found);
                self.file_count.push(None);
                self.dir_count.push(None);
                self.children_json.push(None);
            }
            EntityMetrics::Directory(m) => {
                self.size.push(Some(m.total_size));
                self.content_md5.push(None);
                self.content_sha256.push(None);
                self.pattern_found.push(None);
                self.file_count.push(Some(m.file_count));
                self.dir_count.push(Some(m.dir_count));
                let children = m
                    .children
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(Error::other)?;
                self.children_json.push(children);
            }
        }

        self.meta_watch_group.push(None);
        self.meta_epoch.push(None);
        self.push_no_error();
        Ok(())
    }

    fn push_diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.push_no_entity();
        self.meta_watch_group.push(None);
        self.meta_epoch.push(None);
        self.error_subject.push(Some(diagnostic.subject.clone()));
        self.error_kind.push(Some(diagnostic.kind.as_str()));
        self.error_code.push(Some(diagnostic.code.clone()));
        self.error_message.push(Some(diagnostic.message.clone()));
    }

    fn push_metadata(&mut self, sample: &Sample) {
        self.push_no_entity();
        self.meta_watch_group.push(Some(sample.watch_group().to_string()));
        self.meta_epoch.push(Some(sample.epoch()));
        self.push_no_error();
    }

    fn push_no_entity(&mut self) {
        self.path.push(None);
        self.kind.push(None);
        self.size.push(None);
        self.last_modified.push(None);
        self.creation_time.push(None);
        self.owner_uid.push(None);
        self.owner_gid.push(None);
        self.mode.push(None);
        self.content_md5.push(None);
        self.content_sha256.push(None);
        self.pattern_found.push(None);
        self.file_count.push(None);
        self.dir_count.push(None);
        self.children_json.push(None);
    }

    fn push_no_error(&mut self) {
        self.error_subject.push(None);
        self.error_kind.push(None);
        self.error_code.push(None);
        self.error_message.push(None);
    }

    fn into_batch(self, schema: &Arc<Schema>) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(self.path)),
            Arc::new(StringArray::from(self.kind)),
            Arc::new(UInt64Array::from(self.size)),
            Arc::new(Float64Array::from(self.last_modified)),
            Arc::new(Float64Array::from(self.creation_time)),
            Arc::new(UInt32Array::from(self.owner_uid)),
            Arc::new(UInt32Array::from(self.owner_gid)),
            Arc::new(UInt32Array::from(self.mode)),
            Arc::new(StringArray::from(self.content_md5)),
            Arc::new(StringArray::from(self.content_sha256)),
            Arc::new(BooleanArray::from(self.pattern_found)),
            Arc::new(UInt64Array::from(self.file_count)),
            Arc::new(UInt64Array::from(self.dir_count)),
            Arc::new(StringArray::from(self.children_json)),
            Arc::new(StringArray::from(self.meta_watch_group)),
            Arc::new(Int64Array::from(self.meta_epoch)),
            Arc::new(StringArray::from(self.error_subject)),
            Arc::new(StringArray::from(self.error_kind)),
            Arc::new(StringArray::from(self.error_code)),
            Arc::new(StringArray::from(self.error_message)),
        ];
        RecordBatch::try_new(schema.clone(), columns).map_err(Error::other)
    }
}

pub fn create_records_batch(schema: &Arc<Schema>, sample: &Sample) -> Result<RecordBatch> {
    let mut columns = Columns::default();
    for record in sample.records() {
        columns.push_record(record)?;
    }
    columns.into_batch(schema)
}

pub fn create_diagnostics_batch(
    schema: &Arc<Schema>,
    diagnostics: &[Diagnostic],
) -> Result<RecordBatch> {
    let mut columns = Columns::default();
    for diagnostic in diagnostics {
        columns.push_diagnostic(diagnostic);
    }
    columns.into_batch(schema)
}

pub fn create_metadata_batch(schema: &Arc<Schema>, sample: &Sample) -> Result<RecordBatch> {
    let mut columns = Columns::default();
    columns.push_metadata(sample);
    columns.into_batch(schema)
}

/// Write a sample and its diagnostics to a Parquet file.
pub fn write_snapshot(path: &Path, sample: &Sample, diagnostics: &[Diagnostic]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let schema = snapshot_schema();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, schema.clone(), Some(props)).map_err(Error::other)?;

    if !sample.is_empty() {
        let batch = create_records_batch(&schema, sample)?;
        writer.write(&batch).map_err(Error::other)?;
    }

    if !diagnostics.is_empty() {
        let batch = create_diagnostics_batch(&schema, diagnostics)?;
        writer.write(&batch).map_err(Error::other)?;
    }

    let metadata_batch = create_metadata_batch(&schema, sample)?;
    writer.write(&metadata_batch).map_err(Error::other)?;

    writer.close().map_err(Error::other)?;
    Ok(())
}

/// Read a sample and its diagnostics back from a Parquet file.
pub fn read_snapshot(path: &Path) -> Result<(Sample, Vec<Diagnostic>)> {
    let file = File::open(path)?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

    let mut reader = builder
        .build()
        .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

    let mut records = Vec::new();
    let mut diagnostics = Vec::new();
    let mut meta: Option<(String, i64)> = None;

    for batch_result in &mut reader {
        let batch = batch_result.map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

        for row in 0..batch.num_rows() {
            if let Some(group) = get_string(&batch, "meta_watch_group", row)? {
                let epoch = get_value::<Int64Array>(&batch, "meta_epoch", row)?
                    .ok_or_else(|| invalid("Missing meta_epoch"))?;
                meta.get_or_insert((group, epoch));
                continue;
            }

            if get_string(&batch, "error_subject", row)?.is_some() {
                diagnostics.push(extract_diagnostic(&batch, row)?);
                continue;
            }

            if get_string(&batch, "path", row)?.is_some_and(|p| !p.is_empty()) {
                records.push(extract_record(&batch, row)?);
            }
        }
    }

    let (watch_group, epoch) = meta.ok_or_else(|| invalid("No metadata found"))?;
    Ok((Sample::new(epoch, watch_group, records), diagnostics))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, message.into())
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| invalid(format!("Missing {column}")))
}

fn extract_record(batch: &RecordBatch, row: usize) -> Result<MetricRecord> {
    let path = required(get_string(batch, "path", row)?, "path")?;
    let kind = required(get_string(batch, "kind", row)?, "kind")?;
    let size = required(get_value::<UInt64Array>(batch, "size", row)?, "size")?;

    let entity = match kind.as_str() {
        "file" => EntityMetrics::File(FileMetrics {
            size,
            content_md5: get_string(batch, "content_md5", row)?,
            content_sha256: get_string(batch, "content_sha256", row)?,
            pattern_found: get_value::<BooleanArray>(batch, "pattern_found", row)?,
        }),
        "directory" => {
            let children = get_string(batch, "children_json", row)?
                .map(|json| serde_json::from_str::<BTreeSet<String>>(&json))
                .transpose()
                .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
            EntityMetrics::Directory(DirectoryMetrics {
                file_count: required(get_value::<UInt64Array>(batch, "file_count", row)?, "file_count")?,
                dir_count: required(get_value::<UInt64Array>(batch, "dir_count", row)?, "dir_count")?,
                total_size: size,
                children,
            })
        }
        other => return Err(invalid(format!("Unknown entity kind: {other}"))),
    };

    Ok(MetricRecord {
        path,
        last_modified: required(get_value::<Float64Array>(batch, "last_modified", row)?, "last_modified")?,
        creation_time: required(get_value::<Float64Array>(batch, "creation_time", row)?, "creation_time")?,
        owner_uid: required(get_value::<UInt32Array>(batch, "owner_uid", row)?, "owner_uid")?,
        owner_gid: required(get_value::<UInt32Array>(batch, "owner_gid", row)?, "owner_gid")?,
        mode: required(get_value::<UInt32Array>(batch, "mode", row)?, "mode")?,
        entity,
    })
}

fn extract_diagnostic(batch: &RecordBatch, row: usize) -> Result<Diagnostic> {
    let subject = required(get_string(batch, "error_subject", row)?, "error_subject")?;
    let kind = required(get_string(batch, "error_kind", row)?, "error_kind")?;
    let code = required(get_string(batch, "error_code", row)?, "error_code")?;
    let message = required(get_string(batch, "error_message", row)?, "error_message")?;

    let kind = match kind.as_str() {
        "extraction" => DiagnosticKind::Extraction,
        "traversal" => DiagnosticKind::Traversal,
        "rule_compile" => DiagnosticKind::RuleCompile,
        "rule_evaluation" => DiagnosticKind::RuleEvaluation,
        "persistence" => DiagnosticKind::Persistence,
        other => return Err(invalid(format!("Unknown diagnostic kind: {other}"))),
    };

    Ok(Diagnostic::new(subject, kind, code, message))
}

fn column<'b, A: Array + 'static>(batch: &'b RecordBatch, col_name: &str) -> Result<&'b A> {
    let col = batch
        .column_by_name(col_name)
        .ok_or_else(|| invalid(format!("Missing column: {col_name}")))?;

    col.as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| invalid(format!("Invalid type for: {col_name}")))
}

fn get_string(batch: &RecordBatch, col_name: &str, row: usize) -> Result<Option<String>> {
    let array = column::<StringArray>(batch, col_name)?;
    if array.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(array.value(row).to_string()))
    }
}

/// Typed scalar accessor for primitive and boolean columns.
trait ScalarColumn: Array + 'static {
    type Native;
    fn native(&self, row: usize) -> Self::Native;
}

macro_rules! scalar_column {
    ($array:ty, $native:ty) => {
        impl ScalarColumn for $array {
            type Native = $native;
            fn native(&self, row: usize) -> $native {
                self.value(row)
            }
        }
    };
}

scalar_column!(UInt32Array, u32);
scalar_column!(UInt64Array, u64);
scalar_column!(Int64Array, i64);
scalar_column!(Float64Array, f64);
scalar_column!(BooleanArray, bool);

fn get_value<A: ScalarColumn>(batch: &RecordBatch, col_name: &str, row: usize) -> Result<Option<A::Native>> {
    let array = column::<A>(batch, col_name)?;
    if array.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(array.native(row)))
    }
}
