//! Parquet encoding and decoding for [`DataSet`].
//!
//! Files are written as a single row group of OPTIONAL leaf columns with gzip compression.
//! Datetime columns are stored as `INT64 (TIMESTAMP_MICROS)`.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use parquet::basic::{Compression, ConvertedType, GzipLevel, Repetition, Type as PhysicalType};
use parquet::data_type::{BoolType, ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{ChunkReader, FileReader};
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field as ParquetField;
use parquet::schema::types::{ColumnDescriptor, Type as SchemaType};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Read a Parquet file into an in-memory [`DataSet`].
///
/// The schema is taken from the file. `INT64` columns annotated as timestamps (and INT96
/// columns) become [`DataType::Datetime`].
pub fn read_parquet(path: impl AsRef<Path>) -> PipelineResult<DataSet> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let reader = SerializedFileReader::new(file)?;

    let mut fields = parquet_fields(&reader);
    let expected_rows = usize::try_from(reader.metadata().file_metadata().num_rows()).unwrap_or(0);

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(expected_rows);
    for (idx0, row_res) in reader.into_iter().enumerate() {
        let row_num = idx0 + 1;
        let row = row_res?;

        let mut map: HashMap<&str, &ParquetField> = HashMap::new();
        for (name, field) in row.get_column_iter() {
            map.insert(name.as_str(), field);
        }

        let mut out_row: Vec<Value> = Vec::with_capacity(fields.len());
        for f in &fields {
            let v = map.get(f.name.as_str()).ok_or_else(|| {
                PipelineError::schema(format!("row {row_num} missing column '{}'", f.name))
            })?;
            out_row.push(convert_parquet_field(row_num, &f.name, f.data_type, v)?);
        }
        rows.push(out_row);
    }

    // Writers that only set the logical timestamp annotation still yield timestamp records.
    for (idx, field) in fields.iter_mut().enumerate() {
        if rows.iter().any(|r| matches!(r[idx], Value::Datetime(_))) {
            field.data_type = DataType::Datetime;
        }
    }

    Ok(DataSet::new(Schema::new(fields), rows))
}

/// Encode `dataset` as gzip-compressed Parquet into `sink`.
pub fn write_parquet<W: Write + Send>(dataset: &DataSet, sink: W) -> PipelineResult<()> {
    if dataset.schema.fields.is_empty() {
        return Err(PipelineError::schema("cannot write a table with no columns"));
    }

    let schema = Arc::new(parquet_schema(&dataset.schema)?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::GZIP(GzipLevel::default()))
            .build(),
    );
    let mut writer = SerializedFileWriter::new(sink, schema, props)?;

    let mut rg = writer.next_row_group()?;
    for (idx, field) in dataset.schema.fields.iter().enumerate() {
        let Some(mut col) = rg.next_column()? else {
            return Err(PipelineError::schema(format!(
                "parquet writer has no column for '{}'",
                field.name
            )));
        };

        match field.data_type {
            DataType::Int64 => {
                let (values, defs) = column_values(dataset, idx, |v| match v {
                    Value::Int64(x) => Some(*x),
                    _ => None,
                })?;
                col.typed::<Int64Type>().write_batch(&values, Some(&defs), None)?;
            }
            DataType::Datetime => {
                let (values, defs) = column_values(dataset, idx, |v| match v {
                    Value::Datetime(ts) => Some(ts.and_utc().timestamp_micros()),
                    _ => None,
                })?;
                col.typed::<Int64Type>().write_batch(&values, Some(&defs), None)?;
            }
            DataType::Float64 => {
                let (values, defs) = column_values(dataset, idx, |v| match v {
                    Value::Float64(x) => Some(*x),
                    _ => None,
                })?;
                col.typed::<DoubleType>().write_batch(&values, Some(&defs), None)?;
            }
            DataType::Bool => {
                let (values, defs) = column_values(dataset, idx, |v| match v {
                    Value::Bool(x) => Some(*x),
                    _ => None,
                })?;
                col.typed::<BoolType>().write_batch(&values, Some(&defs), None)?;
            }
            DataType::Utf8 => {
                let (values, defs) = column_values(dataset, idx, |v| match v {
                    Value::Utf8(s) => Some(ByteArray::from(s.as_str())),
                    _ => None,
                })?;
                col.typed::<ByteArrayType>().write_batch(&values, Some(&defs), None)?;
            }
        }
        col.close()?;
    }
    rg.close()?;
    writer.close()?;
    Ok(())
}

/// Split one column into non-null values plus definition levels (1 = present, 0 = null).
fn column_values<T>(
    dataset: &DataSet,
    idx: usize,
    extract: impl Fn(&Value) -> Option<T>,
) -> PipelineResult<(Vec<T>, Vec<i16>)> {
    let mut values = Vec::with_capacity(dataset.row_count());
    let mut defs = Vec::with_capacity(dataset.row_count());
    for (row_idx, row) in dataset.rows.iter().enumerate() {
        match row.get(idx) {
            None | Some(Value::Null) => defs.push(0),
            Some(v) => match extract(v) {
                Some(x) => {
                    values.push(x);
                    defs.push(1);
                }
                None => {
                    let field = &dataset.schema.fields[idx];
                    return Err(PipelineError::schema(format!(
                        "row {} column '{}' holds '{v}', expected {}",
                        row_idx + 1,
                        field.name,
                        field.data_type
                    )));
                }
            },
        }
    }
    Ok((values, defs))
}

fn parquet_schema(schema: &Schema) -> PipelineResult<SchemaType> {
    let mut columns = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let (physical, converted) = match field.data_type {
            DataType::Int64 => (PhysicalType::INT64, ConvertedType::NONE),
            DataType::Float64 => (PhysicalType::DOUBLE, ConvertedType::NONE),
            DataType::Bool => (PhysicalType::BOOLEAN, ConvertedType::NONE),
            DataType::Utf8 => (PhysicalType::BYTE_ARRAY, ConvertedType::UTF8),
            DataType::Datetime => (PhysicalType::INT64, ConvertedType::TIMESTAMP_MICROS),
        };
        let column = SchemaType::primitive_type_builder(&field.name, physical)
            .with_repetition(Repetition::OPTIONAL)
            .with_converted_type(converted)
            .build()?;
        columns.push(Arc::new(column));
    }
    Ok(SchemaType::group_type_builder("schema")
        .with_fields(columns)
        .build()?)
}

fn parquet_fields<R: ChunkReader + 'static>(reader: &SerializedFileReader<R>) -> Vec<Field> {
    reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| Field::new(c.name(), logical_type_of(c)))
        .collect()
}

fn logical_type_of(column: &ColumnDescriptor) -> DataType {
    match (column.physical_type(), column.converted_type()) {
        (PhysicalType::INT64, ConvertedType::TIMESTAMP_MICROS | ConvertedType::TIMESTAMP_MILLIS) => {
            DataType::Datetime
        }
        (PhysicalType::INT96, _) => DataType::Datetime,
        (PhysicalType::BOOLEAN, _) => DataType::Bool,
        (PhysicalType::INT32 | PhysicalType::INT64, _) => DataType::Int64,
        (PhysicalType::FLOAT | PhysicalType::DOUBLE, _) => DataType::Float64,
        _ => DataType::Utf8,
    }
}

fn convert_parquet_field(
    row: usize,
    column: &str,
    data_type: DataType,
    f: &ParquetField,
) -> PipelineResult<Value> {
    let mismatch = |expected: &str| {
        PipelineError::schema(format!(
            "row {row} column '{column}': expected {expected}, found '{f}'"
        ))
    };

    match f {
        ParquetField::Null => return Ok(Value::Null),
        ParquetField::TimestampMicros(us) => {
            return DateTime::from_timestamp_micros(*us)
                .map(|dt| Value::Datetime(dt.naive_utc()))
                .ok_or_else(|| mismatch("timestamp in range"));
        }
        ParquetField::TimestampMillis(ms) => {
            return DateTime::from_timestamp_millis(*ms)
                .map(|dt| Value::Datetime(dt.naive_utc()))
                .ok_or_else(|| mismatch("timestamp in range"));
        }
        _ => {}
    }

    match data_type {
        DataType::Utf8 => match f {
            ParquetField::Str(s) => Ok(Value::Utf8(s.clone())),
            ParquetField::Bytes(b) => Ok(Value::Utf8(String::from_utf8_lossy(b.data()).into_owned())),
            _ => Err(mismatch("string")),
        },
        DataType::Bool => match f {
            ParquetField::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(mismatch("bool")),
        },
        DataType::Int64 => match f {
            ParquetField::Byte(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Short(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Int(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Long(v) => Ok(Value::Int64(*v)),
            ParquetField::UByte(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::UShort(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::UInt(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::ULong(v) => i64::try_from(*v)
                .map(Value::Int64)
                .map_err(|_| mismatch("u64 within i64 range")),
            _ => Err(mismatch("integer")),
        },
        DataType::Float64 => match f {
            ParquetField::Float(v) => Ok(Value::Float64(f64::from(*v))),
            ParquetField::Double(v) => Ok(Value::Float64(*v)),
            _ => Err(mismatch("number")),
        },
        DataType::Datetime => Err(mismatch("timestamp")),
    }
}

/// Text form of a datetime cell with microsecond precision.
pub(crate) fn datetime_to_string(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
