//! CSV decoding with column type inference.
//!
//! The source publishes headers but no schema, so each column's type is inferred from its
//! non-empty cells: `Int64` if every cell parses as an integer, else `Float64`, else `Bool`
//! (literal `true`/`false` only), else `Utf8`. Datetime columns stay `Utf8` here; the
//! normalizer coerces them.

use std::io::Read;

use csv::StringRecord;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Decode CSV text (with a header row) from any reader.
pub fn read_csv<R: Read>(reader: R) -> PipelineResult<DataSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    read_csv_records(&mut rdr)
}

/// Decode CSV data from an existing CSV reader.
pub fn read_csv_records<R: Read>(rdr: &mut csv::Reader<R>) -> PipelineResult<DataSet> {
    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
        return Err(PipelineError::schema("csv input has no header row"));
    }

    let records = rdr.records().collect::<Result<Vec<StringRecord>, _>>()?;

    let fields: Vec<Field> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| Field::new(name.trim(), infer_column_type(&records, idx)))
        .collect();

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(records.len());
    for (row_idx0, record) in records.iter().enumerate() {
        // 1-based, +1 again for the header row.
        let user_row = row_idx0 + 2;
        let mut row = Vec::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            let raw = record.get(idx).unwrap_or("");
            row.push(parse_typed_value(user_row, &field.name, field.data_type, raw)?);
        }
        rows.push(row);
    }

    Ok(DataSet::new(Schema::new(fields), rows))
}

fn infer_column_type(records: &[StringRecord], idx: usize) -> DataType {
    let mut cells = records
        .iter()
        .filter_map(|r| r.get(idx))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .peekable();

    if cells.peek().is_none() {
        return DataType::Utf8;
    }

    let (mut int, mut float, mut boolean) = (true, true, true);
    for cell in cells {
        int = int && cell.parse::<i64>().is_ok();
        float = float && cell.parse::<f64>().is_ok();
        boolean = boolean && parse_bool(cell).is_ok();
        if !(int || float || boolean) {
            return DataType::Utf8;
        }
    }

    if int {
        DataType::Int64
    } else if float {
        DataType::Float64
    } else if boolean {
        DataType::Bool
    } else {
        DataType::Utf8
    }
}

fn parse_typed_value(
    row: usize,
    column: &str,
    data_type: DataType,
    raw: &str,
) -> PipelineResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let parse_err = |message: String| {
        PipelineError::schema(format!(
            "failed to parse value at row {row} column '{column}': {message} (raw='{raw}')"
        ))
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(trimmed.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| parse_err(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| parse_err(e.to_string())),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(parse_err),
        DataType::Datetime => super::normalize::parse_datetime(trimmed)
            .map(Value::Datetime)
            .ok_or_else(|| parse_err("expected ISO-8601 datetime".to_string())),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err("expected bool (true/false)".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::read_csv;
    use crate::types::{DataType, Value};

    #[test]
    fn infers_int_float_bool_and_text() {
        let input = "VendorID,trip_distance,store_and_fwd_flag,flagged,tpep_pickup_datetime\n\
                     1,1.5,N,true,2019-01-01 00:46:40\n\
                     2,,Y,false,2019-01-01 00:59:47\n";
        let ds = read_csv(input.as_bytes()).unwrap();

        let types: Vec<DataType> = ds.schema.fields.iter().map(|f| f.data_type).collect();
        assert_eq!(
            types,
            vec![
                DataType::Int64,
                DataType::Float64,
                DataType::Utf8,
                DataType::Bool,
                DataType::Utf8,
            ]
        );
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.rows[1][1], Value::Null);
        assert_eq!(
            ds.rows[0][4],
            Value::Utf8("2019-01-01 00:46:40".to_string())
        );
    }

    #[test]
    fn mixed_int_and_float_column_becomes_float() {
        let ds = read_csv("fare\n5\n7.25\n".as_bytes()).unwrap();
        assert_eq!(ds.schema.fields[0].data_type, DataType::Float64);
        assert_eq!(ds.rows[0][0], Value::Float64(5.0));
    }

    #[test]
    fn all_empty_column_is_text_of_nulls() {
        let ds = read_csv("a,b\n1,\n2,\n".as_bytes()).unwrap();
        assert_eq!(ds.schema.fields[1].data_type, DataType::Utf8);
        assert!(ds.rows.iter().all(|r| r[1] == Value::Null));
    }

    #[test]
    fn ragged_rows_are_a_csv_error() {
        let err = read_csv("a,b\n1,2,3\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("csv error"));
    }
}
