//! Datetime repair for freshly fetched tables.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::observability::{NoopObserver, PipelineObserver, TableProfile, notify};
use crate::period::Category;
use crate::types::{DataSet, DataType, Value};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 date-time.
///
/// Accepts `YYYY-MM-DD HH:MM[:SS[.f]]`, the `T`-separated form, RFC 3339 with an offset
/// (converted to UTC) and a bare date (midnight).
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Coerces the pickup and dropoff columns of a table to [`DataType::Datetime`].
pub struct Normalizer {
    pickup_column: String,
    dropoff_column: String,
    observer: Arc<dyn PipelineObserver>,
}

impl Normalizer {
    pub fn new(pickup_column: impl Into<String>, dropoff_column: impl Into<String>) -> Self {
        Self {
            pickup_column: pickup_column.into(),
            dropoff_column: dropoff_column.into(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Normalizer using the source's column names for `category`.
    pub fn for_category(category: Category) -> Self {
        let (pickup, dropoff) = category.datetime_columns();
        Self::new(pickup, dropoff)
    }

    /// Attach an observer that receives the table profile after each run.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn columns(&self) -> (&str, &str) {
        (&self.pickup_column, &self.dropoff_column)
    }

    /// Coerce both datetime columns, then report the table's shape.
    ///
    /// Fails with [`PipelineError::Schema`] if either column is missing or holds a non-empty
    /// value that is not a date-time. Columns already typed as datetime are left as they are.
    pub fn normalize(&self, mut table: DataSet) -> PipelineResult<DataSet> {
        for column in [&self.pickup_column, &self.dropoff_column] {
            coerce_datetime_column(&mut table, column)?;
        }

        let profile = TableProfile::of(&table);
        debug!(rows = profile.rows, "normalized table");
        notify(self.observer.as_ref(), |o| o.on_profile(&profile));

        Ok(table)
    }
}

fn coerce_datetime_column(table: &mut DataSet, column: &str) -> PipelineResult<()> {
    let idx = table.schema.index_of(column).ok_or_else(|| {
        PipelineError::schema(format!(
            "missing required datetime column '{column}'. columns={:?}",
            table.schema.field_names().collect::<Vec<_>>()
        ))
    })?;

    if table.schema.fields[idx].data_type == DataType::Datetime {
        return Ok(());
    }

    for (row_idx, row) in table.rows.iter_mut().enumerate() {
        let coerced = match &row[idx] {
            Value::Null => Value::Null,
            Value::Datetime(ts) => Value::Datetime(*ts),
            Value::Utf8(s) if s.trim().is_empty() => Value::Null,
            Value::Utf8(s) => Value::Datetime(parse_datetime(s).ok_or_else(|| {
                PipelineError::schema(format!(
                    "row {} column '{column}': '{s}' is not an ISO-8601 datetime",
                    row_idx + 1
                ))
            })?),
            other => {
                return Err(PipelineError::schema(format!(
                    "row {} column '{column}': cannot coerce '{other}' to datetime",
                    row_idx + 1
                )));
            }
        };
        row[idx] = coerced;
    }

    table.schema.fields[idx].data_type = DataType::Datetime;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::{Field, Schema};

    fn yellow(pickup: &str, dropoff: &str) -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("VendorID", DataType::Int64),
                Field::new("tpep_pickup_datetime", DataType::Utf8),
                Field::new("tpep_dropoff_datetime", DataType::Utf8),
            ]),
            vec![vec![
                Value::Int64(1),
                Value::Utf8(pickup.to_string()),
                Value::Utf8(dropoff.to_string()),
            ]],
        )
    }

    #[test]
    fn parses_common_iso_forms() {
        let expected =
            NaiveDateTime::parse_from_str("2019-01-01 00:46:40", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_datetime("2019-01-01 00:46:40"), Some(expected));
        assert_eq!(parse_datetime("2019-01-01T00:46:40"), Some(expected));
        assert_eq!(parse_datetime("2019-01-01T01:46:40+01:00"), Some(expected));
        assert_eq!(parse_datetime("2019-01-01T00:46:40Z"), Some(expected));
        assert!(parse_datetime("2019-01-01 00:46:40.250").is_some());

        let minute =
            NaiveDateTime::parse_from_str("2019-01-01 00:46:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_datetime("2019-01-01T00:46"), Some(minute));
        assert_eq!(parse_datetime("2019-01-01 00:46"), Some(minute));
        assert_eq!(
            parse_datetime("2019-01-01"),
            NaiveDate::from_ymd_opt(2019, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(parse_datetime("01/01/2019 00:46"), None);
    }

    #[test]
    fn coerces_both_columns() {
        let out = Normalizer::for_category(Category::Yellow)
            .normalize(yellow("2019-01-01 00:46:40", "2019-01-01T00:53:20"))
            .unwrap();
        assert_eq!(out.schema.fields[1].data_type, DataType::Datetime);
        assert_eq!(out.schema.fields[2].data_type, DataType::Datetime);
        assert!(matches!(out.rows[0][1], Value::Datetime(_)));
        assert!(matches!(out.rows[0][2], Value::Datetime(_)));
        assert_eq!(out.rows[0][0], Value::Int64(1));
    }

    #[test]
    fn missing_column_is_schema_error() {
        let mut ds = yellow("2019-01-01 00:46:40", "2019-01-01 00:53:20");
        ds.schema.fields[2].name = "something_else".to_string();
        let err = Normalizer::for_category(Category::Yellow)
            .normalize(ds)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
        assert!(err.to_string().contains("tpep_dropoff_datetime"));
    }

    #[test]
    fn malformed_value_is_schema_error() {
        let err = Normalizer::for_category(Category::Yellow)
            .normalize(yellow("yesterday", "2019-01-01 00:53:20"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
    }

    #[test]
    fn empty_cells_become_null() {
        let out = Normalizer::for_category(Category::Yellow)
            .normalize(yellow("2019-01-01 00:46:40", ""))
            .unwrap();
        assert_eq!(out.rows[0][2], Value::Null);
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<TableProfile>>);

    impl PipelineObserver for Recording {
        fn on_profile(&self, profile: &TableProfile) {
            self.0.lock().unwrap().push(profile.clone());
        }
    }

    struct Exploding;

    impl PipelineObserver for Exploding {
        fn on_profile(&self, _profile: &TableProfile) {
            panic!("diagnostics sink unavailable");
        }
    }

    #[test]
    fn reports_profile_to_observer() {
        let rec = Arc::new(Recording::default());
        Normalizer::for_category(Category::Yellow)
            .with_observer(rec.clone())
            .normalize(yellow("2019-01-01 00:46:40", "2019-01-01 00:53:20"))
            .unwrap();

        let profiles = rec.0.lock().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].rows, 1);
        assert_eq!(
            profiles[0].columns[1],
            ("tpep_pickup_datetime".to_string(), DataType::Datetime)
        );
        assert_eq!(profiles[0].sample.len(), 1);
    }

    #[test]
    fn observer_panic_does_not_fail_normalization() {
        let out = Normalizer::for_category(Category::Yellow)
            .with_observer(Arc::new(Exploding))
            .normalize(yellow("2019-01-01 00:46:40", "2019-01-01 00:53:20"));
        assert!(out.is_ok());
    }
}
