use std::path::Path;

use av_types::{AvResult, DataError, Period};
use csv::{ReaderBuilder, StringRecord};

use crate::dataset::{Dataset, Sample};

/// Header names tried, in order, when no period column is configured.
const PERIOD_COLUMNS: [&str; 4] = ["yyyymm", "period", "sale.year.month", "month"];

/// Loads transaction samples from a headed CSV file.
///
/// Each row needs a period (`YYYYMM`, `YYYY-MM` or a full date), a numeric
/// target and numeric features. Rows that fail to parse are skipped with a
/// warning.
#[derive(Debug, Clone)]
pub struct CsvLoader {
    period_column: Option<String>,
    target_column: String,
    feature_columns: Option<Vec<String>>,
    max_rows: Option<usize>,
}

/// Resolved header positions.
#[derive(Debug)]
struct Layout {
    period: usize,
    target: usize,
    features: Vec<(usize, String)>,
}

impl CsvLoader {
    pub fn new() -> Self {
        Self {
            period_column: None,
            target_column: "price".to_string(),
            feature_columns: None,
            max_rows: None,
        }
    }

    pub fn with_period_column(mut self, column: impl Into<String>) -> Self {
        self.period_column = Some(column.into());
        self
    }

    pub fn with_target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = column.into();
        self
    }

    /// Use exactly these feature columns instead of every numeric column.
    pub fn with_feature_columns(mut self, columns: Vec<String>) -> Self {
        self.feature_columns = Some(columns);
        self
    }

    /// Stop after this many data rows.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn load<P: AsRef<Path>>(&self, file_path: P) -> AvResult<Dataset> {
        let path = file_path.as_ref();
        tracing::info!("Loading samples from: {}", path.display());

        if !path.exists() {
            return Err(DataError::SourceNotFound(path.display().to_string()).into());
        }

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| DataError::InvalidFormat {
                message: format!("Failed to open CSV file {}: {}", path.display(), e),
            })?;

        let headers = rdr
            .headers()
            .map_err(|e| DataError::InvalidFormat {
                message: format!("Failed to read CSV headers: {}", e),
            })?
            .clone();
        tracing::debug!("CSV headers: {:?}", headers);

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (row, result) in rdr.records().enumerate() {
            if self.max_rows.is_some_and(|max| row >= max) {
                break;
            }
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable record at line {}: {}", row + 2, e);
                    skipped += 1;
                }
            }
        }

        let layout = self.detect_layout(&headers, &records)?;
        let mut samples = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            match parse_record(record, &layout) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    tracing::warn!("Skipping invalid record at line {}: {}", row + 2, e);
                    skipped += 1;
                }
            }
        }

        let feature_names: Vec<String> = layout.features.into_iter().map(|(_, name)| name).collect();
        tracing::info!(
            "Loaded {} samples with {} features ({} rows skipped)",
            samples.len(),
            feature_names.len(),
            skipped
        );
        Ok(Dataset::new(feature_names, samples))
    }

    /// Locate columns. Without an explicit feature list, every other column
    /// whose present values are mostly numbers becomes a feature; rows with a
    /// missing or malformed value in one of them are skipped later.
    fn detect_layout(&self, headers: &StringRecord, records: &[StringRecord]) -> AvResult<Layout> {
        let position = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

        let period = match &self.period_column {
            Some(name) => position(name).ok_or_else(|| DataError::MissingColumn {
                column: name.clone(),
            })?,
            None => PERIOD_COLUMNS
                .iter()
                .find_map(|name| position(name))
                .ok_or_else(|| DataError::MissingColumn {
                    column: PERIOD_COLUMNS.join("|"),
                })?,
        };
        let target = position(&self.target_column).ok_or_else(|| DataError::MissingColumn {
            column: self.target_column.clone(),
        })?;

        let features = match &self.feature_columns {
            Some(columns) => columns
                .iter()
                .map(|name| {
                    position(name)
                        .map(|idx| (idx, name.clone()))
                        .ok_or_else(|| DataError::MissingColumn {
                            column: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => headers
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != period && *idx != target)
                .filter(|(idx, name)| {
                    let numeric = is_numeric_column(records, *idx);
                    if !numeric {
                        tracing::debug!("Ignoring non-numeric column {}", name);
                    }
                    numeric
                })
                .map(|(idx, name)| (idx, name.to_string()))
                .collect(),
        };

        Ok(Layout {
            period,
            target,
            features,
        })
    }
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_record(record: &StringRecord, layout: &Layout) -> AvResult<Sample> {
    let field = |idx: usize| record.get(idx).unwrap_or("");

    let period: Period = field(layout.period).parse()?;
    let price = parse_number(field(layout.target), "price")?;
    let features = layout
        .features
        .iter()
        .map(|(idx, name)| parse_number(field(*idx), name))
        .collect::<AvResult<Vec<_>>>()?;

    Ok(Sample::new(period, price, features))
}

/// Markers that stand for an absent value.
const MISSING: [&str; 5] = ["", "na", "n/a", "nan", "null"];

fn is_missing(value: &str) -> bool {
    MISSING.iter().any(|m| value.eq_ignore_ascii_case(m))
}

/// Most present values in the column parse as numbers.
fn is_numeric_column(records: &[StringRecord], idx: usize) -> bool {
    let (present, numeric) = records
        .iter()
        .map(|r| r.get(idx).unwrap_or(""))
        .filter(|v| !is_missing(v))
        .fold((0usize, 0usize), |(present, numeric), v| {
            (present + 1, numeric + usize::from(v.parse::<f64>().is_ok()))
        });
    numeric * 2 > present
}

fn parse_number(value: &str, field_name: &str) -> AvResult<f64> {
    if is_missing(value) {
        return Err(DataError::ParseError {
            message: format!("Missing value for field: {}", field_name),
        }
        .into());
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(v) => Err(DataError::ParseError {
            message: format!("Non-finite {} value: {}", field_name, v),
        }
        .into()),
        Err(e) => Err(DataError::ParseError {
            message: format!("Could not parse {} value '{}': {}", field_name, value, e),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_types::AvError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_csv_loading() {
        let file = csv_file(&[
            "yyyymm,price,city,rooms,land_sq_ft",
            "200702,350000,Pasadena,4,6000",
            "200701,410000,Glendale,5,7200",
            "2007-03,299000,Pasadena,3,5100",
        ]);

        let dataset = CsvLoader::new().load(file.path()).unwrap();
        assert_eq!(dataset.feature_names(), ["rooms", "land_sq_ft"]);
        assert_eq!(dataset.len(), 3);

        let first = &dataset.samples()[0];
        assert_eq!(first.period, Period::new(2007, 1).unwrap());
        assert_eq!(first.price, 410000.0);
        assert_eq!(first.features, vec![5.0, 7200.0]);
    }

    #[test]
    fn invalid_rows_are_skipped() {
        let file = csv_file(&[
            "yyyymm,price,rooms",
            "200701,100,1",
            "200713,100,1",
            "200702,,1",
            "200703,300,abc",
            "200704,400,4",
        ]);

        let dataset = CsvLoader::new().load(file.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.last_period(), Some(Period::new(2007, 4).unwrap()));
    }

    #[test]
    fn gaps_in_the_first_row_keep_the_column() {
        let file = csv_file(&[
            "yyyymm,price,rooms,size,city",
            "200701,100,,50,Pasadena",
            "200701,110,2,55,Glendale",
            "200702,120,NA,60,Pasadena",
            "200702,130,3,65,Glendale",
            "200703,140,4,70,Pasadena",
        ]);

        let dataset = CsvLoader::new().load(file.path()).unwrap();
        assert_eq!(dataset.feature_names(), ["rooms", "size"]);
        assert_eq!(dataset.len(), 3);
        assert!(dataset.samples().iter().all(|s| s.features.len() == 2));
        assert_eq!(dataset.samples()[0].features, vec![2.0, 55.0]);
    }

    #[test]
    fn explicit_columns_and_row_limit() {
        let file = csv_file(&[
            "sale_month,value,a,b",
            "200701,1,10,20",
            "200702,2,11,21",
            "200703,3,12,22",
        ]);

        let dataset = CsvLoader::new()
            .with_period_column("sale_month")
            .with_target_column("value")
            .with_feature_columns(vec!["b".to_string()])
            .with_max_rows(2)
            .load(file.path())
            .unwrap();

        assert_eq!(dataset.feature_names(), ["b"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.samples()[1].features, vec![21.0]);
    }

    #[test]
    fn missing_columns_are_reported() {
        let file = csv_file(&["yyyymm,cost", "200701,1"]);
        let err = CsvLoader::new().load(file.path()).unwrap_err();
        assert!(matches!(
            err,
            AvError::Data(DataError::MissingColumn { ref column }) if column == "price"
        ));
    }

    #[test]
    fn missing_file_is_source_not_found() {
        let err = CsvLoader::new()
            .load("/nonexistent/samples-train.csv")
            .unwrap_err();
        assert!(matches!(err, AvError::Data(DataError::SourceNotFound(_))));
    }
}
