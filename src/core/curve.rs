use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::DMatrix;
use thiserror::Error;

// --- Errors ---

#[derive(Debug, Error)]
pub enum CurveError {
    #[error("curve has no points")]
    Empty,
    #[error("x has {x} rows but y has {y} values")]
    LengthMismatch { x: usize, y: usize },
    #[error("error column has {error} values but y has {y}")]
    ErrorLengthMismatch { error: usize, y: usize },
    #[error("non-finite value in {column} at point {index}")]
    NonFinite { column: &'static str, index: usize },
    #[error("uncertainty at point {index} must be positive, got {value}")]
    NonPositiveError { index: usize, value: f64 },
    #[error("row {row}: expected {expected} columns, found {found}")]
    BadRow { row: usize, expected: usize, found: usize },
    #[error("row {row}: could not parse '{field}' as a number")]
    BadNumber { row: usize, field: String },
    #[error("noise amplitude must be finite and non-negative, got {0}")]
    BadNoise(f64),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

// --- The Input Snapshot ---

/// Immutable input data for one fitting session.
///
/// `x` holds one row per point and one column per input dimension.
/// Columns are exposed to expressions as `x1..xn`.
#[derive(Debug, Clone)]
pub struct CurveData {
    x: DMatrix<f64>,
    y: Vec<f64>,
    error: Option<Vec<f64>>,
    units: Option<BTreeMap<String, String>>,
}

impl CurveData {
    pub fn new(x: DMatrix<f64>, y: Vec<f64>, error: Option<Vec<f64>>) -> Result<Self, CurveError> {
        if y.is_empty() || x.ncols() == 0 {
            return Err(CurveError::Empty);
        }
        if x.nrows() != y.len() {
            return Err(CurveError::LengthMismatch { x: x.nrows(), y: y.len() });
        }
        if let Some(err) = &error {
            if err.len() != y.len() {
                return Err(CurveError::ErrorLengthMismatch { error: err.len(), y: y.len() });
            }
            for (index, &value) in err.iter().enumerate() {
                if !value.is_finite() {
                    return Err(CurveError::NonFinite { column: "error", index });
                }
                if value <= 0.0 {
                    return Err(CurveError::NonPositiveError { index, value });
                }
            }
        }
        for (index, row) in x.row_iter().enumerate() {
            if row.iter().any(|v| !v.is_finite()) {
                return Err(CurveError::NonFinite { column: "x", index });
            }
        }
        if let Some(index) = y.iter().position(|v| !v.is_finite()) {
            return Err(CurveError::NonFinite { column: "y", index });
        }

        Ok(Self { x, y, error, units: None })
    }

    /// Builds a one-dimensional curve from (x, y) pairs, e.g. a captured stroke.
    pub fn from_points(points: &[(f64, f64)]) -> Result<Self, CurveError> {
        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        Self::new(DMatrix::from_column_slice(xs.len(), 1, &xs), ys, None)
    }

    /// Attaches physical units per variable name (advanced mode).
    pub fn with_units(mut self, units: BTreeMap<String, String>) -> Self {
        self.units = Some(units);
        self
    }

    /// Reads `x1..x{dims}, y[, error]` columns from a CSV file.
    /// A header row is skipped if its first field does not parse as a number.
    pub fn from_csv(path: &Path, dims: usize, with_error: bool) -> Result<Self, CurveError> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)?;
        Self::from_csv_reader(reader, dims, with_error)
    }

    fn from_csv_reader<R: std::io::Read>(
        mut reader: csv::Reader<R>,
        dims: usize,
        with_error: bool,
    ) -> Result<Self, CurveError> {
        let expected = dims + 1 + usize::from(with_error);
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let mut errs = Vec::new();

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            if row == 0 && record.get(0).is_some_and(|f| f.parse::<f64>().is_err()) {
                continue; // header
            }
            if record.len() != expected {
                return Err(CurveError::BadRow { row: row + 1, expected, found: record.len() });
            }

            let mut values = Vec::with_capacity(expected);
            for field in record.iter() {
                let v = field.parse::<f64>().map_err(|_| CurveError::BadNumber {
                    row: row + 1,
                    field: field.to_string(),
                })?;
                values.push(v);
            }

            xs.extend_from_slice(&values[..dims]);
            ys.push(values[dims]);
            if with_error {
                errs.push(values[dims + 1]);
            }
        }

        let n = ys.len();
        let x = DMatrix::from_row_slice(n, dims, &xs);
        Self::new(x, ys, with_error.then_some(errs))
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.x.ncols()
    }

    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn error(&self) -> Option<&[f64]> {
        self.error.as_deref()
    }

    pub fn units(&self) -> Option<&BTreeMap<String, String>> {
        self.units.as_ref()
    }

    pub fn variable_names(&self) -> Vec<String> {
        (1..=self.dims()).map(|i| format!("x{}", i)).collect()
    }

    /// (min, max) of the first input column; used for plotting ranges.
    pub fn x_range(&self) -> (f64, f64) {
        let col = self.x.column(0);
        (col.min(), col.max())
    }

    pub fn y_range(&self) -> (f64, f64) {
        self.y.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }
}
