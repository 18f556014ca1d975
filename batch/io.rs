//! # Matrix Loading and Writing
//!
//! Matrices cross the filesystem boundary as tab-separated text with a header
//! row: one column per matrix column, one row per spatial location (or per
//! component, for time courses). Loading goes through the `polars` CSV reader;
//! every column must be numeric, complete and finite.
//!
//! Writes go to a temporary sibling file which is renamed into place, so a
//! crash never leaves a truncated output behind.

use crate::estimate::FitDiagnostics;
use ndarray::{Array2, ArrayView2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixIoError {
    #[error("Input file '{}' does not exist.", .0.display())]
    NotFound(PathBuf),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error(
        "Column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("Matrix file '{}' contains no data (shape {rows} x {cols}).", path.display())]
    Empty {
        path: PathBuf,
        rows: usize,
        cols: usize,
    },
    #[error("Failed to serialize metadata to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to parse TOML metadata file: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Loads a numeric matrix from a tab-separated file with a header row.
pub fn load_matrix(path: &Path) -> Result<Array2<f64>, MatrixIoError> {
    if !path.is_file() {
        return Err(MatrixIoError::NotFound(path.to_path_buf()));
    }

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                // Integer-looking leading rows must not pin a column to i64.
                .with_infer_schema_length(None)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let (rows, cols) = (df.height(), df.width());
    if rows == 0 || cols == 0 {
        return Err(MatrixIoError::Empty {
            path: path.to_path_buf(),
            rows,
            cols,
        });
    }

    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let columns = names
        .iter()
        .map(|name| extract_numeric_column(&df, name))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!("Loaded {rows} x {cols} matrix from '{}'", path.display());
    Ok(Array2::from_shape_fn((rows, cols), |(i, j)| columns[j][i]))
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, MatrixIoError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(MatrixIoError::MissingValuesFound(column_name.to_string()));
    }

    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(MatrixIoError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };

    // A non-strict cast turns unparseable strings into nulls.
    if casted.null_count() > 0 {
        return Err(MatrixIoError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(MatrixIoError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

/// Header names `IC1..ICK` for spatial maps.
pub fn component_column_names(n_components: usize) -> Vec<String> {
    (1..=n_components).map(|k| format!("IC{k}")).collect()
}

/// Header names `t1..tT` for time courses.
pub fn time_point_column_names(n_timepoints: usize) -> Vec<String> {
    (1..=n_timepoints).map(|t| format!("t{t}")).collect()
}

/// Writes `matrix` as tab-separated text with the given header.
pub fn write_matrix(
    path: &Path,
    matrix: ArrayView2<f64>,
    column_names: &[String],
) -> io::Result<()> {
    if column_names.len() != matrix.ncols() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} column names supplied for a matrix with {} columns",
                column_names.len(),
                matrix.ncols()
            ),
        ));
    }

    write_atomically(path, |writer| {
        writeln!(writer, "{}", column_names.join("\t"))?;

        let mut line_buffer = String::with_capacity(matrix.ncols() * 24);
        let mut ryu_buffer = ryu::Buffer::new();
        for row in matrix.rows() {
            line_buffer.clear();
            for (j, &value) in row.iter().enumerate() {
                if j > 0 {
                    line_buffer.push('\t');
                }
                write!(&mut line_buffer, "{}", ryu_buffer.format(value)).map_err(io::Error::other)?;
            }
            writeln!(writer, "{line_buffer}")?;
        }
        Ok(())
    })
}

/// Writes through a temporary file in the same directory, then renames it over `path`.
fn write_atomically<F>(path: &Path, body: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let file_name = path
        .file_name()
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "output path has no file name")
        })?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let write_result = (|| -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        body(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}

/// Sidecar describing a subject's spatial output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialMetadata {
    pub subject: String,
    /// Anatomical structure the maps are defined on, e.g. `CortexLeft`.
    pub structure: String,
    pub n_locations: usize,
    pub n_components: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence_level: Option<f64>,
    pub diagnostics: FitDiagnostics,
}

impl SpatialMetadata {
    /// Saves the metadata in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), MatrixIoError> {
        save_toml(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, MatrixIoError> {
        if !path.is_file() {
            return Err(MatrixIoError::NotFound(path.to_path_buf()));
        }
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

/// Serializes any value to a TOML file.
pub fn save_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), MatrixIoError> {
    let toml_string = toml::to_string_pretty(value)?;
    write_atomically(path, |writer| writer.write_all(toml_string.as_bytes()))?;
    Ok(())
}

/// Reads one subject identifier per line; surrounding whitespace and blank lines are dropped.
pub fn read_subject_list(path: &Path) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut subjects = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            subjects.push(trimmed.to_string());
        }
    }
    Ok(subjects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn written_matrix_loads_back_with_same_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.tsv");
        let m = array![[1.5, -2.0, 0.125], [3.0, 1e-9, -7.25]];
        write_matrix(&path, m.view(), &component_column_names(3)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("IC1\tIC2\tIC3\n"));

        let loaded = load_matrix(&path).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.tsv");
        assert!(matches!(load_matrix(&path), Err(MatrixIoError::NotFound(p)) if p == path));
    }

    #[test]
    fn non_numeric_column_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        fs::write(&path, "IC1\tIC2\n1.0\tabc\n2.0\tdef\n").unwrap();
        assert!(matches!(
            load_matrix(&path),
            Err(MatrixIoError::ColumnWrongType { .. })
        ));
    }

    #[test]
    fn integer_leading_rows_do_not_fix_column_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("masked.tsv");
        let mut text = String::from("IC1\tIC2\n");
        for _ in 0..150 {
            text.push_str("0\t0\n");
        }
        text.push_str("0.5\t-1.25\n");
        fs::write(&path, text).unwrap();

        let loaded = load_matrix(&path).unwrap();
        assert_eq!(loaded.dim(), (151, 2));
        assert_eq!(loaded[[150, 0]], 0.5);
        assert_eq!(loaded[[150, 1]], -1.25);
        assert!(loaded.slice(ndarray::s![..150, ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_cell_is_reported_as_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gap.tsv");
        fs::write(&path, "IC1\tIC2\n1.0\t2.0\n3.0\t\n4.0\t5.0\n").unwrap();
        match load_matrix(&path) {
            Err(MatrixIoError::MissingValuesFound(column)) => assert_eq!(column, "IC2"),
            other => panic!("expected MissingValuesFound, got {other:?}"),
        }
    }

    #[test]
    fn nan_and_infinity_are_rejected() {
        let dir = tempdir().unwrap();
        for (name, body) in [("nan.tsv", "1.0\tNaN\n"), ("inf.tsv", "1.0\t-inf\n")] {
            let path = dir.path().join(name);
            fs::write(&path, format!("IC1\tIC2\n0.5\t0.25\n{body}")).unwrap();
            match load_matrix(&path) {
                Err(MatrixIoError::NonFiniteValuesFound(column)) => assert_eq!(column, "IC2"),
                other => panic!("{name}: expected NonFiniteValuesFound, got {other:?}"),
            }
        }
    }

    #[test]
    fn header_only_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.tsv");
        fs::write(&path, "IC1\tIC2\n").unwrap();
        assert!(matches!(load_matrix(&path), Err(MatrixIoError::Empty { .. })));
    }

    #[test]
    fn mismatched_header_length_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.tsv");
        let m = array![[1.0, 2.0]];
        assert!(write_matrix(&path, m.view(), &component_column_names(3)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn subject_list_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subjects.txt");
        fs::write(&path, "sub01\n\n  sub02  \r\nsub03\n").unwrap();
        assert_eq!(
            read_subject_list(&path).unwrap(),
            vec!["sub01".to_string(), "sub02".to_string(), "sub03".to_string()]
        );
    }

    #[test]
    fn spatial_metadata_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.toml");
        let meta = SpatialMetadata {
            subject: "sub01".to_string(),
            structure: "CortexLeft".to_string(),
            n_locations: 100,
            n_components: 3,
            confidence_level: Some(0.05),
            diagnostics: FitDiagnostics {
                n_components: 3,
                group_rank: 3,
                rank_deficient: false,
                group_condition_number: 1.0,
                ill_conditioned: false,
                time_series_rank: 3,
                residual_dof: 47,
                degenerate_locations: 0,
                retained_entries: Some(250),
                zeroed_entries: Some(50),
            },
        };
        meta.save(&path).unwrap();
        assert_eq!(SpatialMetadata::load(&path).unwrap(), meta);
    }
}
