use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boxed error coming from the Zarr library.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, TracesError>;

/// A recording session on disk.
///
/// A session is referenced by name and lives below a base directory. Its NWB
/// data is expected at `<base_dir>/<name>/<name>.nwb.zarr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session name, also the stem of the store directory
    pub name: String,
    /// Directory holding one sub-directory per session
    pub base_dir: PathBuf,
}

impl Session {
    /// Creates a session reference. Nothing is touched on disk.
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, base_dir: P) -> Self {
        Session {
            name: name.into(),
            base_dir: base_dir.into(),
        }
    }

    /// Returns the path of the session's NWB Zarr store.
    ///
    /// # Examples
    ///
    /// ```
    /// use nwb_trace_importer::Session;
    /// use std::path::Path;
    ///
    /// let session = Session::new("mouse_01", "/data");
    /// assert_eq!(
    ///     session.store_path(),
    ///     Path::new("/data/mouse_01/mouse_01.nwb.zarr")
    /// );
    /// ```
    pub fn store_path(&self) -> PathBuf {
        self.base_dir
            .join(&self.name)
            .join(format!("{}.nwb.zarr", self.name))
    }
}

/// Settings for one extraction run.
///
/// Supplied by the caller, either built directly or loaded from a JSON file:
///
/// ```json
/// {
///   "session_name": "409828_2018-12-13",
///   "base_dir": "/data/V1DD",
///   "out_dir": "/data/outputs",
///   "prefix": null
/// }
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Session to extract
    pub session_name: String,
    /// Directory containing the session directory
    pub base_dir: PathBuf,
    /// Directory the archives are written to (created if missing)
    pub out_dir: PathBuf,
    /// Archive filename prefix, defaults to the session name
    #[serde(default)]
    pub prefix: Option<String>,
}

impl SessionConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// The session this configuration points at.
    pub fn session(&self) -> Session {
        Session::new(self.session_name.clone(), self.base_dir.clone())
    }

    /// Archive prefix, falling back to the session name.
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.session_name)
    }
}

/// Traces extracted from one imaging plane.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneTraces {
    /// Processing module name, e.g. `plane-0`
    pub plane_key: String,
    /// Integer after the first `-` of the key, if it parses
    pub plane_index: Option<i64>,
    /// dF/F matrix
    /// - Shape: [num_samples, num_rois]
    pub x: Array2<f64>,
    /// Time of each sample (s)
    /// - Shape: [num_samples]
    pub t: Array1<f64>,
    /// Sample interval (s), NaN when unknown
    pub dt: f64,
    /// ROI identifiers, one per column of `x`
    /// - Shape: [num_rois]
    pub roi_ids: Array1<i64>,
}

impl PlaneTraces {
    /// Returns the number of time samples.
    pub fn num_samples(&self) -> usize {
        self.x.nrows()
    }

    /// Returns the number of ROIs.
    pub fn num_rois(&self) -> usize {
        self.x.ncols()
    }

    /// Returns the span of the time axis in seconds.
    ///
    /// Returns 0.0 for fewer than two samples.
    pub fn duration(&self) -> f64 {
        match (self.t.first(), self.t.last()) {
            (Some(first), Some(last)) if self.t.len() > 1 => last - first,
            _ => 0.0,
        }
    }
}

/// One column of the stimulus table.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Floating point values (start/stop times, contrasts, ...)
    Float(Array1<f64>),
    /// Integer values (frame indices, condition ids, ...)
    Int(Array1<i64>),
    /// Boolean flags
    Bool(Array1<bool>),
    /// Text values (stimulus names, ...)
    Text(Vec<String>),
}

impl Column {
    /// Number of rows in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(values) => values.len(),
            Column::Int(values) => values.len(),
            Column::Bool(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    /// Returns true if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Formats a single cell for tabular output, `None` past the last row.
    pub fn cell(&self, row: usize) -> Option<String> {
        match self {
            Column::Float(values) => values.get(row).map(f64::to_string),
            Column::Int(values) => values.get(row).map(i64::to_string),
            Column::Bool(values) => values.get(row).map(bool::to_string),
            Column::Text(values) => values.get(row).cloned(),
        }
    }
}

/// Stimulus presentation events of a session.
///
/// Rows are presentations, identified by `ids`; columns keep the order the
/// table declares them in.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusTable {
    /// Row identifiers
    pub ids: Array1<i64>,
    /// Named columns, each with one value per row
    pub columns: Vec<(String, Column)>,
}

impl StimulusTable {
    /// Returns the number of rows.
    pub fn num_rows(&self) -> usize {
        self.ids.len()
    }

    /// Returns the column names in table order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(column_name, _)| column_name == name)
            .map(|(_, column)| column)
    }

    /// Writes the table as CSV, with the row ids as the first column.
    ///
    /// Fails with [`TracesError::Malformed`] before writing anything if a
    /// column does not have one value per row.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some((name, column)) = self
            .columns
            .iter()
            .find(|(_, column)| column.len() != self.num_rows())
        {
            return Err(TracesError::malformed(
                name,
                format!("{} values for {} rows", column.len(), self.num_rows()),
            ));
        }

        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["id"];
        header.extend(self.column_names());
        writer.write_record(&header)?;

        for (row, id) in self.ids.iter().enumerate() {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(id.to_string());
            for (_, column) in &self.columns {
                record.push(column.cell(row).unwrap_or_default());
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Everything extracted from one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTraces {
    /// Name of the session the data came from
    pub session_name: String,
    /// Stimulus presentation table
    pub stim_table: StimulusTable,
    /// Successfully extracted planes, in ascending key order
    pub planes: Vec<PlaneTraces>,
}

/// Errors raised while extracting or archiving traces.
#[derive(Debug, Error)]
pub enum TracesError {
    /// The session's `.nwb.zarr` store does not exist
    #[error("NWB Zarr not found at: {}", path.display())]
    StoreNotFound { path: PathBuf },
    /// The stimulus table could not be read; the session cannot be used
    #[error("could not read stimulus_table: {source}")]
    StimulusTable {
        #[source]
        source: Box<TracesError>,
    },
    /// The Zarr library could not open a store, group or array
    #[error("could not open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: SourceError,
    },
    /// The Zarr library could not retrieve data
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: SourceError,
    },
    /// A required group or array is absent
    #[error("missing node: {path}")]
    MissingNode { path: String },
    /// An array's element type cannot be converted to the requested kind
    #[error("unsupported data type {data_type} at {path}")]
    UnsupportedDataType { path: String, data_type: String },
    /// A link points into another file
    #[error("link {path} points into external file {source_file}")]
    ExternalLink { path: String, source_file: String },
    /// The dff interface is neither a series nor a container of series
    #[error("cannot resolve a response series from {path}")]
    UnresolvableSeries { path: String },
    /// Data is present but has the wrong shape or content
    #[error("malformed data at {path}: {reason}")]
    Malformed { path: String, reason: String },
    /// An I/O error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The archive container could not be written or read
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// An array could not be encoded as `.npy`
    #[error("failed to write NPY member: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),
    /// An `.npy` member could not be decoded
    #[error("failed to read NPY member: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),
    /// The stimulus table could not be written as CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// A configuration file could not be parsed
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl TracesError {
    /// Wraps a Zarr open failure for `path`.
    pub(crate) fn open<E: Into<SourceError>>(path: &str, source: E) -> Self {
        TracesError::Open {
            path: path.to_string(),
            source: source.into(),
        }
    }

    /// Wraps a Zarr retrieval failure for `path`.
    pub(crate) fn read<E: Into<SourceError>>(path: &str, source: E) -> Self {
        TracesError::Read {
            path: path.to_string(),
            source: source.into(),
        }
    }

    /// Builds a [`TracesError::Malformed`] for `path`.
    pub(crate) fn malformed<S: Into<String>>(path: &str, reason: S) -> Self {
        TracesError::Malformed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
