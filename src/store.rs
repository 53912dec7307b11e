//! Read-only access to an NWB session stored in Zarr format.
//!
//! This is the thin layer between the extraction logic and the `zarrs`
//! library. Nodes are addressed by absolute paths such as
//! `/processing/plane-0/dff/data`. Both the v2 layout written by hdmf-zarr
//! (`.zgroup`, `.zarray`, `.zattrs`) and v3 metadata are understood.

use ndarray::{ArrayD, Ix1};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::{Array, DataType, ElementOwned};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::Group;
use zarrs::storage::{ListableStorageTraits, StorePrefix};

use crate::types::*;

/// Attribute hdmf-zarr uses to record soft links of a group
const LINK_ATTRIBUTE: &str = "zarr_link";

/// An opened session store.
///
/// The store is only ever read. It is closed when dropped.
pub struct NwbStore {
    root: PathBuf,
    storage: Arc<FilesystemStore>,
}

impl NwbStore {
    /// Opens the store rooted at `path`.
    ///
    /// Fails with [`TracesError::StoreNotFound`] if the directory does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(TracesError::StoreNotFound { path: root });
        }

        let storage = FilesystemStore::new(&root)
            .map_err(|e| TracesError::open(&root.display().to_string(), e))?;

        Ok(NwbStore {
            root,
            storage: Arc::new(storage),
        })
    }

    /// Location of the store on disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if a group or array exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.root.join(path.trim_matches('/')).is_dir()
    }

    /// Returns true if `path` is an array.
    pub fn is_array(&self, path: &str) -> bool {
        self.exists(path) && Array::open(self.storage.clone(), path).is_ok()
    }

    /// Returns the names of the direct children of the group at `path`, sorted.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        if !self.exists(path) {
            return Err(TracesError::MissingNode {
                path: path.to_string(),
            });
        }

        let prefix = StorePrefix::new(store_prefix(path)).map_err(|e| TracesError::read(path, e))?;
        let listing = self
            .storage
            .list_dir(&prefix)
            .map_err(|e| TracesError::read(path, e))?;

        let mut names: Vec<String> = listing
            .prefixes()
            .iter()
            .filter_map(|child| child.as_str().strip_prefix(prefix.as_str()))
            .map(|name| name.trim_end_matches('/').to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();

        Ok(names)
    }

    /// Returns the user attributes of the group or array at `path`.
    pub fn attributes(&self, path: &str) -> Result<Map<String, Value>> {
        if !self.exists(path) {
            return Err(TracesError::MissingNode {
                path: path.to_string(),
            });
        }

        if let Ok(array) = Array::open(self.storage.clone(), path) {
            return Ok(array.attributes().clone());
        }

        let group =
            Group::open(self.storage.clone(), path).map_err(|e| TracesError::open(path, e))?;
        Ok(group.attributes().clone())
    }

    /// Reads a numeric array of any rank, widened to `f64`.
    pub fn read_f64(&self, path: &str) -> Result<ArrayD<f64>> {
        let array = self.open_array(path)?;

        let values = match array.data_type() {
            DataType::Float64 => retrieve::<f64>(&array, path)?,
            DataType::Float32 => retrieve::<f32>(&array, path)?.mapv(f64::from),
            DataType::Int8 => retrieve::<i8>(&array, path)?.mapv(f64::from),
            DataType::Int16 => retrieve::<i16>(&array, path)?.mapv(f64::from),
            DataType::Int32 => retrieve::<i32>(&array, path)?.mapv(f64::from),
            DataType::Int64 => retrieve::<i64>(&array, path)?.mapv(|v| v as f64),
            DataType::UInt8 => retrieve::<u8>(&array, path)?.mapv(f64::from),
            DataType::UInt16 => retrieve::<u16>(&array, path)?.mapv(f64::from),
            DataType::UInt32 => retrieve::<u32>(&array, path)?.mapv(f64::from),
            DataType::UInt64 => retrieve::<u64>(&array, path)?.mapv(|v| v as f64),
            other => return Err(unsupported(path, other)),
        };

        Ok(values)
    }

    /// Reads an integer array of any rank, widened to `i64`.
    pub fn read_i64(&self, path: &str) -> Result<ArrayD<i64>> {
        let array = self.open_array(path)?;

        let values = match array.data_type() {
            DataType::Int64 => retrieve::<i64>(&array, path)?,
            DataType::Int8 => retrieve::<i8>(&array, path)?.mapv(i64::from),
            DataType::Int16 => retrieve::<i16>(&array, path)?.mapv(i64::from),
            DataType::Int32 => retrieve::<i32>(&array, path)?.mapv(i64::from),
            DataType::UInt8 => retrieve::<u8>(&array, path)?.mapv(i64::from),
            DataType::UInt16 => retrieve::<u16>(&array, path)?.mapv(i64::from),
            DataType::UInt32 => retrieve::<u32>(&array, path)?.mapv(i64::from),
            DataType::UInt64 => {
                let raw = retrieve::<u64>(&array, path)?;
                if raw.iter().any(|&v| v > i64::MAX as u64) {
                    return Err(TracesError::malformed(path, "value exceeds i64 range"));
                }
                raw.mapv(|v| v as i64)
            }
            other => return Err(unsupported(path, other)),
        };

        Ok(values)
    }

    /// Reads a one-dimensional array as a typed table column.
    pub fn read_column(&self, path: &str) -> Result<Column> {
        let array = self.open_array(path)?;
        if array.shape().len() != 1 {
            return Err(TracesError::malformed(
                path,
                format!("expected a 1-D column, found rank {}", array.shape().len()),
            ));
        }

        let column = match array.data_type() {
            DataType::Float32 | DataType::Float64 => {
                Column::Float(one_dimensional(path, self.read_f64(path)?)?)
            }
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Column::Int(one_dimensional(path, self.read_i64(path)?)?),
            DataType::Bool => {
                Column::Bool(one_dimensional(path, retrieve::<bool>(&array, path)?)?)
            }
            DataType::String => {
                let values = retrieve::<String>(&array, path)?;
                Column::Text(values.iter().cloned().collect())
            }
            other => return Err(unsupported(path, other)),
        };

        Ok(column)
    }

    /// Follows a soft link named `name` recorded on the group at `group`.
    ///
    /// hdmf-zarr stores links as entries of the group's `zarr_link` attribute:
    /// `{"name": ..., "source": ".", "path": "/target"}`. Returns the target
    /// node path, or `None` if the group has no such link. Links into other
    /// files are not followed.
    pub fn resolve_link(&self, group: &str, name: &str) -> Result<Option<String>> {
        let attributes = self.attributes(group)?;
        let Some(links) = attributes.get(LINK_ATTRIBUTE).and_then(Value::as_array) else {
            return Ok(None);
        };

        let link_path = join_path(group, name);
        for link in links {
            if link.get("name").and_then(Value::as_str) != Some(name) {
                continue;
            }

            let source = link.get("source").and_then(Value::as_str).unwrap_or(".");
            if !is_local_source(source) {
                return Err(TracesError::ExternalLink {
                    path: link_path,
                    source_file: source.to_string(),
                });
            }

            let target = link
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| TracesError::malformed(&link_path, "link has no target path"))?;
            return Ok(Some(node_path(target)));
        }

        Ok(None)
    }

    // Helper function to open an array, reporting absent nodes distinctly
    fn open_array(&self, path: &str) -> Result<Array<FilesystemStore>> {
        if !self.exists(path) {
            return Err(TracesError::MissingNode {
                path: path.to_string(),
            });
        }
        Array::open(self.storage.clone(), path).map_err(|e| TracesError::open(path, e))
    }
}

/// Joins a child name onto a node path.
///
/// # Examples
///
/// ```
/// use nwb_trace_importer::store::join_path;
///
/// assert_eq!(join_path("/", "processing"), "/processing");
/// assert_eq!(join_path("/processing", "plane-0"), "/processing/plane-0");
/// ```
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{}/{}", parent, name.trim_matches('/'))
}

/// Normalizes a node path to the absolute form `/a/b`.
pub fn node_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// Extracts the target path of an hdmf-zarr object reference held by `node`.
///
/// References are stored as attributes shaped like
/// `{"zarr_dtype": "object", "value": {"source": ".", "path": "/target"}}`.
/// A bare `{"path": ...}` object or a plain absolute path string is accepted
/// too. Returns `None` for anything else. A reference into another file is
/// an [`TracesError::ExternalLink`].
pub fn reference_path(node: &str, reference: &Value) -> Result<Option<String>> {
    match reference {
        Value::Object(fields) => {
            if let Some(value) = fields.get("value") {
                return reference_path(node, value);
            }
            let Some(path) = fields.get("path").and_then(Value::as_str) else {
                return Ok(None);
            };

            if let Some(source) = fields.get("source").and_then(Value::as_str) {
                if !is_local_source(source) {
                    return Err(TracesError::ExternalLink {
                        path: node.to_string(),
                        source_file: source.to_string(),
                    });
                }
            }

            Ok(Some(node_path(path)))
        }
        Value::String(path) if path.starts_with('/') => Ok(Some(node_path(path))),
        _ => Ok(None),
    }
}

// Helper function to tell whether a link or reference source is this file
fn is_local_source(source: &str) -> bool {
    matches!(source, "." | "./" | "")
}

// Helper function to build the store prefix of a group's children
fn store_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

// Helper function to retrieve a whole array with a fixed element type
fn retrieve<T: ElementOwned>(array: &Array<FilesystemStore>, path: &str) -> Result<ArrayD<T>> {
    array
        .retrieve_array_subset_ndarray::<T>(&array.subset_all())
        .map_err(|e| TracesError::read(path, e))
}

// Helper function to narrow a dynamic array to one dimension
fn one_dimensional<T>(path: &str, values: ArrayD<T>) -> Result<ndarray::Array1<T>> {
    values
        .into_dimensionality::<Ix1>()
        .map_err(|e| TracesError::malformed(path, e.to_string()))
}

fn unsupported(path: &str, data_type: &DataType) -> TracesError {
    TracesError::UnsupportedDataType {
        path: path.to_string(),
        data_type: format!("{data_type:?}"),
    }
}
