//! Builders for small NWB Zarr stores on disk.
//!
//! Stores use the Zarr v2 layout hdmf-zarr writes, with uncompressed
//! single-chunk arrays so the fixtures stay readable.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Writes groups and arrays below a session's `.nwb.zarr` directory.
pub struct StoreBuilder {
    root: PathBuf,
}

impl StoreBuilder {
    /// Creates the store for `session` below `base_dir`.
    pub fn new(base_dir: &Path, session: &str) -> Self {
        let root = base_dir
            .join(session)
            .join(format!("{session}.nwb.zarr"));
        let builder = StoreBuilder { root };
        builder.group("/");
        builder
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a group, and any missing parent groups.
    pub fn group(&self, path: &str) -> &Self {
        self.ensure_group(path);
        self
    }

    /// Creates a group carrying `attrs`.
    pub fn group_with_attrs(&self, path: &str, attrs: Value) -> &Self {
        self.ensure_group(path);
        self.write_attrs(path, attrs);
        self
    }

    /// Writes a float64 array with C-ordered `values`.
    pub fn array_f64(&self, path: &str, shape: &[usize], values: &[f64]) -> &Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write_array(path, shape, encoding("<f8", json!(0.0)), values.len(), &bytes);
        self
    }

    /// Writes a float32 array with C-ordered `values`.
    pub fn array_f32(&self, path: &str, shape: &[usize], values: &[f32]) -> &Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write_array(path, shape, encoding("<f4", json!(0.0)), values.len(), &bytes);
        self
    }

    /// Writes an int64 array with C-ordered `values`.
    pub fn array_i64(&self, path: &str, shape: &[usize], values: &[i64]) -> &Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write_array(path, shape, encoding("<i8", json!(0)), values.len(), &bytes);
        self
    }

    /// Writes a 1-D boolean array with the given fill value.
    ///
    /// zarr-python writes `false`; `0` is the other spelling found in stores.
    pub fn array_bool(&self, path: &str, values: &[bool], fill_value: Value) -> &Self {
        let bytes: Vec<u8> = values.iter().map(|&v| u8::from(v)).collect();
        let shape = [values.len()];
        self.write_array(path, &shape, encoding("|b1", fill_value), values.len(), &bytes);
        self
    }

    /// Writes a 1-D object array of strings with the `vlen-utf8` filter.
    pub fn array_text(&self, path: &str, values: &[&str]) -> &Self {
        let mut bytes = (values.len() as u32).to_le_bytes().to_vec();
        for value in values {
            bytes.extend((value.len() as u32).to_le_bytes());
            bytes.extend(value.as_bytes());
        }
        let mut text = encoding("|O", json!(0));
        text["filters"] = json!([{ "id": "vlen-utf8" }]);
        self.write_array(path, &[values.len()], text, values.len(), &bytes);
        self
    }

    /// Sets the attributes of an existing group or array.
    pub fn attrs(&self, path: &str, attrs: Value) -> &Self {
        self.write_attrs(path, attrs);
        self
    }

    fn dir(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_matches('/'))
    }

    fn ensure_group(&self, path: &str) {
        let mut current = String::new();
        self.write_group_metadata(&current);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.write_group_metadata(&current);
        }
    }

    fn write_group_metadata(&self, path: &str) {
        let dir = self.dir(path);
        fs::create_dir_all(&dir).unwrap();
        let zgroup = dir.join(".zgroup");
        if !zgroup.exists() {
            fs::write(zgroup, json!({ "zarr_format": 2 }).to_string()).unwrap();
        }
    }

    fn write_array(
        &self,
        path: &str,
        shape: &[usize],
        encoding: Value,
        num_values: usize,
        bytes: &[u8],
    ) {
        assert_eq!(shape.iter().product::<usize>(), num_values, "shape/value mismatch at {path}");

        if let Some((parent, _)) = path.trim_end_matches('/').rsplit_once('/') {
            self.ensure_group(parent);
        }

        let dir = self.dir(path);
        fs::create_dir_all(&dir).unwrap();

        let mut zarray = json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": shape,
            "compressor": null,
            "order": "C",
        });
        if let (Some(zarray), Value::Object(encoding)) = (zarray.as_object_mut(), encoding) {
            zarray.extend(encoding);
        }
        fs::write(dir.join(".zarray"), zarray.to_string()).unwrap();

        let chunk_key = vec!["0"; shape.len().max(1)].join(".");
        fs::write(dir.join(chunk_key), bytes).unwrap();
    }

    fn write_attrs(&self, path: &str, attrs: Value) {
        fs::write(self.dir(path).join(".zattrs"), attrs.to_string()).unwrap();
    }
}

// `.zarray` fields describing how the values are stored
fn encoding(dtype: &str, fill_value: Value) -> Value {
    json!({ "dtype": dtype, "fill_value": fill_value, "filters": null })
}

/// Writes a stimulus table with three presentations.
///
/// Columns: `start_time`, `stop_time`, `frame`, plus a ragged `tags` column.
pub fn write_stimulus_table(store: &StoreBuilder) {
    let table = "/intervals/stimulus_table";
    store
        .group_with_attrs(
            table,
            json!({
                "colnames": ["start_time", "stop_time", "frame", "tags"],
                "description": "stimulus presentations",
                "neurodata_type": "TimeIntervals",
            }),
        )
        .array_i64(&format!("{table}/id"), &[3], &[0, 1, 2])
        .array_f64(&format!("{table}/start_time"), &[3], &[0.5, 1.5, 2.5])
        .array_f64(&format!("{table}/stop_time"), &[3], &[1.0, 2.0, 3.0])
        .array_i64(&format!("{table}/frame"), &[3], &[15, 45, 75])
        .array_i64(&format!("{table}/tags"), &[2], &[7, 8])
        .array_i64(&format!("{table}/tags_index"), &[3], &[1, 1, 2]);
}

/// Writes `plane` with a `dff` series holding `data` of `shape` and,
/// optionally, explicit timestamps.
pub fn write_direct_plane(
    store: &StoreBuilder,
    plane: &str,
    shape: &[usize],
    data: &[f64],
    timestamps: Option<&[f64]>,
) {
    let dff = format!("/processing/{plane}/dff");
    store
        .group_with_attrs(&dff, json!({ "neurodata_type": "RoiResponseSeries" }))
        .array_f64(&format!("{dff}/data"), shape, data);
    if let Some(timestamps) = timestamps {
        store.array_f64(&format!("{dff}/timestamps"), &[timestamps.len()], timestamps);
    }
}

/// `rows * cols` values where the value encodes its position as `row.col`.
pub fn positional_values(rows: usize, cols: usize) -> Vec<f64> {
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| r as f64 + c as f64 / 10.0))
        .collect()
}
