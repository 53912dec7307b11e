//! NumPy `.npz` archives of extracted planes.
//!
//! Each plane is written as a zip of `.npy` members, the layout
//! `numpy.savez` produces, so archives load directly with `numpy.load`:
//!
//! ```python
//! import numpy as np
//! z = np.load("session_plane-0.npz")
//! X, t, dt = z["X"], z["t"], float(z["dt"])
//! ```

use ndarray::{arr0, Array0, Array1, Array2};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use npyz::npz::file_name_from_array_name;
use npyz::{DType, NpyFile, TypeStr, WriteOptions, WriterBuilder};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::types::*;

/// File extension of plane archives
pub const ARCHIVE_EXTENSION: &str = "npz";

// Array names, as the keyword names given to numpy.savez
const X_ARRAY: &str = "X";
const T_ARRAY: &str = "t";
const DT_ARRAY: &str = "dt";
const ROI_IDS_ARRAY: &str = "roi_ids";
const PLANE_KEY_ARRAY: &str = "plane_key";
const PLANE_INDEX_ARRAY: &str = "plane_index";

/// Stored in place of a missing plane index
pub const MISSING_PLANE_INDEX: i64 = -1;

/// Saves each plane of `traces` to `<out_dir>/<prefix>_<plane_key>.npz`.
///
/// `out_dir` is created if needed. `prefix` defaults to the session name.
/// Returns the written paths in plane order. Files are written one after the
/// other; a failure part way leaves the earlier archives in place.
pub fn save_traces_npz<P: AsRef<Path>>(
    traces: &SessionTraces,
    out_dir: P,
    prefix: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir)?;

    let prefix = prefix.unwrap_or(&traces.session_name);

    let mut paths = Vec::with_capacity(traces.planes.len());
    for plane in &traces.planes {
        let path = out_dir.join(format!(
            "{}_{}.{}",
            prefix, plane.plane_key, ARCHIVE_EXTENSION
        ));
        write_plane_archive(&path, plane)?;
        log::info!("Saved {}", path.display());
        paths.push(path);
    }

    Ok(paths)
}

/// Writes one plane to an `.npz` archive at `path`.
///
/// Members: `X` (float64, 2-D), `t` (float64, 1-D), `dt` (float64 scalar),
/// `roi_ids` (int64, 1-D), `plane_key` (unicode scalar) and `plane_index`
/// (int64 scalar, -1 when absent).
pub fn write_plane_archive<P: AsRef<Path>>(path: P, plane: &PlaneTraces) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    zip.start_file(member(X_ARRAY), member_options())?;
    plane.x.write_npy(&mut zip)?;

    zip.start_file(member(T_ARRAY), member_options())?;
    plane.t.write_npy(&mut zip)?;

    zip.start_file(member(DT_ARRAY), member_options())?;
    arr0(plane.dt).write_npy(&mut zip)?;

    zip.start_file(member(ROI_IDS_ARRAY), member_options())?;
    plane.roi_ids.write_npy(&mut zip)?;

    zip.start_file(member(PLANE_KEY_ARRAY), member_options())?;
    write_unicode_npy(&mut zip, &plane.plane_key)?;

    zip.start_file(member(PLANE_INDEX_ARRAY), member_options())?;
    arr0(plane.plane_index.unwrap_or(MISSING_PLANE_INDEX)).write_npy(&mut zip)?;

    let mut writer = zip.finish()?;
    writer.flush()?;

    Ok(())
}

/// Loads a plane archive written by [`write_plane_archive`].
///
/// A stored plane index of -1 is read back as `None`.
pub fn load_plane_archive<P: AsRef<Path>>(path: P) -> Result<PlaneTraces> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let x = Array2::<f64>::read_npy(archive.by_name(&member(X_ARRAY))?)?;
    let t = Array1::<f64>::read_npy(archive.by_name(&member(T_ARRAY))?)?;
    let dt = Array0::<f64>::read_npy(archive.by_name(&member(DT_ARRAY))?)?.into_scalar();
    let roi_ids = Array1::<i64>::read_npy(archive.by_name(&member(ROI_IDS_ARRAY))?)?;
    let plane_key = read_unicode_npy(archive.by_name(&member(PLANE_KEY_ARRAY))?)?;
    let plane_index =
        Array0::<i64>::read_npy(archive.by_name(&member(PLANE_INDEX_ARRAY))?)?.into_scalar();

    Ok(PlaneTraces {
        plane_key,
        plane_index: (plane_index != MISSING_PLANE_INDEX).then_some(plane_index),
        x,
        t,
        dt,
        roi_ids,
    })
}

// Helper function to get the options of an archive member (stored, like numpy.savez)
fn member_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
}

/// Writes a string as a 0-d `<U{n}` array, the way NumPy stores `str` values.
fn write_unicode_npy<W: Write>(writer: W, value: &str) -> Result<()> {
    // NumPy never uses a zero-width unicode type
    let width = value.chars().count().max(1);
    let type_str = format!("<U{width}")
        .parse::<TypeStr>()
        .map_err(|e| TracesError::malformed(PLANE_KEY_ARRAY, e.to_string()))?;

    let mut npy = WriteOptions::<str>::new()
        .dtype(DType::new_scalar(type_str))
        .shape(&[])
        .writer(writer)
        .begin_nd()?;
    npy.push(value)?;
    npy.finish()?;

    Ok(())
}

/// Reads a 0-d unicode array written by NumPy or [`write_unicode_npy`].
fn read_unicode_npy<R: Read>(reader: R) -> Result<String> {
    let npy = NpyFile::new(reader)?;
    if !npy.shape().is_empty() {
        return Err(TracesError::malformed(
            PLANE_KEY_ARRAY,
            format!("expected a scalar, found shape {:?}", npy.shape()),
        ));
    }

    npy.into_vec::<String>()?
        .pop()
        .ok_or_else(|| TracesError::malformed(PLANE_KEY_ARRAY, "empty string member"))
}

// Helper function to get the archive member holding an array, as numpy.savez names it
fn member(name: &str) -> String {
    file_name_from_array_name(name)
}
