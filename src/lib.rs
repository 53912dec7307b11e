//! Extraction of calcium-imaging dF/F traces from NWB Zarr sessions.
//!
//! A session's NWB file, stored as `<base>/<session>/<session>.nwb.zarr`, is
//! read plane by plane. Each `plane-*` processing module with a `dff`
//! interface yields a `(time, roi)` matrix, its time axis, sample interval
//! and ROI ids. The session's stimulus table is read alongside. Planes can
//! then be saved as NumPy `.npz` archives.

mod normalize;
mod reader;
mod stimulus;
pub mod store;
pub mod types;
mod writer;

use std::path::{Path, PathBuf};

// Re-export types
pub use normalize::{derive_time_axis, linspace, median_interval, orient_traces, select_roi_ids};
pub use reader::{
    classify_dff, extract_plane, extract_planes, extract_traces_for_session, list_plane_keys,
    lookup_roi_ids, normalize_plane_key, parse_plane_index, DffInterface, ResponseSeries,
    PROCESSING_PATH,
};
pub use stimulus::{read_dynamic_table, read_stimulus_table, STIMULUS_TABLE_PATH};
pub use store::NwbStore;
pub use types::*;
pub use writer::{
    load_plane_archive, save_traces_npz, write_plane_archive, ARCHIVE_EXTENSION,
    MISSING_PLANE_INDEX,
};

/// Extracts a session and saves its planes, as described by `config`.
///
/// Returns the extracted traces together with the archive paths.
///
/// # Examples
///
/// ```no_run
/// use nwb_trace_importer::{run, SessionConfig};
///
/// let config = SessionConfig::from_json_file("session.json").unwrap();
/// let (traces, saved) = run(&config).unwrap();
/// println!("{}: {} planes saved", traces.session_name, saved.len());
/// ```
pub fn run(config: &SessionConfig) -> Result<(SessionTraces, Vec<PathBuf>)> {
    let traces = extract_traces_for_session(&config.session_name, &config.base_dir)?;
    let saved = save_traces_npz(&traces, &config.out_dir, Some(config.prefix()))?;
    Ok((traces, saved))
}

/// Loads a plane archive back into memory.
///
/// # Examples
///
/// ```no_run
/// use nwb_trace_importer::load;
///
/// let plane = load("outputs/session_plane-0.npz").unwrap();
/// println!("{} ROIs, dt = {:.4} s", plane.num_rois(), plane.dt);
/// ```
pub fn load<P: AsRef<Path>>(archive_path: P) -> Result<PlaneTraces> {
    writer::load_plane_archive(archive_path)
}
