use ndarray::{Array1, ArrayD, Ix1};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use crate::normalize::{derive_time_axis, orient_traces, select_roi_ids};
use crate::stimulus::read_stimulus_table;
use crate::store::{join_path, reference_path, NwbStore};
use crate::types::*;

/// Group holding one processing module per imaging plane
pub const PROCESSING_PATH: &str = "/processing";

// Naming conventions of the NWB layout
const PLANE_PREFIX: &str = "plane-";
const DFF_INTERFACE: &str = "dff";
const DATA_ARRAY: &str = "data";
const TIMESTAMPS_ARRAY: &str = "timestamps";
const STARTING_TIME_ARRAY: &str = "starting_time";
const RATE_ATTRIBUTE: &str = "rate";
const ROIS_ARRAY: &str = "rois";
const TABLE_ATTRIBUTE: &str = "table";
const ID_ARRAY: &str = "id";

/// A response series: a group owning a `data` array and, optionally, a time
/// reference and a link to the ROI table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSeries {
    /// Node path of the series group
    pub path: String,
}

impl ResponseSeries {
    /// Creates a handle for the series group at `path`.
    pub fn new<S: Into<String>>(path: S) -> Self {
        ResponseSeries { path: path.into() }
    }

    /// Node path of the series' data array.
    pub fn data_path(&self) -> String {
        join_path(&self.path, DATA_ARRAY)
    }
}

/// The two shapes a plane's `dff` interface comes in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DffInterface {
    /// The interface is itself a response series
    DirectSeries(ResponseSeries),
    /// The interface contains one or more named response series
    IndirectSeriesContainer {
        /// Contained series keyed by name
        series_by_name: BTreeMap<String, ResponseSeries>,
    },
}

impl DffInterface {
    /// Returns the series to extract from.
    ///
    /// A container yields its first series by name.
    pub fn resolve(self, path: &str) -> Result<ResponseSeries> {
        match self {
            DffInterface::DirectSeries(series) => Ok(series),
            DffInterface::IndirectSeriesContainer { series_by_name } => series_by_name
                .into_values()
                .next()
                .ok_or_else(|| TracesError::UnresolvableSeries {
                    path: path.to_string(),
                }),
        }
    }
}

/// Loads a session and extracts per-plane traces and its stimulus table.
///
/// The store is expected at `<base_dir>/<session_name>/<session_name>.nwb.zarr`.
///
/// # Errors
///
/// * [`TracesError::StoreNotFound`] if the store does not exist; nothing else
///   is attempted.
/// * [`TracesError::StimulusTable`] if the stimulus table cannot be read.
///
/// Failures inside a single plane are logged and that plane is left out of
/// the result.
pub fn extract_traces_for_session<P: AsRef<Path>>(
    session_name: &str,
    base_dir: P,
) -> Result<SessionTraces> {
    // Start timing
    let tic = Instant::now();

    let session = Session::new(session_name, base_dir.as_ref());
    let store = NwbStore::open(session.store_path())?;
    log::info!("Reading NWB session {} from {}", session.name, store.root().display());

    let stim_table = read_stimulus_table(&store)?;
    log::info!("Found stimulus table with {} rows.", stim_table.num_rows());

    let planes = extract_planes(&store)?;

    log::info!(
        "Extracted {} plane{} in {:.1} seconds",
        planes.len(),
        if planes.len() != 1 { "s" } else { "" },
        tic.elapsed().as_secs_f64()
    );

    Ok(SessionTraces {
        session_name: session.name,
        stim_table,
        planes,
    })
}

/// Extracts every plane of an opened store.
///
/// Planes without a `dff` interface produce nothing. Planes that fail are
/// logged with a warning and skipped; the others are returned in ascending
/// key order.
pub fn extract_planes(store: &NwbStore) -> Result<Vec<PlaneTraces>> {
    let mut planes = Vec::new();

    for plane_key in list_plane_keys(store)? {
        match extract_plane(store, &plane_key) {
            Ok(Some(plane)) => planes.push(plane),
            Ok(None) => {}
            Err(e) => log::warn!("[skip] {plane_key}: {e}"),
        }
    }

    Ok(planes)
}

/// Lists the processing modules named `plane-*`, sorted ascending.
///
/// A store without a processing group has no planes.
pub fn list_plane_keys(store: &NwbStore) -> Result<Vec<String>> {
    if !store.exists(PROCESSING_PATH) {
        return Ok(Vec::new());
    }

    let keys = store
        .children(PROCESSING_PATH)?
        .into_iter()
        .filter(|key| key.starts_with(PLANE_PREFIX))
        .collect();

    Ok(keys)
}

/// Extracts a single plane.
///
/// `plane` may be a full key (`plane-2`) or just its suffix (`2`). Returns
/// `Ok(None)` when the plane has no `dff` interface.
pub fn extract_plane(store: &NwbStore, plane: &str) -> Result<Option<PlaneTraces>> {
    let plane_key = normalize_plane_key(plane);
    let plane_path = join_path(PROCESSING_PATH, &plane_key);
    if !store.exists(&plane_path) {
        return Err(TracesError::MissingNode { path: plane_path });
    }

    let dff_path = join_path(&plane_path, DFF_INTERFACE);
    if !store.exists(&dff_path) {
        log::debug!("{plane_key}: no {DFF_INTERFACE} interface");
        return Ok(None);
    }

    let series = classify_dff(store, &dff_path)?.resolve(&dff_path)?;

    let data_path = series.data_path();
    let x = orient_traces(&data_path, store.read_f64(&data_path)?)?;

    let timestamps = read_timestamps(store, &series)?;
    let rate = read_rate(store, &series)?;
    let (t, dt) = derive_time_axis(x.nrows(), timestamps.as_ref(), rate);

    let roi_ids = select_roi_ids(lookup_roi_ids(store, &series)?, x.ncols());

    Ok(Some(PlaneTraces {
        plane_index: parse_plane_index(&plane_key),
        plane_key,
        x,
        t,
        dt,
        roi_ids,
    }))
}

/// Decides which shape the `dff` interface at `path` has.
///
/// An interface owning a `data` array is a direct series. Otherwise its child
/// groups owning a `data` array form a container. Anything else cannot be
/// resolved.
pub fn classify_dff(store: &NwbStore, path: &str) -> Result<DffInterface> {
    if store.is_array(&join_path(path, DATA_ARRAY)) {
        return Ok(DffInterface::DirectSeries(ResponseSeries::new(path)));
    }

    let mut series_by_name = BTreeMap::new();
    for name in store.children(path)? {
        let series = ResponseSeries::new(join_path(path, &name));
        if store.is_array(&series.data_path()) {
            series_by_name.insert(name, series);
        }
    }

    if series_by_name.is_empty() {
        return Err(TracesError::UnresolvableSeries {
            path: path.to_string(),
        });
    }

    Ok(DffInterface::IndirectSeriesContainer { series_by_name })
}

/// Looks up the ids of the ROI table a series is linked to.
///
/// Each step of the chain returns `None` when it cannot produce ids: the
/// series' `rois` array is absent, its `table` reference is absent or points
/// into another file, or the table's `id` array is missing, not 1-D, or not
/// whole numbers. Float ids holding whole numbers are narrowed to `i64`.
/// Errors reading nodes that do exist are returned.
pub fn lookup_roi_ids(store: &NwbStore, series: &ResponseSeries) -> Result<Option<Array1<i64>>> {
    let rois_path = join_path(&series.path, ROIS_ARRAY);
    if !store.exists(&rois_path) {
        return Ok(None);
    }

    let attributes = store.attributes(&rois_path)?;
    let Some(reference) = attributes.get(TABLE_ATTRIBUTE) else {
        return Ok(None);
    };
    let table_path = match reference_path(&rois_path, reference) {
        Ok(Some(table_path)) => table_path,
        Ok(None) => return Ok(None),
        Err(e @ TracesError::ExternalLink { .. }) => {
            log::warn!("{e}, using positional ROI ids");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let id_path = join_path(&table_path, ID_ARRAY);
    if !store.is_array(&id_path) {
        return Ok(None);
    }

    let ids = match store.read_i64(&id_path) {
        Ok(ids) => ids,
        Err(TracesError::UnsupportedDataType { .. }) => match whole_number_ids(store, &id_path) {
            Some(ids) => ids,
            None => {
                log::debug!("{id_path}: ids are not integers, using positional ROI ids");
                return Ok(None);
            }
        },
        Err(e) => return Err(e),
    };

    match ids.into_dimensionality::<Ix1>() {
        Ok(ids) => Ok(Some(ids)),
        Err(_) => {
            log::debug!("{id_path}: ids are not 1-D, using positional ROI ids");
            Ok(None)
        }
    }
}

// Helper function to read float ids that hold whole numbers
fn whole_number_ids(store: &NwbStore, id_path: &str) -> Option<ArrayD<i64>> {
    let values = store.read_f64(id_path).ok()?;
    let whole = values
        .iter()
        .all(|v| v.is_finite() && v.fract() == 0.0 && v.abs() <= i64::MAX as f64);
    whole.then(|| values.mapv(|v| v as i64))
}

/// Prepends `plane-` to a plane name that lacks it.
///
/// # Examples
///
/// ```
/// use nwb_trace_importer::normalize_plane_key;
///
/// assert_eq!(normalize_plane_key("3"), "plane-3");
/// assert_eq!(normalize_plane_key("plane-3"), "plane-3");
/// ```
pub fn normalize_plane_key(plane: &str) -> String {
    if plane.starts_with(PLANE_PREFIX) {
        plane.to_string()
    } else {
        format!("{PLANE_PREFIX}{plane}")
    }
}

/// Parses the integer after the first `-` of a plane key.
pub fn parse_plane_index(plane_key: &str) -> Option<i64> {
    plane_key
        .split_once('-')
        .and_then(|(_, suffix)| suffix.trim().parse().ok())
}

// Helper function to read stored or linked timestamps of a series
fn read_timestamps(store: &NwbStore, series: &ResponseSeries) -> Result<Option<Array1<f64>>> {
    let direct = join_path(&series.path, TIMESTAMPS_ARRAY);
    let path = if store.exists(&direct) {
        direct
    } else {
        match store.resolve_link(&series.path, TIMESTAMPS_ARRAY)? {
            Some(target) => target,
            None => return Ok(None),
        }
    };

    let timestamps = store
        .read_f64(&path)?
        .into_dimensionality::<Ix1>()
        .map_err(|e| TracesError::malformed(&path, e.to_string()))?;

    Ok(Some(timestamps))
}

// Helper function to read the sampling rate stored on `starting_time`
fn read_rate(store: &NwbStore, series: &ResponseSeries) -> Result<Option<f64>> {
    let path = join_path(&series.path, STARTING_TIME_ARRAY);
    if !store.exists(&path) {
        return Ok(None);
    }

    let attributes = store.attributes(&path)?;
    Ok(attributes.get(RATE_ATTRIBUTE).and_then(|rate| rate.as_f64()))
}
