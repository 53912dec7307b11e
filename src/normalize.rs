//! Normalization of response-series arrays.
//!
//! Sessions store the same information in several shapes. The functions here
//! turn whatever was found into a `(time, roi)` matrix, a time axis with one
//! entry per sample, a sample interval and one id per ROI.

use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, Ix2};

use crate::types::*;

/// Orients a raw data array as `[num_samples, num_rois]`.
///
/// A one-dimensional array becomes a single column. A two-dimensional array
/// with fewer rows than columns is assumed to be stored `[roi, time]` and is
/// transposed.
///
/// The transpose is a heuristic: a recording with more ROIs than samples is
/// indistinguishable from a transposed one and will be flipped.
pub fn orient_traces(path: &str, data: ArrayD<f64>) -> Result<Array2<f64>> {
    let matrix = match data.ndim() {
        1 => {
            let column = data
                .into_dimensionality::<Ix1>()
                .map_err(|e| TracesError::malformed(path, e.to_string()))?;
            column.insert_axis(Axis(1))
        }
        2 => data
            .into_dimensionality::<Ix2>()
            .map_err(|e| TracesError::malformed(path, e.to_string()))?,
        ndim => {
            return Err(TracesError::malformed(
                path,
                format!("expected a 1-D or 2-D data array, found rank {ndim}"),
            ))
        }
    };

    if matrix.nrows() < matrix.ncols() {
        log::debug!(
            "{}: {} rows < {} columns, treating as [roi, time] and transposing",
            path,
            matrix.nrows(),
            matrix.ncols()
        );
        return Ok(matrix.reversed_axes().as_standard_layout().into_owned());
    }

    Ok(matrix)
}

/// Derives the time axis and sample interval for `num_samples` samples.
///
/// Rules, in order:
/// * stored timestamps of the right length are used as-is;
/// * stored timestamps of another length (more than one) are replaced by
///   `num_samples` evenly spaced points from the first to the last timestamp;
/// * with usable timestamps, `dt` is the median of consecutive differences
///   (NaN for a single sample);
/// * otherwise a positive `rate` gives `dt = 1 / rate` and `t = k * dt`;
/// * otherwise `dt` is NaN and `t` is the sample index.
pub fn derive_time_axis(
    num_samples: usize,
    timestamps: Option<&Array1<f64>>,
    rate: Option<f64>,
) -> (Array1<f64>, f64) {
    if let Some(timestamps) = timestamps {
        let usable = if timestamps.len() == num_samples {
            Some(timestamps.clone())
        } else if timestamps.len() > 1 {
            let first = timestamps[0];
            let last = timestamps[timestamps.len() - 1];
            Some(linspace(first, last, num_samples))
        } else {
            None
        };

        if let Some(t) = usable {
            let dt = median_interval(&t);
            return (t, dt);
        }

        log::debug!(
            "{} timestamp(s) cannot describe {} samples, ignoring them",
            timestamps.len(),
            num_samples
        );
    }

    let dt = match rate {
        Some(rate) if rate > 0.0 && rate.is_finite() => 1.0 / rate,
        _ => f64::NAN,
    };
    let step = if dt.is_finite() { dt } else { 1.0 };
    let t = Array1::from_shape_fn(num_samples, |i| i as f64 * step);

    (t, dt)
}

/// Median of consecutive differences of `t`, NaN with fewer than two points.
pub fn median_interval(t: &Array1<f64>) -> f64 {
    if t.len() < 2 {
        return f64::NAN;
    }

    let mut diffs: Vec<f64> = t
        .windows(2)
        .into_iter()
        .map(|window| window[1] - window[0])
        .collect();
    diffs.sort_by(f64::total_cmp);

    let mid = diffs.len() / 2;
    if diffs.len() % 2 == 0 {
        (diffs[mid - 1] + diffs[mid]) / 2.0
    } else {
        diffs[mid]
    }
}

/// `num` evenly spaced points from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, num: usize) -> Array1<f64> {
    match num {
        0 => Array1::zeros(0),
        1 => Array1::from_elem(1, start),
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut t = Array1::from_shape_fn(num, |i| start + i as f64 * step);
            t[num - 1] = stop;
            t
        }
    }
}

/// Chooses the ROI ids for `num_rois` columns.
///
/// Ids from a linked ROI table are kept only when there is exactly one per
/// column; otherwise the ids are `0..num_rois`.
pub fn select_roi_ids(table_ids: Option<Array1<i64>>, num_rois: usize) -> Array1<i64> {
    match table_ids {
        Some(ids) if ids.len() == num_rois => ids,
        Some(ids) => {
            log::debug!(
                "ROI table has {} ids for {} columns, using positional ids",
                ids.len(),
                num_rois
            );
            default_roi_ids(num_rois)
        }
        None => default_roi_ids(num_rois),
    }
}

// Helper function to build positional ROI ids
fn default_roi_ids(num_rois: usize) -> Array1<i64> {
    Array1::from_iter(0..num_rois as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array};

    #[test]
    fn tall_matrix_keeps_orientation() {
        let data = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn();
        let x = orient_traces("data", data).unwrap();
        assert_eq!(x, arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]));
    }

    #[test]
    fn wide_matrix_is_transposed() {
        let data = arr2(&[[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]).into_dyn();
        let x = orient_traces("data", data).unwrap();
        assert_eq!(x.dim(), (4, 2));
        assert_eq!(x.column(1), arr1(&[5.0, 6.0, 7.0, 8.0]));
        assert!(x.is_standard_layout());
    }

    #[test]
    fn square_matrix_is_not_transposed() {
        let data = arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn();
        let x = orient_traces("data", data).unwrap();
        assert_eq!(x[[0, 1]], 2.0);
    }

    #[test]
    fn vector_becomes_single_column() {
        let data = arr1(&[0.5, 0.25, 0.125]).into_dyn();
        let x = orient_traces("data", data).unwrap();
        assert_eq!(x.dim(), (3, 1));
        assert_eq!(x[[2, 0]], 0.125);
    }

    #[test]
    fn rank_three_is_malformed() {
        let data = Array::<f64, _>::zeros((2, 2, 2)).into_dyn();
        let err = orient_traces("/processing/plane-0/dff/data", data).unwrap_err();
        assert!(matches!(err, TracesError::Malformed { .. }));
    }

    #[test]
    fn matching_timestamps_are_used_directly() {
        let stamps = arr1(&[10.0, 10.5, 11.0, 11.5]);
        let (t, dt) = derive_time_axis(4, Some(&stamps), None);
        assert_eq!(t, stamps);
        assert_eq!(dt, 0.5);
    }

    #[test]
    fn mismatched_timestamps_are_resampled() {
        let stamps = arr1(&[2.0, 3.0, 4.0]);
        let (t, dt) = derive_time_axis(5, Some(&stamps), Some(100.0));
        assert_eq!(t.len(), 5);
        assert_eq!(t[0], 2.0);
        assert_eq!(t[4], 4.0);
        assert!((t[1] - 2.5).abs() < 1e-12);
        assert!((dt - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rate_defines_axis_without_timestamps() {
        let (t, dt) = derive_time_axis(4, None, Some(30.0));
        assert!((dt - 1.0 / 30.0).abs() < 1e-15);
        assert_eq!(t.len(), 4);
        assert_eq!(t[0], 0.0);
        assert!((t[3] - 3.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn no_time_information_gives_index_axis() {
        let (t, dt) = derive_time_axis(3, None, None);
        assert!(dt.is_nan());
        assert_eq!(t, arr1(&[0.0, 1.0, 2.0]));

        let (t, dt) = derive_time_axis(3, None, Some(0.0));
        assert!(dt.is_nan());
        assert_eq!(t, arr1(&[0.0, 1.0, 2.0]));
    }

    #[test]
    fn single_timestamp_falls_back_to_rate() {
        let stamps = arr1(&[7.0]);
        let (t, dt) = derive_time_axis(3, Some(&stamps), Some(2.0));
        assert_eq!(dt, 0.5);
        assert_eq!(t, arr1(&[0.0, 0.5, 1.0]));
    }

    #[test]
    fn single_sample_has_nan_interval() {
        let stamps = arr1(&[7.0]);
        let (t, dt) = derive_time_axis(1, Some(&stamps), None);
        assert_eq!(t, arr1(&[7.0]));
        assert!(dt.is_nan());
    }

    #[test]
    fn median_interval_ignores_outliers() {
        let t = arr1(&[0.0, 0.1, 0.2, 0.3, 5.0]);
        assert!((median_interval(&t) - 0.1).abs() < 1e-12);

        let t = arr1(&[0.0, 1.0, 3.0]);
        assert_eq!(median_interval(&t), 1.5);
    }

    #[test]
    fn linspace_hits_both_ends() {
        let t = linspace(0.0, 1.0, 4);
        assert_eq!(t[0], 0.0);
        assert_eq!(t[3], 1.0);
        assert!((t[1] - 1.0 / 3.0).abs() < 1e-15);
        assert_eq!(linspace(3.0, 9.0, 1), arr1(&[3.0]));
        assert_eq!(linspace(3.0, 9.0, 0).len(), 0);
    }

    #[test]
    fn roi_ids_from_table_when_lengths_match() {
        let ids = select_roi_ids(Some(arr1(&[101, 205, 307])), 3);
        assert_eq!(ids, arr1(&[101_i64, 205, 307]));
    }

    #[test]
    fn roi_ids_default_to_positions() {
        assert_eq!(select_roi_ids(None, 3), arr1(&[0_i64, 1, 2]));
        assert_eq!(select_roi_ids(Some(arr1(&[9, 8])), 3), arr1(&[0_i64, 1, 2]));
    }
}
