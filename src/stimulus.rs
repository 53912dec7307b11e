use ndarray::Ix1;
use serde_json::Value;

use crate::store::{join_path, NwbStore};
use crate::types::*;

/// Location of the stimulus presentation table inside an NWB file
pub const STIMULUS_TABLE_PATH: &str = "/intervals/stimulus_table";

// Columns every interval table has; they must always be readable
const REQUIRED_COLUMNS: [&str; 2] = ["start_time", "stop_time"];

/// Reads the session's stimulus table.
///
/// Any failure is wrapped in [`TracesError::StimulusTable`] with the
/// underlying error kept as its source.
pub fn read_stimulus_table(store: &NwbStore) -> Result<StimulusTable> {
    read_dynamic_table(store, STIMULUS_TABLE_PATH).map_err(|source| TracesError::StimulusTable {
        source: Box::new(source),
    })
}

/// Reads an hdmf `DynamicTable` group as a flat table.
///
/// The group holds an `id` array, one array per column and a `colnames`
/// attribute giving the column order. Ragged columns (those with a
/// `<name>_index` companion) do not fit a flat table and are skipped.
/// Other columns that cannot be decoded are skipped with a warning, except
/// `start_time` and `stop_time`. A column whose length differs from the
/// number of rows is always an error.
pub fn read_dynamic_table(store: &NwbStore, path: &str) -> Result<StimulusTable> {
    if !store.exists(path) {
        return Err(TracesError::MissingNode {
            path: path.to_string(),
        });
    }

    let id_path = join_path(path, "id");
    let ids = store
        .read_i64(&id_path)?
        .into_dimensionality::<Ix1>()
        .map_err(|e| TracesError::malformed(&id_path, e.to_string()))?;

    let mut columns = Vec::new();
    for name in column_names(store, path)? {
        if store.exists(&join_path(path, &format!("{name}_index"))) {
            log::debug!("{path}: skipping ragged column {name}");
            continue;
        }

        let column_path = join_path(path, &name);
        let column = match store.read_column(&column_path) {
            Ok(column) => column,
            Err(e) if !REQUIRED_COLUMNS.contains(&name.as_str()) => {
                log::warn!("{path}: skipping column {name}: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        if column.len() != ids.len() {
            return Err(TracesError::malformed(
                &column_path,
                format!("{} values for {} rows", column.len(), ids.len()),
            ));
        }

        columns.push((name, column));
    }

    Ok(StimulusTable { ids, columns })
}

// Helper function to get the declared column order of a table
fn column_names(store: &NwbStore, path: &str) -> Result<Vec<String>> {
    let attributes = store.attributes(path)?;

    let names = match attributes.get("colnames") {
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(name)) => vec![name.clone()],
        _ => store
            .children(path)?
            .into_iter()
            .filter(|name| name != "id" && !name.ends_with("_index"))
            .collect(),
    };

    Ok(names)
}
