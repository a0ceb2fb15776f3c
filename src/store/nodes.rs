//! Node positions from the collector's node list.
//!
//! The list is appended to on every discovery pass, so one node can appear many times; the last
//! row with a valid position wins. Rows without GPS (`N/A`, empty, out of range) are ignored.

use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::StoreError;
use crate::models::telemetry::{Location, LocationTable, NodeId};
use crate::utils::parse_lenient_f64;

pub fn read_locations(path: &Path, fallback: Option<Location>) -> Result<LocationTable, StoreError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist yet", path.display());
            return Ok(LocationTable::new(HashMap::new(), fallback));
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(file);
    let headers = reader
        .headers()
        .map_err(|source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    if headers.is_empty() {
        return Ok(LocationTable::new(HashMap::new(), fallback));
    }
    let find = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| StoreError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })
    };
    let (id_col, lat_col, lon_col) = (find("ID")?, find("Latitude")?, find("Longitude")?);

    let mut by_node = HashMap::new();
    for (index, row) in reader.records().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                warn!("{}: skipping line {}: {}", path.display(), index + 2, e);
                continue;
            }
        };
        let id = row.get(id_col).unwrap_or_default().trim();
        if id.is_empty() {
            continue;
        }
        let lat = row.get(lat_col).and_then(parse_lenient_f64);
        let lon = row.get(lon_col).and_then(parse_lenient_f64);
        if let (Some(lat), Some(lon)) = (lat, lon) {
            let location = Location::new(lat, lon);
            if location.is_valid() {
                by_node.insert(NodeId::new(id), location);
            }
        }
    }
    debug!("{}: {} node(s) with a position", path.display(), by_node.len());

    Ok(LocationTable::new(by_node, fallback))
}
