//! Reader for the collector's telemetry log.
//!
//! Columns are looked up by header name so extra or reordered columns do not matter. Fields are
//! parsed leniently: an empty battery column is "no reading", not a malformed row. Rows without a
//! parseable timestamp or address are skipped with a warning.

use csv::StringRecord;
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::StoreError;
use crate::models::telemetry::{NodeHistory, NodeId, SampleStatus, TelemetrySample};
use crate::utils::{parse_lenient_f64, parse_timestamp};

/// Per-node telemetry tails, keyed and iterated in node id order.
#[derive(Debug, Clone, Default)]
pub struct TelemetryTable {
    by_node: BTreeMap<NodeId, Vec<TelemetrySample>>,
}

impl TelemetryTable {
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.by_node.keys()
    }

    pub fn samples(&self, node: &NodeId) -> &[TelemetrySample] {
        self.by_node.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn history(&self, node: &NodeId) -> NodeHistory {
        NodeHistory::from_samples(self.samples(node))
    }

    /// Newest sample regardless of status.
    pub fn latest(&self, node: &NodeId) -> Option<&TelemetrySample> {
        self.samples(node).iter().max_by_key(|s| s.timestamp)
    }

    pub fn node_count(&self) -> usize {
        self.by_node.len()
    }

    pub fn sample_count(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }
}

struct Columns {
    timestamp: usize,
    address: usize,
    status: usize,
    battery: Option<usize>,
    voltage: Option<usize>,
    channel_util: Option<usize>,
    tx_util: Option<usize>,
    uptime: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord, path: &Path) -> Result<Self, StoreError> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let require = |name: &'static str| {
            find(name).ok_or_else(|| StoreError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })
        };
        Ok(Columns {
            timestamp: require("timestamp")?,
            address: require("address")?,
            status: require("status")?,
            battery: find("battery"),
            voltage: find("voltage"),
            channel_util: find("channel_util"),
            tx_util: find("tx_util"),
            uptime: find("uptime"),
        })
    }

    fn parse(&self, row: &StringRecord) -> Result<TelemetrySample, String> {
        let field = |index: usize| row.get(index).unwrap_or_default();
        let number = |index: Option<usize>| index.and_then(|i| parse_lenient_f64(field(i)));

        let raw_ts = field(self.timestamp);
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| format!("unparseable timestamp {:?}", raw_ts))?;
        let address = field(self.address).trim();
        if address.is_empty() {
            return Err("empty address".to_string());
        }

        Ok(TelemetrySample {
            timestamp,
            node_id: NodeId::new(address),
            status: SampleStatus::parse(field(self.status)),
            battery_pct: number(self.battery),
            voltage: number(self.voltage),
            channel_util_pct: number(self.channel_util),
            tx_util_pct: number(self.tx_util),
            uptime_s: number(self.uptime),
        })
    }
}

/// Read the telemetry log, keeping the last `max_per_node` rows of each node in file order.
///
/// A missing file yields an empty table: the collector may not have written anything yet.
pub fn read_telemetry(path: &Path, max_per_node: usize) -> Result<TelemetryTable, StoreError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist yet", path.display());
            return Ok(TelemetryTable::default());
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let csv_error = |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(file);
    let headers = reader.headers().map_err(csv_error)?.clone();
    if headers.is_empty() {
        return Ok(TelemetryTable::default());
    }
    let columns = Columns::locate(&headers, path)?;

    let mut tails: BTreeMap<NodeId, VecDeque<TelemetrySample>> = BTreeMap::new();
    for (index, row) in reader.records().enumerate() {
        let line = index + 2;
        let sample = match row.map_err(|e| e.to_string()).and_then(|r| columns.parse(&r)) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("{}: skipping line {}: {}", path.display(), line, e);
                continue;
            }
        };
        let tail = tails.entry(sample.node_id.clone()).or_default();
        tail.push_back(sample);
        if tail.len() > max_per_node {
            tail.pop_front();
        }
    }

    Ok(TelemetryTable {
        by_node: tails.into_iter().map(|(node, tail)| (node, Vec::from(tail))).collect(),
    })
}
