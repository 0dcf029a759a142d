//!
//! src/reconcile.rs  Andrew Belles  Oct 3rd, 2025
//!
//! Joins the acquired catalog against the reference dataset on the
//! normalized ISRC. Produces the full catalog table and the inner join
//!

use std::collections::HashSet;

use tracing::info;

use crate::dataset::{ReferenceRecord, ReferenceSet};
use crate::errors::ReconcileError;
use crate::types::{NormalizedKey, Track};

pub const KEY_COLUMN: &str = "isrc_normalized";

pub const CATALOG_COLUMNS: [&str; 7] = [
    "track_name",
    "track_id",
    "album_id",
    "album_name",
    "album_release_date",
    "isrc",
    KEY_COLUMN
];

const CATALOG_SUFFIX: &str = "_catalog";
const REFERENCE_SUFFIX: &str = "_unclaimed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub track: Track,
    pub key: NormalizedKey
}

impl CatalogRow {
    /// Cell values in `CATALOG_COLUMNS` order, absent fields as ""
    pub fn values(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            opt(&self.track.track_name),
            self.track.track_id.as_str().to_string(),
            self.track.album_id.as_str().to_string(),
            opt(&self.track.album_name),
            opt(&self.track.album_release_date),
            opt(&self.track.isrc),
            self.key.as_str().to_string()
        ]
    }
}

/// The artist catalog, one row per track, each with its join key
#[derive(Debug, Clone, Default)]
pub struct CatalogTable {
    rows: Vec<CatalogRow>
}

impl CatalogTable {
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let rows = tracks.into_iter()
            .map(|track| {
                let key = track.key();
                CatalogRow { track, key }
            })
            .collect();
        Self { rows }
    }

    pub fn headers(&self) -> Vec<String> {
        CATALOG_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn missing_identifier_count(&self) -> usize {
        self.rows.iter().filter(|r| r.key.is_empty()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRow {
    pub catalog: CatalogRow,
    pub reference: ReferenceRecord
}

/// Inner join of catalog and reference rows sharing a non-empty key
#[derive(Debug, Clone, Default)]
pub struct MatchTable {
    headers: Vec<String>,
    reference_columns: Vec<usize>,
    rows: Vec<MatchRow>
}

impl MatchTable {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[MatchRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell values aligned with `headers()`
    pub fn row_values(&self, row: &MatchRow) -> Vec<String> {
        let mut out = row.catalog.values();
        out.extend(self.reference_columns.iter()
            .map(|&i| row.reference.value(i).unwrap_or_default().to_string()));
        out
    }
}

/// Catalog columns, then every reference column except a clashing key
/// column. Names on both sides get `_catalog` / `_unclaimed` suffixes
fn joined_headers(reference: &[String]) -> (Vec<String>, Vec<usize>) {
    let reference_columns: Vec<usize> = (0..reference.len())
        .filter(|&i| reference[i] != KEY_COLUMN)
        .collect();

    let left: HashSet<&str> = CATALOG_COLUMNS.iter()
        .copied()
        .filter(|c| *c != KEY_COLUMN)
        .collect();
    let right: HashSet<&str> = reference_columns.iter()
        .map(|&i| reference[i].as_str())
        .collect();

    let mut headers: Vec<String> = CATALOG_COLUMNS.iter()
        .map(|c| if right.contains(c) {
            format!("{c}{CATALOG_SUFFIX}")
        } else {
            c.to_string()
        })
        .collect();

    headers.extend(reference_columns.iter().map(|&i| {
        let name = reference[i].as_str();
        if left.contains(name) {
            format!("{name}{REFERENCE_SUFFIX}")
        } else {
            name.to_string()
        }
    }));
    (headers, reference_columns)
}

/// Rejects reference sets the join cannot trust
fn validate(reference: &ReferenceSet) -> Result<(), ReconcileError> {
    let width = reference.headers().len();
    if reference.identifier_column() >= width {
        return Err(ReconcileError::Join(format!(
            "identifier column {} outside {width} headers", reference.identifier_column()
        )));
    }

    let mut keys: HashSet<&NormalizedKey> = HashSet::new();
    for (row, record) in reference.records().iter().enumerate() {
        if record.values().len() != width {
            return Err(ReconcileError::Join(format!(
                "reference row {row} has {} values, expected {width}", record.values().len()
            )));
        }
        if !keys.insert(&record.key) {
            return Err(ReconcileError::Join(format!(
                "reference key {:?} is not unique", record.key.as_str()
            )));
        }
    }
    Ok(())
}

/// Returns the catalog unchanged plus its matches, in catalog order.
/// Catalog rows without an identifier never match, even if the
/// reference holds an empty-keyed record
pub fn compute_matches(catalog: CatalogTable, reference: &ReferenceSet) ->
    Result<(CatalogTable, MatchTable), ReconcileError> {

    validate(reference)?;
    let (headers, reference_columns) = joined_headers(reference.headers());

    let rows: Vec<MatchRow> = catalog.rows.iter()
        .filter(|row| !row.key.is_empty())
        .filter_map(|row| reference.get(&row.key).map(|record| MatchRow {
            catalog: row.clone(),
            reference: record.clone()
        }))
        .collect();

    info!(
        catalog = catalog.len(), reference = reference.len(),
        missing_isrc = catalog.missing_identifier_count(), matched = rows.len(),
        "reconcile.joined"
    );
    Ok((catalog, MatchTable { headers, reference_columns, rows }))
}
