//!
//! src/dataset.rs  Andrew Belles  Oct 2nd, 2025
//!
//! Loads the unclaimed works dataset: tab separated, every field kept
//! as text, identifier column located by an ordered list of header
//! matchers, rows keyed by normalized ISRC and collapsed on first sight
//!

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::ReconcileError;
use crate::types::NormalizedKey;

/// Header spellings accepted verbatim for the identifier column
pub const ISRC_HEADERS: [&str; 6] = [
    "ISRC", "isrc", "Isrc", "ISRC_code", "isrc_code", "ISRC Code"
];

/// Decides whether a header names the identifier column
pub trait HeaderMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, header: &str) -> bool;
}

/// Trimmed header must be one of the listed spellings
pub struct ExactSpelling(pub &'static [&'static str]);

impl HeaderMatcher for ExactSpelling {
    fn name(&self) -> &'static str { "exact" }

    fn matches(&self, header: &str) -> bool {
        self.0.contains(&header.trim())
    }
}

/// Case and whitespace insensitive comparison against the listed spellings
pub struct CompactSpelling(pub &'static [&'static str]);

impl CompactSpelling {
    fn compact(s: &str) -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    }
}

impl HeaderMatcher for CompactSpelling {
    fn name(&self) -> &'static str { "compact" }

    fn matches(&self, header: &str) -> bool {
        let header = Self::compact(header);
        self.0.iter().any(|s| Self::compact(s) == header)
    }
}

pub fn default_matchers() -> Vec<Box<dyn HeaderMatcher>> {
    vec![
        Box::new(ExactSpelling(&ISRC_HEADERS)),
        Box::new(CompactSpelling(&ISRC_HEADERS)),
    ]
}

/// Index of the identifier column. Each matcher scans every header
/// before the next matcher is consulted
pub fn locate_identifier_column(
    headers: &[String],
    matchers: &[Box<dyn HeaderMatcher>]
) -> Result<usize, ReconcileError> {
    for matcher in matchers {
        if let Some(idx) = headers.iter().position(|h| matcher.matches(h)) {
            info!(column = %headers[idx], matcher = matcher.name(), "dataset.isrc_column");
            return Ok(idx);
        }
    }
    Err(ReconcileError::Schema(format!(
        "could not locate ISRC column; expected a header like 'ISRC', found {headers:?}"
    )))
}

/// One row of the dataset with its join key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRecord {
    pub key: NormalizedKey,
    values: Vec<String>
}

impl ReferenceRecord {
    pub fn new(key: NormalizedKey, values: Vec<String>) -> Self {
        Self { key, values }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn value(&self, column: usize) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

/// The loaded dataset: original headers, unique-keyed records in file order
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    headers: Vec<String>,
    identifier_column: usize,
    records: Vec<ReferenceRecord>,
    index: HashMap<NormalizedKey, usize>,
    source: Option<PathBuf>,
    duplicates_dropped: usize
}

impl ReferenceSet {
    pub fn load(path: &Path) -> Result<Self, ReconcileError> {
        Self::load_with(path, &default_matchers())
    }

    pub fn load_with(path: &Path, matchers: &[Box<dyn HeaderMatcher>]) ->
        Result<Self, ReconcileError> {
        let file = File::open(path)?;
        let mut set = Self::from_reader(file, matchers)?;
        set.source = Some(path.to_path_buf());

        info!(
            path = %path.display(), rows = set.len(),
            duplicates = set.duplicates_dropped, "dataset.loaded"
        );
        Ok(set)
    }

    pub fn from_reader<R: Read>(reader: R, matchers: &[Box<dyn HeaderMatcher>]) ->
        Result<Self, ReconcileError> {

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if let Some(first) = headers.first_mut() {
            *first = first.trim_start_matches('\u{feff}').to_string();
        }

        // schema check happens before any row is read
        let identifier_column = locate_identifier_column(&headers, matchers)?;

        let width = headers.len();
        let mut records = Vec::new();
        let mut index = HashMap::new();
        let mut duplicates_dropped = 0_usize;
        let mut empty_keys = 0_usize;

        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            if record.len() > width {
                return Err(ReconcileError::Parse(format!(
                    "row {} has {} fields, header has {width}", row + 2, record.len()
                )));
            }

            let mut values: Vec<String> = record.iter().map(str::to_string).collect();
            values.resize(width, String::new());

            let key = NormalizedKey::from_raw(Some(&values[identifier_column]));
            if key.is_empty() {
                empty_keys += 1;
            }
            if index.contains_key(&key) {
                duplicates_dropped += 1;
                continue;
            }
            index.insert(key.clone(), records.len());
            records.push(ReferenceRecord::new(key, values));
        }

        if empty_keys > 0 {
            warn!(rows = empty_keys, "dataset.rows_without_isrc");
        }

        Ok(Self {
            headers,
            identifier_column,
            records,
            index,
            source: None,
            duplicates_dropped
        })
    }

    /// Builds a set from already parsed parts; records are taken as given
    #[cfg(test)]
    pub fn from_parts(
        headers: Vec<String>,
        identifier_column: usize,
        records: Vec<ReferenceRecord>
    ) -> Self {
        let mut index = HashMap::new();
        for (i, r) in records.iter().enumerate() {
            index.entry(r.key.clone()).or_insert(i);
        }
        Self {
            headers,
            identifier_column,
            records,
            index,
            source: None,
            duplicates_dropped: 0
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn identifier_column(&self) -> usize {
        self.identifier_column
    }

    pub fn identifier_header(&self) -> Option<&str> {
        self.headers.get(self.identifier_column).map(String::as_str)
    }

    pub fn records(&self) -> &[ReferenceRecord] {
        &self.records
    }

    pub fn get(&self, key: &NormalizedKey) -> Option<&ReferenceRecord> {
        self.index.get(key).and_then(|&i| self.records.get(i))
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates_dropped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn load_str(tsv: &str) -> Result<ReferenceSet, ReconcileError> {
        ReferenceSet::from_reader(tsv.as_bytes(), &default_matchers())
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_documented_spellings_are_accepted() {
        for spelling in ISRC_HEADERS {
            let cols = headers(&["Title", spelling, "Share"]);
            let idx = locate_identifier_column(&cols, &default_matchers()).unwrap();
            assert_eq!(idx, 1, "spelling {spelling}");
        }
    }

    #[test]
    fn padded_header_matches_exactly_after_trim() {
        let cols = headers(&["Title", "  ISRC "]);
        assert_eq!(locate_identifier_column(&cols, &default_matchers()).unwrap(), 1);
    }

    #[test]
    fn fuzzy_variants_fall_back_to_compact_match() {
        for fuzzy in ["isrc code", "IsRc", "ISRCCODE", " i s r c "] {
            let cols = headers(&["Work", fuzzy]);
            let idx = locate_identifier_column(&cols, &default_matchers()).unwrap();
            assert_eq!(idx, 1, "header {fuzzy:?}");
        }
    }

    #[test]
    fn exact_match_beats_earlier_fuzzy_column() {
        let cols = headers(&["isrc code", "ISRC"]);
        assert_eq!(locate_identifier_column(&cols, &default_matchers()).unwrap(), 1);
    }

    #[test]
    fn missing_identifier_column_is_schema_error() {
        let result = load_str("Title\tWriter\tShare\nSong\tSomeone\t50\n");
        assert!(matches!(result, Err(ReconcileError::Schema(_))));

        let cols = headers(&["ISWC", "isrc_id"]);
        let result = locate_identifier_column(&cols, &default_matchers());
        assert!(matches!(result, Err(ReconcileError::Schema(_))));
    }

    #[test]
    fn duplicate_keys_keep_first_row() {
        let set = load_str(
            "ISRC\tTitle\tShare\n\
             usa1x1234567\tFirst\t10\n\
             USA1X1234567 \tSecond\t20\n\
             GBAHS1700024\tThird\t30\n"
        ).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.duplicates_dropped(), 1);
        let key = NormalizedKey::from_raw(Some("USA1X1234567"));
        let record = set.get(&key).unwrap();
        assert_eq!(record.value(1), Some("First"));
        assert_eq!(record.value(2), Some("10"));
    }

    #[test]
    fn fields_stay_text_and_columns_are_preserved() {
        let set = load_str("Share\tISRC\tDate\n007.50\tGBAHS1700024\t2017-03-03\n").unwrap();
        assert_eq!(set.headers(), &["Share", "ISRC", "Date"]);
        assert_eq!(set.identifier_column(), 1);
        assert_eq!(set.records()[0].values(), &["007.50", "GBAHS1700024", "2017-03-03"]);
    }

    #[test]
    fn short_rows_are_padded_long_rows_rejected() {
        let set = load_str("ISRC\tTitle\tShare\nGBAHS1700024\tPerfect\n").unwrap();
        assert_eq!(set.records()[0].values(), &["GBAHS1700024", "Perfect", ""]);

        let result = load_str("ISRC\tTitle\nGBAHS1700024\tPerfect\textra\n");
        assert!(matches!(result, Err(ReconcileError::Parse(_))));
    }

    #[test]
    fn byte_order_mark_does_not_hide_the_header() {
        let set = load_str("\u{feff}ISRC\tTitle\nGBAHS1700024\tPerfect\n").unwrap();
        assert_eq!(set.identifier_header(), Some("ISRC"));
    }

    #[test]
    fn blank_identifiers_collapse_into_one_empty_key() {
        let set = load_str("ISRC\tTitle\n\tA\n  \tB\nGBAHS1700024\tC\n").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.records()[0].key.is_empty());
    }

    #[test]
    fn load_reads_from_disk_and_remembers_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Isrc\tWork\nGBAHS1700024\tPerfect\n").unwrap();

        let set = ReferenceSet::load(file.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.source(), Some(file.path()));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = ReferenceSet::load(Path::new("/definitely/not/here.tsv"));
        assert!(matches!(result, Err(ReconcileError::Io(_))));
    }
}
