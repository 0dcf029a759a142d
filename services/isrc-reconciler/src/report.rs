//!
//! src/report.rs  Andrew Belles  Oct 3rd, 2025
//!
//! Lays the reconciliation results out as named sheets and writes
//! them to an xlsx workbook, atomically replacing the target file.
//! The workbook is rendered and written on the blocking pool
//!

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rust_xlsxwriter::{Format, Workbook};
use tracing::info;

use crate::errors::ReconcileError;
use crate::reconcile::{CatalogTable, MatchTable};

pub const CATALOG_SHEET: &str = "Artist Catalog";
pub const MATCHES_SHEET: &str = "Matches";
pub const NOTES_SHEET: &str = "Notes";

/// Counts describing one run, rendered as the notes line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub artist_name: String,
    pub total_tracks: usize,
    pub missing_isrc: usize,
    pub dataset_path: String,
    pub matched_rows: usize
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Artist: {}. Total tracks: {}. Tracks missing ISRC: {}. Dataset path: {}. Matched rows: {}.",
            self.artist_name, self.total_tracks, self.missing_isrc,
            self.dataset_path, self.matched_rows
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub sheets: Vec<Sheet>
}

impl Report {
    pub fn build(catalog: &CatalogTable, matches: &MatchTable, summary: &RunSummary) -> Self {
        let catalog_sheet = Sheet {
            name: CATALOG_SHEET.to_string(),
            headers: catalog.headers(),
            rows: catalog.rows().iter().map(|r| r.values()).collect()
        };
        let matches_sheet = Sheet {
            name: MATCHES_SHEET.to_string(),
            headers: matches.headers().to_vec(),
            rows: matches.rows().iter().map(|r| matches.row_values(r)).collect()
        };
        let notes_sheet = Sheet {
            name: NOTES_SHEET.to_string(),
            headers: vec!["Notes".to_string()],
            rows: vec![vec![summary.to_string()]]
        };
        Self { sheets: vec![catalog_sheet, matches_sheet, notes_sheet] }
    }

    #[cfg(test)]
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// Destination for a finished report
#[async_trait]
pub trait ReportSink: Send {
    async fn write(&mut self, report: Report) -> Result<(), ReconcileError>;
}

pub struct XlsxReportWriter {
    path: PathBuf
}

impl XlsxReportWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(report: &Report) -> Result<Vec<u8>, ReconcileError> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();

        for sheet in &report.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;

            for (col, header) in sheet.headers.iter().enumerate() {
                worksheet.write_string_with_format(0, column(col)?, header, &bold)?;
            }
            for (i, row) in sheet.rows.iter().enumerate() {
                let r = u32::try_from(i + 1)
                    .map_err(|_| ReconcileError::Report(format!("{}: too many rows", sheet.name)))?;
                for (col, value) in row.iter().enumerate() {
                    worksheet.write_string(r, column(col)?, value)?;
                }
            }
            worksheet.autofit();
        }
        Ok(workbook.save_to_buffer()?)
    }
}

fn column(idx: usize) -> Result<u16, ReconcileError> {
    u16::try_from(idx).map_err(|_| ReconcileError::Report(format!("column {idx} out of range")))
}

fn write_workbook(path: &Path, report: &Report) -> Result<usize, ReconcileError> {
    let bytes = XlsxReportWriter::render(report)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from(".")
    };
    fs::create_dir_all(&parent).map_err(|e|
        ReconcileError::Report(format!("create dir {}: {e}", parent.display()))
    )?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|e| ReconcileError::Report(
            format!("tempfile in {}: {e}", parent.display())
        ))?;
    temp.write_all(&bytes)
        .map_err(|e| ReconcileError::Report(format!("write workbook: {e}")))?;
    temp.persist(path).map_err(|e|
        ReconcileError::Report(format!("persist {}: {e}", path.display()))
    )?;
    Ok(bytes.len())
}

#[async_trait]
impl ReportSink for XlsxReportWriter {
    async fn write(&mut self, report: Report) -> Result<(), ReconcileError> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || write_workbook(&path, &report))
            .await
            .map_err(|e| ReconcileError::Report(format!("workbook task: {e}")))??;

        info!(path = %self.path.display(), bytes, "report.written");
        Ok(())
    }
}

/// Keeps reports in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemoryReportSink {
    pub written: Vec<Report>
}

#[cfg(test)]
#[async_trait]
impl ReportSink for MemoryReportSink {
    async fn write(&mut self, report: Report) -> Result<(), ReconcileError> {
        self.written.push(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::dataset::{ReferenceRecord, ReferenceSet};
    use crate::reconcile::compute_matches;
    use crate::types::{NormalizedKey, SpotifyAlbumId, SpotifyTrackId, Track};

    fn summary() -> RunSummary {
        RunSummary {
            artist_name: "Ed Sheeran".into(),
            total_tracks: 2,
            missing_isrc: 1,
            dataset_path: "data/shares.tsv".into(),
            matched_rows: 1
        }
    }

    fn sample_report() -> Report {
        let catalog = CatalogTable::from_tracks(vec![Track {
            track_name: Some("Perfect".into()),
            track_id: SpotifyTrackId("t1".into()),
            album_id: SpotifyAlbumId("a1".into()),
            album_name: Some("Divide".into()),
            album_release_date: Some("2017-03-03".into()),
            isrc: Some("GBAHS1700024".into())
        }]);
        let reference = ReferenceSet::from_parts(
            vec!["ISRC".into(), "Share".into()],
            0,
            vec![ReferenceRecord::new(
                NormalizedKey::from_raw(Some("GBAHS1700024")),
                vec!["GBAHS1700024".into(), "50".into()]
            )]
        );
        let (catalog, matches) = compute_matches(catalog, &reference).unwrap();
        Report::build(&catalog, &matches, &summary())
    }

    #[test]
    fn summary_line_has_fixed_wording() {
        assert_eq!(
            summary().to_string(),
            "Artist: Ed Sheeran. Total tracks: 2. Tracks missing ISRC: 1. \
             Dataset path: data/shares.tsv. Matched rows: 1."
        );
    }

    #[test]
    fn report_has_three_named_sheets() {
        let report = sample_report();
        let names: Vec<&str> = report.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![CATALOG_SHEET, MATCHES_SHEET, NOTES_SHEET]);

        let notes = report.sheet(NOTES_SHEET).unwrap();
        assert_eq!(notes.headers, vec!["Notes".to_string()]);
        assert_eq!(notes.rows, vec![vec![summary().to_string()]]);

        let matches = report.sheet(MATCHES_SHEET).unwrap();
        assert_eq!(matches.rows.len(), 1);
        assert_eq!(matches.rows[0].last().map(String::as_str), Some("50"));
    }

    #[tokio::test]
    async fn workbook_is_written_into_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("final_results.xlsx");

        let mut writer = XlsxReportWriter::new(&path);
        writer.write(sample_report()).await.unwrap();

        let bytes = fs::read(&path).unwrap();
        // xlsx is a zip container
        assert_eq!(&bytes[..2], b"PK");
        assert_eq!(writer.path(), path.as_path());

        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn overlong_sheet_name_is_a_report_error() {
        let mut report = sample_report();
        report.sheets[0].name = "x".repeat(40);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.xlsx");
        let result = XlsxReportWriter::new(&path).write(report).await;
        assert!(matches!(result, Err(ReconcileError::Report(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn runtime_keeps_polling_other_tasks_while_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.xlsx");

        let mut report = sample_report();
        let wide = report.sheets[0].rows[0].clone();
        report.sheets[0].rows = vec![wide; 5_000];

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        });

        XlsxReportWriter::new(&path).write(report).await.unwrap();
        let seen = ticks.load(Ordering::Relaxed);
        ticker.abort();

        assert!(seen > 0, "ticker never ran during the write");
        assert!(path.exists());
    }
}
