//!
//! src/pipeline.rs  Andrew Belles  Oct 3rd, 2025
//!
//! One reconciliation run end to end: resolve and load the dataset,
//! acquire the catalog, join, build and hand off the report. The whole
//! run is bounded by a deadline
//!

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::api::CatalogApi;
use crate::catalog::CatalogAcquirer;
use crate::config::{CatalogConfig, RunConfig};
use crate::dataset::ReferenceSet;
use crate::errors::ReconcileError;
use crate::reconcile::{compute_matches, CatalogTable};
use crate::report::{Report, ReportSink, RunSummary};
use crate::resolve::DatasetResolver;

pub struct Pipeline<'a, A: CatalogApi + ?Sized> {
    api: &'a A,
    resolver: &'a DatasetResolver,
    catalog: CatalogConfig
}

impl<'a, A: CatalogApi + ?Sized> Pipeline<'a, A> {
    pub fn new(api: &'a A, resolver: &'a DatasetResolver, catalog: CatalogConfig) -> Self {
        Self { api, resolver, catalog }
    }

    /// Runs to completion or fails with `DeadlineExceeded` once
    /// `request.deadline` passes. Nothing reaches the sink on failure
    pub async fn run<S: ReportSink + Send>(&self, request: &RunConfig, sink: &mut S) ->
        Result<RunSummary, ReconcileError> {
        let deadline = request.deadline;
        match tokio::time::timeout(deadline, self.run_inner(request, sink)).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::DeadlineExceeded(deadline))
        }
    }

    #[instrument(skip_all, fields(artist = %request.artist_name))]
    async fn run_inner<S: ReportSink + Send>(&self, request: &RunConfig, sink: &mut S) ->
        Result<RunSummary, ReconcileError> {

        let dataset = self.resolver.resolve(&request.dataset_path).await?;
        let path = dataset.path.clone();
        let reference = tokio::task::spawn_blocking(move || ReferenceSet::load(&path))
            .await
            .map_err(|e| ReconcileError::Io(std::io::Error::other(e.to_string())))??;
        info!(
            source = ?reference.source(), column = ?reference.identifier_header(),
            rows = reference.len(), duplicates = reference.duplicates_dropped(),
            "pipeline.dataset"
        );
        if reference.is_empty() {
            warn!("pipeline.dataset.empty");
        }

        let catalog = CatalogAcquirer::new(self.api, self.catalog)
            .acquire(&request.artist_name)
            .await?;
        info!(
            artist_id = %catalog.artist.id.as_str(), artist = ?catalog.artist.name,
            albums = catalog.albums.len(), duplicates = catalog.duplicates_skipped,
            "pipeline.catalog"
        );

        let table = CatalogTable::from_tracks(catalog.tracks);
        if table.is_empty() {
            warn!("pipeline.catalog.empty");
        }
        let (table, matches) = compute_matches(table, &reference)?;
        if matches.is_empty() {
            info!("pipeline.no_matches");
        }

        let summary = RunSummary {
            artist_name: request.artist_name.clone(),
            total_tracks: table.len(),
            missing_isrc: table.missing_identifier_count(),
            dataset_path: dataset_label(&request.dataset_path, &dataset.path, dataset.is_download()),
            matched_rows: matches.len()
        };

        let report = Report::build(&table, &matches, &summary);
        sink.write(report).await?;

        info!(%summary, "pipeline.done");
        Ok(summary)
    }
}

/// The dataset as requested, with the local file appended when a path
/// candidate or discovery picked a different one
fn dataset_label(source: &str, resolved: &Path, downloaded: bool) -> String {
    if downloaded || resolved == Path::new(source) {
        source.to_string()
    } else {
        format!("{source} (resolved: {})", resolved.display())
    }
}
