//!
//! src/resolve.rs  Andrew Belles  Oct 3rd, 2025
//!
//! Turns the configured dataset location into a readable local file:
//! downloads http(s) sources (google drive share links included),
//! tries path candidates and finally discovers a lone matching tsv
//!

use std::collections::BTreeSet;
use std::path::PathBuf;

use reqwest::Client;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;

use crate::config::DatasetConfig;
use crate::errors::ReconcileError;

/// A dataset file ready to load. Downloaded files live in a temporary
/// directory removed when this value is dropped
#[derive(Debug)]
pub struct ResolvedDataset {
    pub path: PathBuf,
    _download: Option<TempDir>
}

impl ResolvedDataset {
    pub fn local(path: PathBuf) -> Self {
        Self { path, _download: None }
    }

    pub fn is_download(&self) -> bool {
        self._download.is_some()
    }
}

pub struct DatasetResolver {
    cfg: DatasetConfig,
    http: Client
}

impl DatasetResolver {
    pub fn new(cfg: DatasetConfig, http: Client) -> Self {
        Self { cfg, http }
    }

    pub async fn resolve(&self, source: &str) -> Result<ResolvedDataset, ReconcileError> {
        if let Some(url) = remote_url(source) {
            match self.download(&url).await {
                Ok(resolved) => return Ok(resolved),
                Err(e) => warn!(source, error = %e, "dataset.download.failed")
            }
        }

        let candidates = self.candidates(source);
        if let Some(found) = candidates.iter().find(|p| p.is_file()) {
            debug!(path = %found.display(), "dataset.resolved");
            return Ok(ResolvedDataset::local(found.clone()));
        }

        let discovered = self.discover();
        if discovered.len() == 1 {
            let path = discovered.into_iter().next()
                .ok_or_else(|| ReconcileError::Config("discovery emptied".into()))?;
            info!(path = %path.display(), "dataset.discovered");
            return Ok(ResolvedDataset::local(path));
        }

        let found: Vec<String> = discovered.iter()
            .take(10)
            .map(|p| p.display().to_string())
            .collect();
        Err(ReconcileError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!(
                "dataset file not found. Tried: {candidates:?}; also searched: {:?}; found: {found:?}",
                self.cfg.search_roots
            )
        )))
    }

    /// Source as given, with forward slashes, then configured fallbacks
    fn candidates(&self, source: &str) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        if !source.trim().is_empty() {
            out.push(PathBuf::from(source));
            let forward = source.replace('\\', "/");
            if forward != source {
                out.push(PathBuf::from(forward));
            }
        }
        out.extend(self.cfg.fallback_paths.iter().cloned());
        out
    }

    /// Distinct files directly under the search roots matching any pattern
    fn discover(&self) -> BTreeSet<PathBuf> {
        let mut found = BTreeSet::new();
        for root in &self.cfg.search_roots {
            let entries = WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file());

            for entry in entries {
                let name = entry.file_name().to_string_lossy();
                if self.cfg.discovery_patterns.iter().any(|p| wildcard_match(p, &name)) {
                    found.insert(entry.path().to_path_buf());
                }
            }
        }
        found
    }

    async fn download(&self, url: &Url) -> Result<ResolvedDataset, ReconcileError> {
        let target = direct_download_url(url);
        info!(url = %target, "dataset.download.start");

        let response = self.http.get(target.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Http(format!("download {target}: status {status}")));
        }
        let body = response.bytes().await?;

        let dir = tempfile::Builder::new().prefix("isrc_dl_").tempdir()?;
        let path = dir.path().join(&self.cfg.download_file_name);
        tokio::fs::write(&path, &body).await?;

        info!(path = %path.display(), bytes = body.len(), "dataset.download.done");
        Ok(ResolvedDataset { path, _download: Some(dir) })
    }
}

/// http(s) sources only; anything else is treated as a path
fn remote_url(source: &str) -> Option<Url> {
    let url = Url::parse(source.trim()).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None
    }
}

/// Google Drive file id from `/d/{id}/view` or `id={id}` links
fn drive_file_id(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    if !host.ends_with("drive.google.com") && !host.ends_with("docs.google.com") {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    if let Some(pos) = segments.iter().position(|s| *s == "d") {
        if let (Some(id), Some(&"view")) = (segments.get(pos + 1), segments.get(pos + 2)) {
            return Some(id.to_string());
        }
    }

    url.query_pairs()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
}

fn direct_download_url(url: &Url) -> Url {
    match drive_file_id(url) {
        Some(id) => {
            let mut direct = Url::parse("https://drive.google.com/uc")
                .unwrap_or_else(|_| url.clone());
            direct.query_pairs_mut()
                .append_pair("export", "download")
                .append_pair("id", &id);
            direct
        }
        None => url.clone()
    }
}

/// `*` matches any run of characters; comparison ignores ASCII case
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == name;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || !name.ends_with(last) || name.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &name[first.len()..name.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false
        }
    }
    true
}
