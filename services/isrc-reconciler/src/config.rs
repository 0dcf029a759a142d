//!
//! src/config.rs  Andrew Belles  Oct 2nd, 2025
//!
//! Loads every environment variable the reconciler needs at program
//! start, validates endpoints and applies per-run overrides
//!

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time};

use url::Url;

use crate::errors::ReconcileError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 20000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 5000;
pub const HTTP_POOL_MAX_IDLE: usize = 8;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;
pub const HTTP_MIN_INTERVAL: u64 = 50;

pub const RETRY_MAX_ATTEMPTS: u8 = 5;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRY_JITTER: bool = true;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Upstream caps on listing page size and batch lookups
pub const SPOTIFY_MAX_PAGE: u32 = 50;
pub const SPOTIFY_MAX_BATCH: usize = 50;

pub const DEFAULT_ARTIST: &str = "Ed Sheeran";
pub const DEFAULT_DATASET: &str = "unclaimedmusicalworkrightshares.tsv";
pub const DEFAULT_OUTPUT: &str = "final_results.xlsx";
pub const DEFAULT_DEADLINE_SECS: u64 = 900;

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, ReconcileError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ReconcileError::Config(format!("{s} was not set"))),
    }
}

/// Reads and parses an optional variable, falling back on absence or garbage
fn env_or<T: FromStr>(s: &str, default: T) -> T {
    match std::env::var(s) {
        Ok(v) => v.trim().parse::<T>().unwrap_or(default),
        Err(_) => default
    }
}

fn env_string_or(s: &str, default: &str) -> String {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string()
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
    pub market: String
}

fn parse_spotify_urls(token_url: &str, api_base: &str) ->
    Result<(Url, Url), ReconcileError> {

    let token_url = Url::parse(token_url)
        .map_err(|e| ReconcileError::Config(
                format!("SPOTIFY_TOKEN_URL invalid {e}")
        ))?;

    let mut api_base = Url::parse(api_base)
        .map_err(|e| ReconcileError::Config(
                format!("SPOTIFY_API_BASE invalid {e}")
        ))?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(ReconcileError::Config)?;
    ensure_https(&api_base).map_err(ReconcileError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com")
        .map_err(ReconcileError::Config)?;
    ensure_host(&api_base, "api.spotify.com")
        .map_err(ReconcileError::Config)?;

    ensure_trailing_slash(&mut api_base);
    Ok((token_url, api_base))
}

fn build_spotify() -> Result<SpotifyConfig, ReconcileError> {
    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;

    let token_url = env_string_or(
        "SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token"
    );
    let api_base = env_string_or(
        "SPOTIFY_API_BASE", "https://api.spotify.com/v1/"
    );
    let (token_url, api_base) = parse_spotify_urls(&token_url, &api_base)?;

    let market = env_string_or("SPOTIFY_MARKET", "US");

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base, market })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: time::Duration,
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            jitter: RETRY_JITTER,
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

impl RetryConfig {
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub min_interval: time::Duration,  // spacing between spotify calls
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            min_interval: time::Duration::from_millis(HTTP_MIN_INTERVAL),
            retry: RetryConfig::default()
        }
    }
}

fn build_http() -> HttpConfig {
    let min_interval = env_or("HTTP_MIN_INTERVAL_MS", HTTP_MIN_INTERVAL);
    HttpConfig {
        min_interval: time::Duration::from_millis(min_interval),
        ..HttpConfig::default()
    }
}

///
/// Page and batch sizes used while walking an artist's catalog
///
#[derive(Debug, Clone, Copy)]
pub struct CatalogConfig {
    pub page_size: u32,
    pub batch_size: usize
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { page_size: SPOTIFY_MAX_PAGE, batch_size: SPOTIFY_MAX_BATCH }
    }
}

impl CatalogConfig {
    pub fn new(page_size: u32, batch_size: usize) -> Self {
        Self {
            page_size: page_size.clamp(1, SPOTIFY_MAX_PAGE),
            batch_size: batch_size.clamp(1, SPOTIFY_MAX_BATCH)
        }
    }
}

fn build_catalog() -> CatalogConfig {
    CatalogConfig::new(
        env_or("CATALOG_PAGE_SIZE", SPOTIFY_MAX_PAGE),
        env_or("CATALOG_BATCH_SIZE", SPOTIFY_MAX_BATCH)
    )
}

///
/// Where to look for the reference dataset when the given location
/// does not resolve directly
///
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub fallback_paths: Vec<PathBuf>,
    pub search_roots: Vec<PathBuf>,
    pub discovery_patterns: Vec<String>,
    pub download_file_name: String
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            fallback_paths: vec![
                PathBuf::from("C:/spotify api/unclaimedmusicalworkrightshares.tsv"),
                PathBuf::from("C:/data/unclaimedmusicalworkrightshares.tsv"),
            ],
            search_roots: vec![PathBuf::from("."), PathBuf::from("./data")],
            discovery_patterns: vec![
                "*unclaimed*musical*work*right*shares*.tsv".to_string(),
                "*unclaimed*work*shares*.tsv".to_string(),
                "*.tsv".to_string(),
            ],
            download_file_name: DEFAULT_DATASET.to_string()
        }
    }
}

///
/// What a single run reconciles and where it writes
///
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub artist_name: String,
    pub dataset_path: String,
    pub output_path: PathBuf,
    pub deadline: time::Duration
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            artist_name: DEFAULT_ARTIST.to_string(),
            dataset_path: DEFAULT_DATASET.to_string(),
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            deadline: time::Duration::from_secs(DEFAULT_DEADLINE_SECS)
        }
    }
}

/// Optional per-run replacements from the command line or a request body
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub artist_name: Option<String>,
    pub dataset_path: Option<String>,
    pub output_path: Option<PathBuf>
}

impl RunConfig {
    pub fn with_overrides(&self, overrides: &RunOverrides) -> RunConfig {
        let pick = |o: &Option<String>, current: &String| match o {
            Some(v) if !v.trim().is_empty() => v.clone(),
            _ => current.clone()
        };

        RunConfig {
            artist_name: pick(&overrides.artist_name, &self.artist_name),
            dataset_path: pick(&overrides.dataset_path, &self.dataset_path),
            output_path: overrides.output_path.clone()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| self.output_path.clone()),
            deadline: self.deadline
        }
    }
}

fn build_run() -> RunConfig {
    RunConfig {
        artist_name: env_string_or("ARTIST_NAME", DEFAULT_ARTIST),
        dataset_path: env_string_or("DATASET_PATH", DEFAULT_DATASET),
        output_path: PathBuf::from(env_string_or("OUTPUT_EXCEL", DEFAULT_OUTPUT)),
        deadline: time::Duration::from_secs(
            env_or("RUN_DEADLINE_SECS", DEFAULT_DEADLINE_SECS).max(1)
        )
    }
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json"   => Ok(LogFormat::Json),
            other    => Err(format!("unknown log format {other}"))
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,isrc_reconciler=debug,reqwest=warn".to_string(),
            format: LogFormat::Pretty,
            with_ansi: true,
            include_file_line: false,
            include_target: true
        }
    }
}

fn build_logging() -> LoggingConfig {
    let format = env_or("LOG_FORMAT", LogFormat::Pretty);
    LoggingConfig {
        format,
        with_ansi: format == LogFormat::Pretty,
        include_file_line: format == LogFormat::Json,
        ..LoggingConfig::default()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: SocketAddr::from(([127, 0, 0, 1], 8000)) }
    }
}

fn build_server() -> Result<ServerConfig, ReconcileError> {
    match std::env::var("BIND_ADDR") {
        Ok(v) if !v.trim().is_empty() => {
            let bind = v.trim().parse::<SocketAddr>()
                .map_err(|e| ReconcileError::Config(
                    format!("BIND_ADDR invalid {e}")
                ))?;
            Ok(ServerConfig { bind })
        }
        _ => Ok(ServerConfig::default())
    }
}

///
/// AppConfig which holds everything the pipeline and its surfaces need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub http: HttpConfig,
    pub catalog: CatalogConfig,
    pub dataset: DatasetConfig,
    pub run: RunConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, ReconcileError> {
    dotenvy::dotenv().ok();

    let spotify = build_spotify()?;
    let http    = build_http();
    let catalog = build_catalog();
    let dataset = DatasetConfig::default();
    let run     = build_run();
    let server  = build_server()?;
    let logging = build_logging();

    Ok( AppConfig { spotify, http, catalog, dataset, run, server, logging } )
}
