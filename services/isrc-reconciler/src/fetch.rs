//!
//! src/fetch.rs  Andrew Belles  Oct 3rd, 2025
//!
//! Defines methods for hitting the spotify endpoints the catalog walk
//! needs, handling the client credentials token, pacing and retries
//!

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{header, redirect, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, warn};
use url::Url;

use crate::api::{
    ArtistObject, ArtistSearchResponse, CatalogApi, FullTrack, Page, PageRequest,
    Paging, SimplifiedAlbum, SimplifiedTrack, TracksResponse
};
use crate::config::{HttpConfig, RetryConfig, SpotifyConfig};
use crate::errors::ReconcileError;
use crate::types::AlbumGroup;

/// Refresh the bearer this long before spotify says it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, ReconcileError> {
    client_helper(http)
        .default_headers(headers)
        .user_agent(concat!("isrc-reconciler/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ReconcileError::Http(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, ReconcileError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

/// Plain client for dataset downloads, no json accept header
pub fn download_client(http: &HttpConfig) -> Result<Client, ReconcileError> {
    client_with_headers(http, header::HeaderMap::new())
}

/// Minimum spacing between consecutive requests
#[derive(Debug)]
struct RateGate {
    min_interval: Duration,
    state: Mutex<Instant>
}

impl RateGate {
    fn new(min_interval: Duration) -> Self {
        let start = Instant::now().checked_sub(min_interval).unwrap_or_else(Instant::now);
        Self { min_interval, state: Mutex::new(start) }
    }

    async fn wait(&self) {
        let mut last = self.state.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// Exponential wait for http_with_retry, capped at 2^6 * base
fn generate_backoff(base: Duration, attempt: usize, jitter: bool, rng: &mut SmallRng) -> Duration {
    let exp = base.saturating_mul(1_u32 << attempt.min(6));
    if jitter {
        exp + Duration::from_millis(rng.gen_range(50..=200))
    } else {
        exp
    }
}

/// Seconds from a Retry-After header, when present and numeric
fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers.get(header::RETRY_AFTER)?
        .to_str().ok()?
        .trim()
        .parse::<u64>().ok()
        .map(Duration::from_secs)
}

/// Sends a request, retrying throttling, gateway errors and transport
/// failures with backoff until `max_attempts` is spent
async fn http_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<serde_json::Value, ReconcileError> {
    let mut rng = SmallRng::from_entropy();
    let max_retries = retry.max_attempts.saturating_sub(1) as usize;
    let mut attempt = 0_usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| ReconcileError::Http("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let v = resp.json::<serde_json::Value>().await?;
                    return Ok(v);
                }
                if status == StatusCode::UNAUTHORIZED {
                    return Err(ReconcileError::Unauthorized(resp.url().path().to_string()));
                }

                let hinted = retry_after(resp.headers());
                let body = resp.text().await.unwrap_or_default();
                let retryable = retry.is_retryable(status.as_u16());
                if !retryable || attempt >= max_retries {
                    let msg = format!("status {status} after {attempt} retries: {}",
                        body.chars().take(200).collect::<String>());
                    return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                        ReconcileError::RateLimited(msg)
                    } else {
                        ReconcileError::Http(msg)
                    });
                }
                let backoff = hinted.unwrap_or_else(||
                    generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng)
                );
                warn!(status = %status, backoff = ?backoff.as_millis(), attempt, "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt >= max_retries {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng);
                warn!(error = %e, backoff = ?backoff.as_millis(), attempt, "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64
}

fn default_expiry() -> u64 { 3600 }

struct AccessToken {
    bearer: String,
    expires_at: Instant
}

#[derive(Clone)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig,
    retry: RetryConfig,
    gate: Arc<RateGate>,
    token: Arc<Mutex<Option<AccessToken>>>
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, ReconcileError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_config.retry.clone(),
            gate: Arc::new(RateGate::new(http_config.min_interval)),
            token: Arc::new(Mutex::new(None))
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ReconcileError> {
        self.cfg.api_base.join(path)
            .map_err(|e| ReconcileError::Config(format!("join {path}: {e}")))
    }

    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/search?type=artist&q=artist:...&limit=
    pub fn search_artist(&self, name: &str, limit: u32, bearer: &str) ->
        Result<RequestBuilder, ReconcileError> {
        let url = self.endpoint("search")?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("type", "artist"),
            ("q", &format!("artist:{name}")),
            ("limit", &limit.to_string())
        ]))
    }

    /// GET /v1/artists/{id}/albums?include_groups=&market=&limit=&offset=
    pub fn artist_albums_request(
        &self,
        artist_id: &str,
        group: AlbumGroup,
        page: PageRequest,
        bearer: &str
    ) -> Result<RequestBuilder, ReconcileError> {
        let url = self.endpoint(&format!("artists/{artist_id}/albums"))?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("include_groups", group.as_str()),
            ("market", &self.cfg.market),
            ("limit", &page.limit.to_string()),
            ("offset", &page.offset.to_string())
        ]))
    }

    /// GET /v1/albums/{id}/tracks?market=&limit=&offset=
    pub fn album_tracks_request(&self, album_id: &str, page: PageRequest, bearer: &str) ->
        Result<RequestBuilder, ReconcileError> {
        let url = self.endpoint(&format!("albums/{album_id}/tracks"))?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("market", &self.cfg.market),
            ("limit", &page.limit.to_string()),
            ("offset", &page.offset.to_string())
        ]))
    }

    /// GET /v1/tracks?ids=...
    pub fn batch_track(&self, ids_csv: &str, bearer: &str) ->
        Result<RequestBuilder, ReconcileError> {
        let url = self.endpoint("tracks")?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("ids", ids_csv),
            ("market", &self.cfg.market)
        ]))
    }

    /// Cached bearer, fetched again when missing or about to expire
    async fn bearer(&self) -> Result<String, ReconcileError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.bearer.clone());
            }
        }

        self.gate.wait().await;
        let value = http_with_retry(self.token_request(), &self.retry).await
            .map_err(|e| match e {
                ReconcileError::Unauthorized(_) => ReconcileError::Config(
                    "spotify rejected client credentials".to_string()
                ),
                other => other
            })?;
        let token: TokenResponse = serde_json::from_value(value)?;
        debug!(expires_in = token.expires_in, "spotify.token.refreshed");

        let bearer = token.access_token.clone();
        *guard = Some(AccessToken {
            bearer: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in)
        });
        Ok(bearer)
    }

    async fn invalidate_token(&self) {
        self.token.lock().await.take();
    }

    /// Paced, retried GET decoded into `T`; one fresh-token retry on 401
    async fn get_json<T, F>(&self, build: F) -> Result<T, ReconcileError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> Result<RequestBuilder, ReconcileError>
    {
        let mut refreshed = false;
        loop {
            let bearer = self.bearer().await?;
            self.gate.wait().await;
            match http_with_retry(build(&bearer)?, &self.retry).await {
                Ok(value) => return Ok(serde_json::from_value(value)?),
                Err(ReconcileError::Unauthorized(path)) if !refreshed => {
                    warn!(path = %path, "spotify.token.rejected");
                    self.invalidate_token().await;
                    refreshed = true;
                }
                Err(e) => return Err(e)
            }
        }
    }
}

#[async_trait]
impl CatalogApi for SpotifyClient {
    async fn search_artists(&self, name: &str, limit: u32) ->
        Result<Vec<ArtistObject>, ReconcileError> {
        let resp: ArtistSearchResponse = self.get_json(|bearer|
            self.search_artist(name, limit, bearer)
        ).await?;
        Ok(resp.artists.items)
    }

    async fn artist_albums(
        &self,
        artist_id: &str,
        group: AlbumGroup,
        page: PageRequest
    ) -> Result<Page<SimplifiedAlbum>, ReconcileError> {
        let paging: Paging<SimplifiedAlbum> = self.get_json(|bearer|
            self.artist_albums_request(artist_id, group, page, bearer)
        ).await?;
        debug!(
            artist_id, group = group.as_str(), offset = page.offset,
            total = ?paging.total, "spotify.albums.page"
        );
        Ok(paging.into())
    }

    async fn album_tracks(&self, album_id: &str, page: PageRequest) ->
        Result<Page<SimplifiedTrack>, ReconcileError> {
        let paging: Paging<SimplifiedTrack> = self.get_json(|bearer|
            self.album_tracks_request(album_id, page, bearer)
        ).await?;
        Ok(paging.into())
    }

    async fn tracks(&self, ids: &[String]) -> Result<Vec<FullTrack>, ReconcileError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids_csv = ids.join(",");
        let resp: TracksResponse = self.get_json(|bearer|
            self.batch_track(&ids_csv, bearer)
        ).await?;
        Ok(resp.tracks.into_iter().flatten().collect())
    }
}

/// Unit Tests
#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::StatusCode as UpstreamStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::config::{self, RETRYABLE_STATUSES};

    /// Local stand-in for the accounts and web api hosts. Each search
    /// answers with the next scripted status, or a hit once the script
    /// runs out
    #[derive(Clone, Default)]
    struct Upstream {
        search_script: Arc<std::sync::Mutex<VecDeque<u16>>>,
        token_script: Arc<std::sync::Mutex<VecDeque<u16>>>,
        searches: Arc<AtomicUsize>,
        tokens: Arc<AtomicUsize>
    }

    impl Upstream {
        fn scripted(search: &[u16]) -> Self {
            let upstream = Self::default();
            upstream.search_script.lock().unwrap().extend(search);
            upstream
        }

        fn searches(&self) -> usize { self.searches.load(Ordering::SeqCst) }
        fn tokens(&self) -> usize { self.tokens.load(Ordering::SeqCst) }
    }

    fn scripted_failure(script: &std::sync::Mutex<VecDeque<u16>>) -> Option<Response> {
        let code = script.lock().unwrap().pop_front()?;
        let status = UpstreamStatus::from_u16(code).unwrap();
        Some((status, "scripted").into_response())
    }

    async fn issue_token(State(up): State<Upstream>) -> Response {
        if let Some(failure) = scripted_failure(&up.token_script) {
            return failure;
        }
        let n = up.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({ "access_token": format!("tok{n}"), "token_type": "Bearer", "expires_in": 3600 }))
            .into_response()
    }

    async fn search(State(up): State<Upstream>) -> Response {
        up.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = scripted_failure(&up.search_script) {
            return failure;
        }
        Json(json!({
            "artists": { "items": [{ "id": "ar1", "name": "Ed Sheeran" }], "next": null }
        })).into_response()
    }

    async fn spawn_upstream(upstream: Upstream) -> SocketAddr {
        let app = Router::new()
            .route("/api/token", post(issue_token))
            .route("/v1/search", get(search))
            .with_state(upstream);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn local_client(addr: SocketAddr) -> SpotifyClient {
        let cfg = SpotifyConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: Url::parse(&format!("http://{addr}/api/token")).unwrap(),
            api_base: Url::parse(&format!("http://{addr}/v1/")).unwrap(),
            market: "US".into()
        };
        let http = HttpConfig {
            min_interval: Duration::ZERO,
            retry: RetryConfig {
                max_attempts: 5,
                base_backoff: Duration::from_millis(1),
                jitter: false,
                retryable_statuses: RETRYABLE_STATUSES.to_vec()
            },
            ..HttpConfig::default()
        };
        let mut client = SpotifyClient::new(&http, &cfg).unwrap();
        client.http = client_helper(&http).no_proxy().build().unwrap();
        client
    }

    fn live() -> bool {
        std::env::var("LIVE_HTTP").ok().as_deref() == Some("1")
    }

    fn offline_client() -> SpotifyClient {
        let cfg = SpotifyConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: Url::parse("https://accounts.spotify.com/api/token").unwrap(),
            api_base: Url::parse("https://api.spotify.com/v1/").unwrap(),
            market: "US".into()
        };
        SpotifyClient::new(&HttpConfig::default(), &cfg).unwrap()
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let mut rng = SmallRng::seed_from_u64(7);
        let base = Duration::from_millis(100);
        assert_eq!(generate_backoff(base, 0, false, &mut rng), Duration::from_millis(100));
        assert_eq!(generate_backoff(base, 3, false, &mut rng), Duration::from_millis(800));
        assert_eq!(generate_backoff(base, 20, false, &mut rng), Duration::from_millis(6400));

        let jittered = generate_backoff(base, 0, true, &mut rng);
        assert!(jittered >= Duration::from_millis(150) && jittered <= Duration::from_millis(300));
    }

    #[test]
    fn retry_after_header_is_read_in_seconds() {
        let mut headers = header::HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(header::RETRY_AFTER, header::HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(header::RETRY_AFTER, header::HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn album_listing_request_carries_group_and_window() {
        let client = offline_client();
        let req = client.artist_albums_request(
            "6eUKZXaKkcviH0Ku9w2n3V",
            AlbumGroup::AppearsOn,
            PageRequest { limit: 50, offset: 100 },
            "token"
        ).unwrap().build().unwrap();

        let url = req.url();
        assert_eq!(url.path(), "/v1/artists/6eUKZXaKkcviH0Ku9w2n3V/albums");
        let query = url.query().unwrap();
        assert!(query.contains("include_groups=appears_on"));
        assert!(query.contains("limit=50"));
        assert!(query.contains("offset=100"));
        assert!(query.contains("market=US"));
        assert_eq!(
            req.headers().get(header::AUTHORIZATION).unwrap(),
            "Bearer token"
        );
    }

    #[test]
    fn batch_lookup_joins_ids() {
        let client = offline_client();
        let req = client.batch_track("a,b,c", "token").unwrap().build().unwrap();
        assert_eq!(req.url().path(), "/v1/tracks");
        assert!(req.url().query().unwrap().contains("ids=a%2Cb%2Cc"));
    }

    #[tokio::test]
    async fn rate_gate_spaces_consecutive_calls() {
        let gate = RateGate::new(Duration::from_millis(30));
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn spotify_catalog_testbench() -> Result<(), ReconcileError> {
        dotenvy::dotenv().ok();

        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let spotify = SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;

        let artists = spotify.search_artists("Ed Sheeran", 1).await?;
        assert!(!artists.is_empty());
        println!("artist: {:?}", artists[0]);

        let albums = spotify.artist_albums(
            &artists[0].id, AlbumGroup::Single, PageRequest { limit: 5, offset: 0 }
        ).await?;
        println!("albums: {:#?}", albums.items);
        Ok(())
    }

    #[tokio::test]
    async fn gateway_errors_are_retried_until_success() {
        let upstream = Upstream::scripted(&[503, 503]);
        let client = local_client(spawn_upstream(upstream.clone()).await);

        let artists = client.search_artists("Ed Sheeran", 1).await.unwrap();
        assert_eq!(artists[0].id, "ar1");
        assert_eq!(upstream.searches(), 3);
        assert_eq!(upstream.tokens(), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let upstream = Upstream::scripted(&[404]);
        let client = local_client(spawn_upstream(upstream.clone()).await);

        let result = client.search_artists("Ed Sheeran", 1).await;
        assert!(matches!(result, Err(ReconcileError::Http(_))), "{result:?}");
        assert_eq!(upstream.searches(), 1);
    }

    #[tokio::test]
    async fn persistent_throttling_ends_rate_limited() {
        let upstream = Upstream::scripted(&[429; 10]);
        let client = local_client(spawn_upstream(upstream.clone()).await);

        let result = client.search_artists("Ed Sheeran", 1).await;
        assert!(matches!(result, Err(ReconcileError::RateLimited(_))), "{result:?}");
        assert_eq!(upstream.searches(), 5);
    }

    #[tokio::test]
    async fn rejected_bearer_is_refreshed_once() {
        let upstream = Upstream::scripted(&[401]);
        let client = local_client(spawn_upstream(upstream.clone()).await);

        let artists = client.search_artists("Ed Sheeran", 1).await.unwrap();
        assert_eq!(artists.len(), 1);
        assert_eq!(upstream.searches(), 2);
        assert_eq!(upstream.tokens(), 2);
    }

    #[tokio::test]
    async fn second_rejection_is_unauthorized() {
        let upstream = Upstream::scripted(&[401, 401]);
        let client = local_client(spawn_upstream(upstream.clone()).await);

        let result = client.search_artists("Ed Sheeran", 1).await;
        assert!(matches!(result, Err(ReconcileError::Unauthorized(_))), "{result:?}");
        assert_eq!(upstream.searches(), 2);
        assert_eq!(upstream.tokens(), 2);
    }

    #[tokio::test]
    async fn refreshed_bearer_still_gets_gateway_retries() {
        let upstream = Upstream::scripted(&[401, 503, 503]);
        let client = local_client(spawn_upstream(upstream.clone()).await);

        client.search_artists("Ed Sheeran", 1).await.unwrap();
        assert_eq!(upstream.searches(), 4);
        assert_eq!(upstream.tokens(), 2);
    }

    #[tokio::test]
    async fn cached_bearer_is_reused_across_calls() {
        let upstream = Upstream::default();
        let client = local_client(spawn_upstream(upstream.clone()).await);

        client.search_artists("Ed Sheeran", 1).await.unwrap();
        client.search_artists("Ed Sheeran", 1).await.unwrap();
        assert_eq!(upstream.searches(), 2);
        assert_eq!(upstream.tokens(), 1);
    }

    #[tokio::test]
    async fn rejected_credentials_are_a_config_error() {
        let upstream = Upstream::default();
        upstream.token_script.lock().unwrap().push_back(401);
        let client = local_client(spawn_upstream(upstream.clone()).await);

        let result = client.search_artists("Ed Sheeran", 1).await;
        assert!(matches!(result, Err(ReconcileError::Config(_))), "{result:?}");
        assert_eq!(upstream.searches(), 0);
    }
}
