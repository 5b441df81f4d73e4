//!
//! src/fetch.rs
//!
//! Defines methods for hitting the Spotify and Songkick endpoints and
//! returning unparsed json. Nothing here retries: a failed call is
//! surfaced to the caller as-is.
//!

use async_trait::async_trait;
use reqwest::{Client, header, redirect, RequestBuilder};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::{HttpConfig, SongkickConfig, SpotifyConfig};
use crate::paging::PageSource;
use crate::playlist::ArtistLookup;
use crate::types::{Artist, EntityLookup};
use crate::CollaboratorError;

/// Pooled json client; both api clients are built through here
pub fn base_client(http: &HttpConfig) -> Result<Client, CollaboratorError> {
    let json_only = header::HeaderMap::from_iter([(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json")
    )]);

    Client::builder()
        .default_headers(json_only)
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_idle_timeout(http.pool_idle_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .redirect(redirect::Policy::limited(usize::from(http.max_redirects)))
        .build()
        .map_err(|e| CollaboratorError::Http(format!("build client: {e}")))
}

/// Sends once and decodes the body, non-success statuses become Http errors
pub async fn send_json(request: RequestBuilder) -> Result<Value, CollaboratorError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(200).collect();
        return Err(CollaboratorError::Http(format!("status {status}: {body}")));
    }
    Ok(response.json::<Value>().await?)
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_cfg: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, CollaboratorError> {
        Ok( Self { http: base_client(http_cfg)?, cfg: cfg.clone() } )
    }

    /// POST accounts/api/token (client credentials grant)
    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// Exchanges the app credentials for a bearer token. The session lives
    /// as long as one pipeline run and is then dropped.
    pub async fn session(&self) -> Result<SpotifySession, CollaboratorError> {
        let token = send_json(self.token_request()).await?;
        let bearer = token["access_token"].as_str()
            .ok_or_else(|| CollaboratorError::Parse("no access_token in response".into()))?
            .to_string();
        debug!(expires_in = token["expires_in"].as_u64(), "spotify.token");
        Ok( SpotifySession { client: self.clone(), bearer } )
    }

    fn endpoint(&self, path: &str) -> Result<Url, CollaboratorError> {
        Ok(self.cfg.api_base.join(path)?)
    }

    /// GET /v1/playlists/{id}?fields=...
    pub fn playlist(&self, playlist_id: &str, fields: &str, bearer: &str) ->
        Result<RequestBuilder, CollaboratorError> {
        let url = self.endpoint(&format!("playlists/{playlist_id}"))?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[("fields", fields)]))
    }

    /// GET /v1/tracks/{id}
    pub fn track(&self, track_id: &str, bearer: &str) ->
        Result<RequestBuilder, CollaboratorError> {
        Ok(self.http.get(self.endpoint(&format!("tracks/{track_id}"))?).bearer_auth(bearer))
    }

    /// GET /v1/users/{id}
    pub fn user(&self, user_id: &str, bearer: &str) ->
        Result<RequestBuilder, CollaboratorError> {
        Ok(self.http.get(self.endpoint(&format!("users/{user_id}"))?).bearer_auth(bearer))
    }

    /// GET /v1/artists?ids=... (at most 50 ids)
    pub fn batch_artists(&self, ids_csv: &str, bearer: &str) ->
        Result<RequestBuilder, CollaboratorError> {
        let url = self.endpoint("artists")?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[("ids", ids_csv)]))
    }

    /// GET {next}, the absolute link handed back by a paging object
    pub fn next_page(&self, next: &str, bearer: &str) ->
        Result<RequestBuilder, CollaboratorError> {
        let url = Url::parse(next)
            .map_err(|e| CollaboratorError::Parse(format!("bad next link {next}: {e}")))?;
        if url.host_str() != self.cfg.api_base.host_str() {
            return Err(CollaboratorError::Parse(format!("next link off api host: {next}")));
        }
        Ok(self.http.get(url).bearer_auth(bearer))
    }
}

/// A Spotify client paired with a bearer token for one pipeline run
#[derive(Clone, Debug)]
pub struct SpotifySession {
    pub client: SpotifyClient,
    bearer: String
}

impl SpotifySession {
    pub async fn playlist_json(&self, playlist_id: &str, fields: &str) ->
        Result<Value, CollaboratorError> {
        send_json(self.client.playlist(playlist_id, fields, &self.bearer)?).await
    }
}

#[async_trait]
impl PageSource for SpotifySession {
    async fn fetch_page(&self, next: &str) -> Result<Value, CollaboratorError> {
        send_json(self.client.next_page(next, &self.bearer)?).await
    }
}

#[async_trait]
impl ArtistLookup for SpotifySession {
    async fn artists(&self, ids: &[String]) -> Result<Vec<Artist>, CollaboratorError> {
        let ids_csv = ids.join(",");
        let value = send_json(self.client.batch_artists(&ids_csv, &self.bearer)?).await?;
        let artists = value.get("artists")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CollaboratorError::Parse("artists response missing artists".into()))?;

        // unknown ids come back as null entries
        artists.iter()
            .filter(|a| !a.is_null())
            .map(Artist::from_json)
            .collect()
    }
}

#[async_trait]
impl EntityLookup for SpotifySession {
    async fn track(&self, id: &str) -> Result<Value, CollaboratorError> {
        send_json(self.client.track(id, &self.bearer)?).await
    }

    async fn user(&self, id: &str) -> Result<Value, CollaboratorError> {
        send_json(self.client.user(id, &self.bearer)?).await
    }
}

#[derive(Clone, Debug)]
pub struct SongkickClient {
    pub http: Client,
    pub cfg: SongkickConfig
}

impl SongkickClient {
    pub fn new(http_cfg: &HttpConfig, cfg: &SongkickConfig) ->
        Result<Self, CollaboratorError> {
        Ok( Self { http: base_client(http_cfg)?, cfg: cfg.clone() } )
    }

    /// GET /search/locations.json?query=...&apikey=...&per_page=
    pub fn search_locations(&self, query: &str) ->
        Result<RequestBuilder, CollaboratorError> {
        let url = self.cfg.base_url.join("search/locations.json")?;
        let per_page = self.cfg.locations_limit.to_string();
        Ok(self.http.get(url).query(&[
            ("query", query),
            ("apikey", self.cfg.api_key.as_str()),
            ("per_page", per_page.as_str())
        ]))
    }

    /// GET /search/locations.json?location=geo:{lat},{lng}&apikey=...&per_page=
    pub fn search_locations_geo(&self, latitude: f64, longitude: f64) ->
        Result<RequestBuilder, CollaboratorError> {
        let url = self.cfg.base_url.join("search/locations.json")?;
        let location = format!("geo:{latitude},{longitude}");
        let per_page = self.cfg.locations_limit.to_string();
        Ok(self.http.get(url).query(&[
            ("location", location.as_str()),
            ("apikey", self.cfg.api_key.as_str()),
            ("per_page", per_page.as_str())
        ]))
    }

    /// GET /metro_areas/{id}/calendar.json?min_date=&max_date=&per_page=&apikey=&page=
    pub fn calendar(&self, metro_id: u64, min_date: &str, max_date: &str, page: u32) ->
        Result<RequestBuilder, CollaboratorError> {
        let url = self.cfg.base_url.join(&format!("metro_areas/{metro_id}/calendar.json"))?;
        let per_page = self.cfg.events_per_page.to_string();
        let page = page.to_string();
        Ok(self.http.get(url).query(&[
            ("min_date", min_date),
            ("max_date", max_date),
            ("per_page", per_page.as_str()),
            ("apikey", self.cfg.api_key.as_str()),
            ("page", page.as_str())
        ]))
    }
}
