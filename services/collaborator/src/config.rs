//!
//! src/config.rs
//!
//! Loads credentials and settings from the environment (and .env)
//! at startup. Missing credentials are fatal.
//!

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::CollaboratorError;

/// reqwest client defaults, shared by the Spotify and Songkick clients
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const POOL_MAX_IDLE_PER_HOST: usize = 16;
pub const MAX_REDIRECTS: u8 = 4;

pub const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8050";

/// Required variable, blank counts as unset
fn required_env(var: &str) -> Result<String, CollaboratorError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CollaboratorError::Config(format!("{var} was not set")))
}

fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback.to_string())
}

/// Parses an endpoint and pins it to https on `expected_host`
fn pinned_url(raw: &str, var: &str, expected_host: &str) -> Result<Url, CollaboratorError> {
    let invalid = |why: String| CollaboratorError::Config(format!("{var} invalid: {why}"));
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;

    if url.scheme() != "https" {
        return Err(invalid(format!("{url} is not https")));
    }
    match url.host_str() {
        Some(host) if host.eq_ignore_ascii_case(expected_host) => Ok(url),
        other => Err(invalid(format!("{url} has host {other:?}, expected {expected_host}")))
    }
}

/// Like `pinned_url`, plus a trailing slash so `Url::join` appends to the
/// last segment instead of replacing it
fn parse_base(raw: &str, var: &str, expected_host: &str) ->
    Result<Url, CollaboratorError> {
    let mut url = pinned_url(raw, var, expected_host)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// App credentials and endpoints for the Spotify Web API
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,         // full path, no trailing slash
    pub api_base: Url
}

fn build_spotify() -> Result<SpotifyConfig, CollaboratorError> {
    let client_id     = required_env("SPOTIFY_CLIENT_ID")?;
    let client_secret = required_env("SPOTIFY_CLIENT_SECRET")?;

    let token_url = pinned_url(
        &env_or("SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token"),
        "SPOTIFY_TOKEN_URL",
        "accounts.spotify.com"
    )?;
    let api_base = parse_base(
        &env_or("SPOTIFY_API_BASE", "https://api.spotify.com/v1/"),
        "SPOTIFY_API_BASE",
        "api.spotify.com"
    )?;

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base } )
}

///
/// Configuration for the songkick api
///
#[derive(Debug, Clone)]
pub struct SongkickConfig {
    pub api_key: String,
    pub base_url: Url,          // https://api.songkick.com/api/3.0/
    pub events_per_page: u32,   // api maximum is 50
    pub locations_limit: u32,   // default 10
    pub window_weeks: i64       // default 12
}

fn build_songkick() -> Result<SongkickConfig, CollaboratorError> {
    let api_key = required_env("SONGKICK_API_KEY")
        .map_err(|_| CollaboratorError::Config(
            "No songkick API key provided. Set the SONGKICK_API_KEY environment variable"
                .to_string()
        ))?;

    let base_url = parse_base(
        &env_or("SONGKICK_API_BASE", "https://api.songkick.com/api/3.0/"),
        "SONGKICK_API_BASE",
        "api.songkick.com"
    )?;

    Ok( SongkickConfig {
        api_key,
        base_url,
        events_per_page: 50,
        locations_limit: 10,
        window_weeks: 12
    })
}

/// reqwest client settings; not read from the environment
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub max_redirects: u8
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout: REQUEST_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            pool_max_idle_per_host: POOL_MAX_IDLE_PER_HOST,
            pool_idle_timeout: POOL_IDLE_TIMEOUT,
            max_redirects: MAX_REDIRECTS
        }
    }
}

///
/// Configuration for the dashboard http server
///
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub default_playlist: String
}

fn build_server() -> Result<ServerConfig, CollaboratorError> {
    let addr = env_or("DASHBOARD_ADDR", DEFAULT_DASHBOARD_ADDR)
        .parse::<SocketAddr>()
        .map_err(|e| CollaboratorError::Config(format!("DASHBOARD_ADDR invalid: {e}")))?;

    Ok( ServerConfig {
        addr,
        default_playlist: "spotify:playlist:1cIYJbMgyTsEfHtPVxWETv".to_string()
    })
}

/// `LOG_FORMAT=pretty` (or `text`) for local runs, json otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

impl LogFormat {
    fn parse(raw: &str) -> LogFormat {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("pretty") || raw.eq_ignore_ascii_case("text") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Used when RUST_LOG is unset
pub const DEFAULT_LOG_DIRECTIVES: &str = "info,collaborator=debug,reqwest=warn";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub directives: String,
    pub format: LogFormat,
    pub ansi: bool,
    pub source_location: bool,
    pub targets: bool
}

fn build_logging() -> LoggingConfig {
    LoggingConfig {
        directives: DEFAULT_LOG_DIRECTIVES.to_string(),
        format: std::env::var("LOG_FORMAT")
            .map_or(LogFormat::Json, |raw| LogFormat::parse(&raw)),
        ansi: true,
        source_location: true,
        targets: true
    }
}

///
/// AppConfig which holds everything the clients and dashboard need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub songkick: SongkickConfig,
    pub http: HttpConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, CollaboratorError> {
    dotenvy::dotenv().ok();

    let spotify  = build_spotify()?;
    let songkick = build_songkick()?;
    let http     = HttpConfig::default();
    let server   = build_server()?;
    let logging  = build_logging();

    Ok( AppConfig { spotify, songkick, http, server, logging } )
}

/// Offline configuration for unit tests; nothing here is ever dialed
#[cfg(test)]
pub fn test_config() -> AppConfig {
    AppConfig {
        spotify: SpotifyConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            token_url: Url::parse("https://accounts.spotify.com/api/token").unwrap(),
            api_base: Url::parse("https://api.spotify.com/v1/").unwrap()
        },
        songkick: SongkickConfig {
            api_key: "key".to_string(),
            base_url: Url::parse("https://api.songkick.com/api/3.0/").unwrap(),
            events_per_page: 50,
            locations_limit: 10,
            window_weeks: 12
        },
        http: HttpConfig::default(),
        server: ServerConfig {
            addr: DEFAULT_DASHBOARD_ADDR.parse().unwrap(),
            default_playlist: "spotify:playlist:1cIYJbMgyTsEfHtPVxWETv".to_string()
        },
        logging: LoggingConfig {
            directives: DEFAULT_LOG_DIRECTIVES.to_string(),
            format: LogFormat::Pretty,
            ansi: false,
            source_location: false,
            targets: true
        }
    }
}
