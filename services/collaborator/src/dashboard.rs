//!
//! src/dashboard.rs
//!
//! Web shell for the dashboard. The page holds the two inputs and does the
//! rendering; each input change calls one of the json routes below, and
//! every call is an independent pipeline run with its own Spotify token.
//!

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::CollaboratorError;
use crate::fetch::{SongkickClient, SpotifyClient};
use crate::graph::{plot_sorted_tracks, Figure};
use crate::live_shows::{
    event_table, get_events_for_location, match_events, search_locations,
    Event, EventRow, EventWindow, Location, LocationQuery,
};
use crate::playlist::Playlist;
use crate::types::{spotify_id, Source, Track, User};

const PAGE: &str = include_str!("../static/dashboard.html");

pub const USERS_TITLE: &str = "Tracks added over time by each user";
pub const GENRES_TITLE: &str = "Number of tracks in different genres";

/// Read-only handles shared by every request
#[derive(Clone)]
pub struct AppState {
    pub spotify: Arc<SpotifyClient>,
    pub songkick: Arc<SongkickClient>,
    pub default_playlist: String
}

impl AppState {
    pub fn new(spotify: SpotifyClient, songkick: SongkickClient, server: &ServerConfig) -> Self {
        Self {
            spotify: Arc::new(spotify),
            songkick: Arc::new(songkick),
            default_playlist: server.default_playlist.clone()
        }
    }
}

impl IntoResponse for CollaboratorError {
    fn into_response(self) -> Response {
        let status = match &self {
            CollaboratorError::Misuse(_) => StatusCode::BAD_REQUEST,
            CollaboratorError::Http(_) | CollaboratorError::Parse(_) => StatusCode::BAD_GATEWAY,
            CollaboratorError::Config(_) | CollaboratorError::Io(_) =>
                StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "dashboard.error");
        } else {
            warn!(status = status.as_u16(), error = %self, "dashboard.rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/playlist", get(playlist_view))
        .route("/api/events", get(events_view))
        .route("/api/matches", post(matches_view))
        .route("/api/locations", get(locations_view))
        .route("/api/track", get(track_view))
        .route("/api/user", get(user_view))
        .with_state(state)
}

/// Binds and serves until `shutdown` is cancelled, then drains in-flight requests
pub async fn serve(
    cfg: &ServerConfig,
    state: AppState,
    shutdown: CancellationToken
) -> Result<(), CollaboratorError> {
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    info!(addr = %cfg.addr, "dashboard.listen");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("dashboard.stop");
    Ok(())
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(PAGE.replace("{{default_playlist}}", &state.default_playlist))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistParams {
    pub uri: Option<String>
}

/// Everything the page needs after the playlist input changes
#[derive(Debug, Serialize)]
pub struct PlaylistView {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub owner: String,
    pub collaborative: bool,
    pub public: Option<bool>,
    pub description: Option<String>,
    pub tracks: usize,
    /// artist name -> distinct tracks crediting them
    pub tracks_per_artist: BTreeMap<String, usize>,
    pub artists: Vec<String>,
    pub most_used_artist: Option<String>,
    pub most_used_genre: Option<String>,
    pub users_figure: Figure,
    pub genres_figure: Figure
}

impl PlaylistView {
    pub fn build(playlist: &Playlist, now: DateTime<Utc>) -> Self {
        let users_figure = plot_sorted_tracks(
            playlist.tracks_by_user.iter()
                .map(|(uri, tracks)| (playlist.user_label(uri), tracks.as_slice())),
            USERS_TITLE,
            now
        );
        let genres_figure = plot_sorted_tracks(
            playlist.tracks_by_genre.iter()
                .map(|(genre, tracks)| (genre.as_str(), tracks.as_slice())),
            GENRES_TITLE,
            now
        );
        let most_used_artist = playlist.most_used_artist.as_ref()
            .map(|uri| playlist.artists.get(uri).map_or(uri.clone(), |a| a.name.clone()));

        let mut tracks_per_artist = BTreeMap::new();
        for (uri, tracks) in &playlist.tracks_by_artist {
            let name = playlist.artists.get(uri).map_or(uri.as_str(), |a| a.name.as_str());
            *tracks_per_artist.entry(name.to_string()).or_default() += tracks.len();
        }

        PlaylistView {
            id: playlist.meta.id.clone(),
            uri: playlist.meta.uri.clone(),
            name: playlist.meta.name.clone(),
            owner: playlist.meta.owner.label().to_string(),
            collaborative: playlist.meta.collaborative,
            public: playlist.meta.public,
            description: playlist.meta.description.clone().filter(|d| !d.is_empty()),
            tracks: playlist.tracks.len(),
            tracks_per_artist,
            artists: playlist.artist_names().into_iter().collect(),
            most_used_artist,
            most_used_genre: playlist.most_used_genre.clone(),
            users_figure,
            genres_figure
        }
    }
}

async fn playlist_view(
    State(state): State<AppState>,
    Query(params): Query<PlaylistParams>
) -> Result<Json<PlaylistView>, CollaboratorError> {
    let reference = params.uri
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| state.default_playlist.clone());
    let run = Uuid::new_v4();

    async move {
        let playlist_id = spotify_id(&reference, "playlist")?;
        let session = state.spotify.session().await?;
        let playlist = Playlist::fetch(&session, &playlist_id).await?;
        Ok::<_, CollaboratorError>(Json(PlaylistView::build(&playlist, Utc::now())))
    }
    .instrument(info_span!("pipeline", run = %run, kind = "playlist"))
    .await
}

#[derive(Debug, Deserialize)]
pub struct EntityParams {
    #[serde(default)]
    pub uri: String
}

async fn track_view(
    State(state): State<AppState>,
    Query(params): Query<EntityParams>
) -> Result<Json<Track>, CollaboratorError> {
    // reject before a token is requested
    spotify_id(&params.uri, "track")?;
    let run = Uuid::new_v4();

    async move {
        let session = state.spotify.session().await?;
        let track = Track::resolve(Source::Uri(params.uri), &session).await?;
        info!(track = %track.uri, "track.resolved");
        Ok::<_, CollaboratorError>(Json(track))
    }
    .instrument(info_span!("pipeline", run = %run, kind = "track"))
    .await
}

async fn user_view(
    State(state): State<AppState>,
    Query(params): Query<EntityParams>
) -> Result<Json<User>, CollaboratorError> {
    spotify_id(&params.uri, "user")?;
    let run = Uuid::new_v4();

    async move {
        let session = state.spotify.session().await?;
        let user = User::resolve(Source::Uri(params.uri), &session).await?;
        info!(user = %user.uri, "user.resolved");
        Ok::<_, CollaboratorError>(Json(user))
    }
    .instrument(info_span!("pipeline", run = %run, kind = "user"))
    .await
}

#[derive(Debug, Deserialize)]
pub struct EventParams {
    pub location: Option<u64>
}

async fn events_view(
    State(state): State<AppState>,
    Query(params): Query<EventParams>
) -> Result<Json<Vec<Event>>, CollaboratorError> {
    let metro_id = params.location.ok_or_else(|| CollaboratorError::Misuse(
        "a songkick metro area id is required".to_string()
    ))?;
    let run = Uuid::new_v4();

    async move {
        let window = EventWindow::upcoming(state.songkick.cfg.window_weeks);
        let events = get_events_for_location(state.songkick.as_ref(), metro_id, Some(window))
            .await?;
        info!(metro_id, events = events.len(), "events.fetched");
        Ok::<_, CollaboratorError>(Json(events))
    }
    .instrument(info_span!("pipeline", run = %run, kind = "events"))
    .await
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub events: Vec<Event>
}

async fn matches_view(Json(body): Json<MatchRequest>) -> Json<Vec<EventRow>> {
    let matched = match_events(&body.events, &body.artists);
    info!(events = body.events.len(), matched = matched.len(), "events.matched");
    Json(event_table(&matched))
}

async fn locations_view(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>
) -> Result<Json<Vec<Location>>, CollaboratorError> {
    let run = Uuid::new_v4();
    async move {
        let locations = search_locations(state.songkick.as_ref(), &query).await?;
        info!(found = locations.len(), "locations.search");
        Ok::<_, CollaboratorError>(Json(locations))
    }
    .instrument(info_span!("pipeline", run = %run, kind = "locations"))
    .await
}
