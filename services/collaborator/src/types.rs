//!
//! src/types.rs
//!
//! Typed records for the Spotify json the pipeline consumes. Every
//! wrapper is built through serde so a missing or mistyped field fails
//! with a Parse error instead of a panic further down.
//!

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::CollaboratorError;

fn parse_entity<T: DeserializeOwned>(kind: &str, value: Value) ->
    Result<T, CollaboratorError> {
    serde_json::from_value(value)
        .map_err(|e| CollaboratorError::Parse(format!("malformed {kind}: {e}")))
}

/// The capability to look single entities up by id
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn track(&self, id: &str) -> Result<Value, CollaboratorError>;
    async fn user(&self, id: &str) -> Result<Value, CollaboratorError>;
}

/// Where a Track or User comes from: json already in hand, or a uri
/// (or open.spotify.com link) to look up
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Json(Value),
    Uri(String)
}

impl From<Value> for Source {
    fn from(value: Value) -> Self {
        Source::Json(value)
    }
}

/// Album or artist reference embedded in a track. Local files carry
/// neither id nor uri.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRef {
    pub id: Option<String>,
    pub uri: Option<String>,
    pub name: String
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub album: SimpleRef,
    pub artists: Vec<SimpleRef>,
    pub duration_ms: u64,
    pub explicit: bool,
    #[serde(default)]
    pub popularity: u32,
    pub preview_url: Option<String>
}

impl Track {
    pub fn from_json(value: Value) -> Result<Self, CollaboratorError> {
        parse_entity("track", value)
    }

    /// A bad or empty uri is rejected before anything is fetched
    pub async fn resolve<L>(source: Source, lookup: &L) -> Result<Self, CollaboratorError>
    where
        L: EntityLookup + ?Sized,
    {
        let value = match source {
            Source::Json(value) => value,
            Source::Uri(uri) => lookup.track(&spotify_id(&uri, "track")?).await?
        };
        Track::from_json(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub display_name: Option<String>
}

impl User {
    pub fn from_json(value: Value) -> Result<Self, CollaboratorError> {
        parse_entity("user", value)
    }

    pub async fn resolve<L>(source: Source, lookup: &L) -> Result<Self, CollaboratorError>
    where
        L: EntityLookup + ?Sized,
    {
        let value = match source {
            Source::Json(value) => value,
            Source::Uri(uri) => lookup.user(&spotify_id(&uri, "user")?).await?
        };
        User::from_json(value)
    }

    /// Display name when Spotify embedded one, otherwise the user id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// One entry of a playlist's paging object, as served
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistItem {
    pub added_at: DateTime<Utc>,
    pub added_by: User,
    #[serde(default)]
    pub is_local: bool,
    pub track: Option<Track>
}

/// A track in the context of a playlist: who added it and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistTrack {
    pub track: Track,
    pub added_at: DateTime<Utc>,
    pub added_by: User,
    pub is_local: bool
}

impl PlaylistTrack {
    pub fn from_json(value: Value) -> Result<Option<Self>, CollaboratorError> {
        let item: PlaylistItem = parse_entity("playlist track", value)?;
        Ok(PlaylistTrack::from_item(item))
    }

    /// `None` for entries whose track was pulled from the catalogue
    pub fn from_item(item: PlaylistItem) -> Option<Self> {
        let PlaylistItem { added_at, added_by, is_local, track } = item;
        track.map(|track| PlaylistTrack { track, added_at, added_by, is_local })
    }

    pub fn uri(&self) -> &str {
        &self.track.uri
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub genres: BTreeSet<String>,
    #[serde(default)]
    pub popularity: u32
}

impl Artist {
    pub fn from_json(value: &Value) -> Result<Self, CollaboratorError> {
        parse_entity("artist", value.clone())
    }
}

/// Pulls the bare id out of `spotify:{kind}:{id}`, an open.spotify.com link
/// (locale prefix such as `/intl-de/` allowed), or an id given as-is.
/// Catalogue ids are base62; user ids may also carry `.`, `_` and `-`.
pub fn spotify_id(reference: &str, kind: &str) -> Result<String, CollaboratorError> {
    let reference = reference.trim();
    let misuse = || CollaboratorError::Misuse(
        format!("not a spotify {kind} reference: {reference:?}")
    );

    let candidate = if let Some(rest) = reference.strip_prefix("spotify:") {
        rest.strip_prefix(kind)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(misuse)?
            .to_string()
    } else if reference.starts_with("https://") {
        let url = url::Url::parse(reference).map_err(|_| misuse())?;
        if url.host_str() != Some("open.spotify.com") {
            return Err(misuse());
        }
        let mut segments = url.path_segments().ok_or_else(misuse)?.peekable();
        segments.next_if(|s| s.starts_with("intl-"));
        match (segments.next(), segments.next()) {
            (Some(k), Some(id)) if k == kind => id.to_string(),
            _ => return Err(misuse())
        }
    } else {
        reference.to_string()
    };

    let allowed = |c: char| {
        c.is_ascii_alphanumeric() || (kind == "user" && matches!(c, '.' | '_' | '-'))
    };
    if candidate.is_empty() || !candidate.chars().all(allowed) {
        return Err(misuse());
    }
    Ok(candidate)
}
