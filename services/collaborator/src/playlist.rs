//!
//! src/playlist.rs
//!
//! Fetches a playlist and builds the derived indexes the dashboard plots:
//! tracks by user, by artist and by genre, plus the most used artist
//! and genre.
//!
//! All indexes live in ordered maps, so iteration is by key and ties for
//! "most used" resolve to the lexicographically smallest key.
//!

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::CollaboratorError;
use crate::fetch::SpotifySession;
use crate::paging::{get_all_paged_items, Page, PageSource};
use crate::types::{spotify_id, Artist, PlaylistTrack, User};

/// Spotify caps GET /v1/artists at 50 ids per call
pub const ARTIST_BATCH: usize = 50;

/// Field projection for the playlist lookup; tracks arrive as the first page
pub const PLAYLIST_FIELDS: &str =
    "collaborative,description,id,name,owner,public,tracks,uri";

/// The capability to resolve full artist records (genres included)
#[async_trait]
pub trait ArtistLookup: Send + Sync {
    async fn artists(&self, ids: &[String]) -> Result<Vec<Artist>, CollaboratorError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistMeta {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub owner: User,
    pub collaborative: bool,
    pub public: Option<bool>,
    pub description: Option<String>
}

#[derive(Debug, Deserialize)]
struct PlaylistDoc {
    #[serde(flatten)]
    meta: PlaylistMeta,
    tracks: Page<Value>
}

pub type Buckets = BTreeMap<String, Vec<PlaylistTrack>>;

#[derive(Debug, Clone)]
pub struct Playlist {
    pub meta: PlaylistMeta,
    /// deduplicated by uri, ascending by added_at
    pub tracks: Vec<PlaylistTrack>,
    /// user uri -> tracks that user added
    pub tracks_by_user: Buckets,
    /// artist uri -> tracks crediting that artist
    pub tracks_by_artist: Buckets,
    pub tracks_by_genre: Buckets,
    pub artists: BTreeMap<String, Artist>,
    pub users: BTreeMap<String, User>,
    pub most_used_artist: Option<String>,
    pub most_used_genre: Option<String>
}

impl Playlist {
    /// Playlist lookup, track pagination, artist lookup, aggregation
    pub async fn fetch(session: &SpotifySession, reference: &str) ->
        Result<Self, CollaboratorError> {
        let playlist_id = spotify_id(reference, "playlist")?;
        info!(playlist = %playlist_id, "playlist.fetch");

        let doc = session.playlist_json(&playlist_id, PLAYLIST_FIELDS).await?;
        Playlist::load(session, doc).await
    }

    /// Builds a playlist from the raw playlist object, following its track
    /// pages through `source`
    pub async fn load<S>(source: &S, doc: Value) -> Result<Self, CollaboratorError>
    where
        S: PageSource + ArtistLookup,
    {
        let doc: PlaylistDoc = serde_json::from_value(doc)
            .map_err(|e| CollaboratorError::Parse(format!("malformed playlist: {e}")))?;

        let items = get_all_paged_items(source, doc.tracks).await?;
        let total = items.len();
        let tracks: Vec<PlaylistTrack> = items.into_iter()
            .map(PlaylistTrack::from_json)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        if tracks.len() < total {
            warn!(skipped = total - tracks.len(), "playlist.items.unavailable");
        }

        Playlist::aggregate(doc.meta, tracks, source).await
    }

    /// Rebuilds every index from the raw track list. Running it twice on
    /// the same input yields the same indexes.
    pub async fn aggregate<L>(meta: PlaylistMeta, raw: Vec<PlaylistTrack>, lookup: &L) ->
        Result<Self, CollaboratorError>
    where
        L: ArtistLookup + ?Sized,
    {
        let tracks = dedupe_by_uri(raw);

        let mut tracks_by_user = Buckets::new();
        let mut tracks_by_artist = Buckets::new();
        let mut users = BTreeMap::new();
        let mut artist_ids = BTreeMap::new();

        for track in &tracks {
            users.entry(track.added_by.uri.clone())
                .or_insert_with(|| track.added_by.clone());
            tracks_by_user.entry(track.added_by.uri.clone())
                .or_default()
                .push(track.clone());

            let mut credited = HashSet::new();
            for artist in &track.track.artists {
                // local files credit artists that have no uri to look up
                let (Some(uri), Some(id)) = (&artist.uri, &artist.id) else { continue };
                if !credited.insert(uri.as_str()) {
                    continue;
                }
                artist_ids.entry(uri.clone()).or_insert_with(|| id.clone());
                tracks_by_artist.entry(uri.clone())
                    .or_default()
                    .push(track.clone());
            }
        }

        let ids: Vec<String> = artist_ids.into_values().collect();
        let artists = resolve_artists(lookup, &ids).await?;
        let tracks_by_genre = genre_buckets(&tracks_by_artist, &artists);

        let most_used_artist = most_used(&tracks_by_artist);
        let most_used_genre = most_used(&tracks_by_genre);

        info!(
            playlist = %meta.id,
            tracks = tracks.len(),
            users = tracks_by_user.len(),
            artists = tracks_by_artist.len(),
            genres = tracks_by_genre.len(),
            "playlist.aggregated"
        );

        Ok( Playlist {
            meta,
            tracks,
            tracks_by_user,
            tracks_by_artist,
            tracks_by_genre,
            artists,
            users,
            most_used_artist,
            most_used_genre
        })
    }

    /// Every credited artist name, local files included
    pub fn artist_names(&self) -> BTreeSet<String> {
        self.tracks.iter()
            .flat_map(|t| t.track.artists.iter().map(|a| a.name.clone()))
            .collect()
    }

    /// Chart label for a user bucket key
    pub fn user_label<'a>(&'a self, uri: &'a str) -> &'a str {
        self.users.get(uri).map(User::label).unwrap_or(uri)
    }
}

/// Keeps the first occurrence of every uri, then sorts by added_at (stable)
fn dedupe_by_uri(raw: Vec<PlaylistTrack>) -> Vec<PlaylistTrack> {
    let mut seen = HashSet::new();
    let mut tracks: Vec<PlaylistTrack> = raw.into_iter()
        .filter(|t| seen.insert(t.uri().to_string()))
        .collect();
    tracks.sort_by_key(|t| t.added_at);
    tracks
}

async fn resolve_artists<L>(lookup: &L, ids: &[String]) ->
    Result<BTreeMap<String, Artist>, CollaboratorError>
where
    L: ArtistLookup + ?Sized,
{
    let mut artists = BTreeMap::new();
    for batch in ids.chunks(ARTIST_BATCH) {
        let resolved = lookup.artists(batch).await?;
        debug!(requested = batch.len(), resolved = resolved.len(), "playlist.artists.batch");
        for artist in resolved {
            artists.insert(artist.uri.clone(), artist);
        }
    }
    Ok(artists)
}

/// Genre buckets are derived through artist -> genre. The first artist
/// seen for a genre seeds the bucket; later artists only add tracks not
/// already present. Buckets are re-sorted because artists interleave.
fn genre_buckets(by_artist: &Buckets, artists: &BTreeMap<String, Artist>) -> Buckets {
    let mut buckets = Buckets::new();
    let mut members: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();

    for (uri, tracks) in by_artist {
        let Some(artist) = artists.get(uri) else { continue };
        for genre in &artist.genres {
            let seen = members.entry(genre.as_str()).or_default();
            let bucket = buckets.entry(genre.clone()).or_default();
            for track in tracks {
                if seen.insert(track.uri()) {
                    bucket.push(track.clone());
                }
            }
        }
    }

    for bucket in buckets.values_mut() {
        bucket.sort_by_key(|t| t.added_at);
    }
    buckets
}

/// Key with the most distinct tracks; the first (smallest) key wins ties
fn most_used(buckets: &Buckets) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for (key, tracks) in buckets {
        let count = tracks.iter().map(|t| t.uri()).collect::<HashSet<_>>().len();
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use serde_json::json;
    use crate::types::fixtures;

    /// Artist records served from memory; records the size of every batch
    struct FakeSpotify {
        artists: Vec<Value>,
        pages: Vec<(String, Value)>,
        batches: Mutex<Vec<usize>>
    }

    impl FakeSpotify {
        fn new(artists: Vec<Value>) -> Self {
            Self { artists, pages: Vec::new(), batches: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ArtistLookup for FakeSpotify {
        async fn artists(&self, ids: &[String]) -> Result<Vec<Artist>, CollaboratorError> {
            self.batches.lock().unwrap().push(ids.len());
            self.artists.iter()
                .filter(|a| ids.iter().any(|id| a["id"] == id.as_str()))
                .map(Artist::from_json)
                .collect()
        }
    }

    #[async_trait]
    impl PageSource for FakeSpotify {
        async fn fetch_page(&self, next: &str) -> Result<Value, CollaboratorError> {
            self.pages.iter()
                .find(|(link, _)| link == next)
                .map(|(_, page)| page.clone())
                .ok_or_else(|| CollaboratorError::Http(format!("status 404: {next}")))
        }
    }

    fn meta_doc() -> Value {
        json!({
            "id": "pl",
            "uri": "spotify:playlist:pl",
            "name": "Collab",
            "owner": { "id": "dan", "uri": "spotify:user:dan", "display_name": "Dan" },
            "collaborative": true,
            "public": false,
            "description": ""
        })
    }

    fn meta() -> PlaylistMeta {
        serde_json::from_value(meta_doc()).unwrap()
    }

    fn pt(id: &str, user: &str, added_at: &str, artists: &[(&str, &str)]) -> PlaylistTrack {
        PlaylistTrack::from_json(fixtures::item(id, user, added_at, artists))
            .unwrap()
            .unwrap()
    }

    fn sample_tracks() -> Vec<PlaylistTrack> {
        vec![
            pt("t3", "amy", "2020-01-03T00:00:00Z", &[("muse", "Muse")]),
            pt("t1", "dan", "2020-01-01T00:00:00Z", &[("rh", "Radiohead")]),
            pt("t2", "dan", "2020-01-02T00:00:00Z", &[("rh", "Radiohead"), ("muse", "Muse")]),
            pt("t4", "amy", "2020-01-04T00:00:00Z", &[("rav", "Raveena")]),
            // same uri as t1, added again later
            pt("t1", "amy", "2020-01-05T00:00:00Z", &[("rh", "Radiohead")]),
        ]
    }

    fn sample_artists() -> Vec<Value> {
        vec![
            fixtures::artist("rh", "Radiohead", &["alternative rock", "art rock"]),
            fixtures::artist("muse", "Muse", &["alternative rock", "rock"]),
            fixtures::artist("rav", "Raveena", &["indie soul"]),
        ]
    }

    fn uris(tracks: &[PlaylistTrack]) -> Vec<&str> {
        tracks.iter().map(|t| t.uri()).collect()
    }

    #[tokio::test]
    async fn tracks_are_deduplicated_and_chronological() {
        let fake = FakeSpotify::new(sample_artists());
        let playlist = Playlist::aggregate(meta(), sample_tracks(), &fake).await.unwrap();

        assert_eq!(
            uris(&playlist.tracks),
            vec!["spotify:track:t1", "spotify:track:t2", "spotify:track:t3", "spotify:track:t4"]
        );
        // first occurrence wins
        assert_eq!(playlist.tracks[0].added_by.id, "dan");
    }

    #[tokio::test]
    async fn user_buckets_partition_tracks() {
        let fake = FakeSpotify::new(sample_artists());
        let playlist = Playlist::aggregate(meta(), sample_tracks(), &fake).await.unwrap();

        let mut union: Vec<&str> = playlist.tracks_by_user.values()
            .flat_map(|b| uris(b))
            .collect();
        assert_eq!(union.len(), playlist.tracks.len());
        union.sort();
        let mut all = uris(&playlist.tracks);
        all.sort();
        assert_eq!(union, all);

        assert_eq!(
            uris(&playlist.tracks_by_user["spotify:user:dan"]),
            vec!["spotify:track:t1", "spotify:track:t2"]
        );
        assert_eq!(playlist.user_label("spotify:user:amy"), "amy");
    }

    #[tokio::test]
    async fn tracks_appear_under_every_credited_artist_only() {
        let fake = FakeSpotify::new(sample_artists());
        let playlist = Playlist::aggregate(meta(), sample_tracks(), &fake).await.unwrap();

        for track in &playlist.tracks {
            let credited: HashSet<&str> = track.track.artists.iter()
                .filter_map(|a| a.uri.as_deref())
                .collect();
            for (artist, bucket) in &playlist.tracks_by_artist {
                let present = bucket.iter().any(|t| t.uri() == track.uri());
                assert_eq!(present, credited.contains(artist.as_str()));
            }
        }
        assert_eq!(
            uris(&playlist.tracks_by_artist["spotify:artist:muse"]),
            vec!["spotify:track:t2", "spotify:track:t3"]
        );
    }

    #[tokio::test]
    async fn genre_buckets_merge_artists_without_duplicates() {
        let fake = FakeSpotify::new(sample_artists());
        let playlist = Playlist::aggregate(meta(), sample_tracks(), &fake).await.unwrap();

        // t2 is credited to both Radiohead and Muse, both "alternative rock"
        assert_eq!(
            uris(&playlist.tracks_by_genre["alternative rock"]),
            vec!["spotify:track:t1", "spotify:track:t2", "spotify:track:t3"]
        );
        assert_eq!(uris(&playlist.tracks_by_genre["indie soul"]), vec!["spotify:track:t4"]);
        assert_eq!(playlist.tracks_by_genre.len(), 4);

        for bucket in playlist.tracks_by_genre.values() {
            assert!(bucket.windows(2).all(|w| w[0].added_at <= w[1].added_at));
        }
    }

    #[tokio::test]
    async fn aggregation_is_idempotent() {
        let fake = FakeSpotify::new(sample_artists());
        let first = Playlist::aggregate(meta(), sample_tracks(), &fake).await.unwrap();
        let mut shuffled = sample_tracks();
        shuffled.reverse();
        let second = Playlist::aggregate(meta(), shuffled, &fake).await.unwrap();

        let as_sets = |b: &Buckets| -> BTreeMap<String, BTreeSet<String>> {
            b.iter()
                .map(|(k, v)| (k.clone(), v.iter().map(|t| t.uri().to_string()).collect()))
                .collect()
        };
        assert_eq!(as_sets(&first.tracks_by_genre), as_sets(&second.tracks_by_genre));
        assert_eq!(as_sets(&first.tracks_by_artist), as_sets(&second.tracks_by_artist));
    }

    #[tokio::test]
    async fn most_used_picks_largest_then_smallest_key() {
        let fake = FakeSpotify::new(sample_artists());
        let playlist = Playlist::aggregate(meta(), sample_tracks(), &fake).await.unwrap();

        // Radiohead and Muse both have two tracks; "muse" sorts first
        assert_eq!(playlist.most_used_artist.as_deref(), Some("spotify:artist:muse"));
        assert_eq!(playlist.most_used_genre.as_deref(), Some("alternative rock"));
    }

    #[tokio::test]
    async fn empty_playlist_has_no_favourites() {
        let fake = FakeSpotify::new(Vec::new());
        let playlist = Playlist::aggregate(meta(), Vec::new(), &fake).await.unwrap();

        assert!(playlist.tracks.is_empty());
        assert!(playlist.most_used_artist.is_none());
        assert!(playlist.most_used_genre.is_none());
        assert!(fake.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn artists_are_resolved_in_batches_of_fifty() {
        let ids: Vec<String> = (0..120).map(|i| format!("a{i}")).collect();
        let artists = ids.iter().map(|id| fixtures::artist(id, id, &["pop"])).collect();
        let fake = FakeSpotify::new(artists);
        let tracks = ids.iter().enumerate()
            .map(|(i, id)| pt(
                &format!("t{i}"), "dan",
                &format!("2020-01-01T00:{:02}:{:02}Z", i / 60, i % 60),
                &[(id.as_str(), id.as_str())]
            ))
            .collect();

        let playlist = Playlist::aggregate(meta(), tracks, &fake).await.unwrap();

        assert_eq!(*fake.batches.lock().unwrap(), vec![50, 50, 20]);
        assert_eq!(playlist.artists.len(), 120);
        assert_eq!(playlist.tracks_by_genre["pop"].len(), 120);
    }

    #[tokio::test]
    async fn load_follows_track_pages() {
        let mut fake = FakeSpotify::new(sample_artists());
        fake.pages.push((
            "https://api.spotify.com/v1/playlists/pl/tracks?offset=100".to_string(),
            json!({
                "items": [
                    fixtures::item("t9", "amy", "2021-06-01T12:00:00Z", &[("rav", "Raveena")]),
                    {
                        "added_at": "2021-06-02T12:00:00Z",
                        "added_by": { "id": "amy", "uri": "spotify:user:amy" },
                        "is_local": false,
                        "track": null
                    }
                ],
                "next": null
            })
        ));
        let mut doc = json!({
            "id": "pl",
            "uri": "spotify:playlist:pl",
            "name": "Collab",
            "owner": { "id": "dan", "uri": "spotify:user:dan" },
            "collaborative": true,
            "public": null,
            "description": null
        });
        doc["tracks"] = json!({
            "items": [fixtures::item("t1", "dan", "2020-01-01T00:00:00Z", &[("rh", "Radiohead")])],
            "next": "https://api.spotify.com/v1/playlists/pl/tracks?offset=100"
        });

        let playlist = Playlist::load(&fake, doc).await.unwrap();

        assert_eq!(playlist.meta.name, "Collab");
        assert_eq!(uris(&playlist.tracks), vec!["spotify:track:t1", "spotify:track:t9"]);
        assert_eq!(
            playlist.artist_names(),
            BTreeSet::from(["Radiohead".to_string(), "Raveena".to_string()])
        );
    }

    #[tokio::test]
    async fn malformed_playlist_is_parse_error() {
        let fake = FakeSpotify::new(Vec::new());
        let err = Playlist::load(&fake, json!({ "id": "pl" })).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Parse(_)));
    }

    #[tokio::test]
    async fn malformed_item_is_parse_error() {
        let fake = FakeSpotify::new(Vec::new());
        let mut doc = meta_doc();
        doc["tracks"] = json!({
            "items": [{ "added_at": "2021-06-02T12:00:00Z", "track": null }],
            "next": null
        });

        let err = Playlist::load(&fake, doc).await.unwrap_err();

        assert!(matches!(err, CollaboratorError::Parse(ref m) if m.contains("playlist track")));
    }
}
