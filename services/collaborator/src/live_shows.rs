//!
//! src/live_shows.rs
//!
//! Songkick side of the dashboard: metro area search, the event calendar
//! for a metro area, and matching events against a playlist's artists
//!

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::CollaboratorError;
use crate::fetch::{send_json, SongkickClient};

const DATE_FORMAT: &str = "%Y-%m-%d";
const ROW_DATE_FORMAT: &str = "%a %d %b %Y, %H:%M";

/// The capability to fetch one page of a metro area's calendar
#[async_trait]
pub trait CalendarSource: Send + Sync {
    fn per_page(&self) -> u32;
    async fn calendar_page(&self, metro_id: u64, window: &EventWindow, page: u32) ->
        Result<Value, CollaboratorError>;
}

#[async_trait]
impl CalendarSource for SongkickClient {
    fn per_page(&self) -> u32 {
        self.cfg.events_per_page
    }

    async fn calendar_page(&self, metro_id: u64, window: &EventWindow, page: u32) ->
        Result<Value, CollaboratorError> {
        let (min_date, max_date) = window.query_dates();
        send_json(self.calendar(metro_id, &min_date, &max_date, page)?).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub start: NaiveDate,
    pub end: NaiveDate
}

impl EventWindow {
    /// today .. today + `weeks`
    pub fn upcoming(weeks: i64) -> Self {
        let start = Utc::now().date_naive();
        Self { start, end: start + Duration::weeks(weeks) }
    }

    fn query_dates(&self) -> (String, String) {
        (
            self.start.format(DATE_FORMAT).to_string(),
            self.end.format(DATE_FORMAT).to_string()
        )
    }
}

///
/// Songkick response envelope
///

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    results_page: ResultsPage<T>
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsPage<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<Value>,
    results: Option<T>,
    #[serde(default)]
    total_entries: u32
}

fn open_envelope<T: DeserializeOwned + Default>(value: Value) ->
    Result<(T, u32), CollaboratorError> {
    let envelope: Envelope<T> = serde_json::from_value(value)
        .map_err(|e| CollaboratorError::Parse(format!("malformed songkick page: {e}")))?;
    let page = envelope.results_page;
    if page.status == "error" {
        let message = page.error
            .as_ref()
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(CollaboratorError::Http(format!("songkick: {message}")));
    }
    // no matches come back as `"results": {}`
    Ok((page.results.unwrap_or_default(), page.total_entries))
}

#[derive(Debug, Default, Deserialize)]
struct EventResults {
    #[serde(default)]
    event: Vec<RawEvent>
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    id: u64,
    #[serde(rename = "type")]
    kind: String,
    uri: String,
    display_name: String,
    start: RawStart,
    #[serde(default)]
    performance: Vec<RawPerformance>,
    venue: Named,
    status: EventStatus
}

#[derive(Debug, Deserialize)]
struct RawStart {
    date: Option<String>,
    datetime: Option<String>
}

#[derive(Debug, Deserialize)]
struct RawPerformance {
    artist: Named
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Named {
    display_name: String
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Ok,
    Cancelled,
    Postponed
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Ok => "ok",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Postponed => "postponed"
        }
    }
}

/// An event at a venue, all acts on the night included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// "Concert" or "Festival"
    pub kind: String,
    pub uri: String,
    pub display_name: String,
    pub start: DateTime<FixedOffset>,
    pub venue: String,
    pub status: EventStatus,
    pub performers: Vec<String>
}

impl Event {
    fn from_raw(raw: RawEvent) -> Result<Self, CollaboratorError> {
        let start = parse_start(&raw.start)
            .ok_or_else(|| CollaboratorError::Parse(
                format!("event {} has no usable start", raw.id)
            ))?;
        Ok( Event {
            id: raw.id.to_string(),
            kind: raw.kind,
            uri: raw.uri,
            display_name: raw.display_name,
            start,
            venue: raw.venue.display_name,
            status: raw.status,
            performers: raw.performance.into_iter()
                .map(|p| p.artist.display_name)
                .collect()
        })
    }
}

/// `start.datetime` when songkick knows the time, else midnight UTC of `start.date`
fn parse_start(start: &RawStart) -> Option<DateTime<FixedOffset>> {
    if let Some(datetime) = start.datetime.as_deref() {
        return DateTime::parse_from_str(datetime, "%Y-%m-%dT%H:%M:%S%z")
            .or_else(|_| DateTime::parse_from_rfc3339(datetime))
            .ok();
    }
    let date = NaiveDate::parse_from_str(start.date.as_deref()?, DATE_FORMAT).ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset())
}

pub fn parse_events(value: Value) -> Result<(Vec<Event>, u32), CollaboratorError> {
    let (results, total) = open_envelope::<EventResults>(value)?;
    let events = results.event.into_iter()
        .map(Event::from_raw)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((events, total))
}

pub fn page_count(total_entries: u32, per_page: u32) -> u32 {
    total_entries.div_ceil(per_page.max(1))
}

/// Every event in the metro area's calendar over `window`, page by page.
/// Defaults to the next twelve weeks.
pub async fn get_events_for_location<C>(
    source: &C,
    metro_id: u64,
    window: Option<EventWindow>
) -> Result<Vec<Event>, CollaboratorError>
where
    C: CalendarSource + ?Sized,
{
    let window = window.unwrap_or_else(|| EventWindow::upcoming(12));
    info!(metro_id, start = %window.start, end = %window.end, "events.fetch");

    let (mut events, total) = parse_events(source.calendar_page(metro_id, &window, 1).await?)?;
    let pages = page_count(total, source.per_page());
    debug!(page = 1, pages, total, events = events.len(), "events.page");

    // songkick pages are 1-based
    for page in 2..=pages {
        let (more, _) = parse_events(source.calendar_page(metro_id, &window, page).await?)?;
        debug!(page, pages, events = more.len(), "events.page");
        events.extend(more);
    }

    Ok(events)
}

///
/// Metro area search
///

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationQuery {
    pub query: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>
}

#[derive(Debug, Default, Deserialize)]
struct LocationResults {
    #[serde(default)]
    location: Vec<RawLocation>
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLocation {
    city: Named,
    metro_area: RawMetroArea
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetroArea {
    id: u64,
    display_name: String
}

/// A city and the songkick metro area that groups its gigs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub city: String,
    pub metro_area_id: u64,
    pub metro_area: String
}

pub fn parse_locations(value: Value) -> Result<Vec<Location>, CollaboratorError> {
    let (results, _) = open_envelope::<LocationResults>(value)?;
    Ok(results.location.into_iter()
        .map(|l| Location {
            city: l.city.display_name,
            metro_area_id: l.metro_area.id,
            metro_area: l.metro_area.display_name
        })
        .collect())
}

/// Best match first, at most `locations_limit` results; empty when
/// nothing matches. Needs a name or both coordinates.
pub async fn search_locations(client: &SongkickClient, query: &LocationQuery) ->
    Result<Vec<Location>, CollaboratorError> {
    let request = match query {
        LocationQuery { query: Some(name), .. } if !name.trim().is_empty() =>
            client.search_locations(name.trim())?,
        LocationQuery { lat: Some(lat), lng: Some(lng), .. } =>
            client.search_locations_geo(*lat, *lng)?,
        _ => return Err(CollaboratorError::Misuse(
            "Must provide either a location name or lat and long.".to_string()
        ))
    };
    parse_locations(send_json(request).await?)
}

///
/// Matching against a playlist
///

/// Events where any performer matches a playlist artist (case-insensitive,
/// exact name), each event once, in calendar order
pub fn match_events<I, S>(events: &[Event], artist_names: I) -> Vec<Event>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let wanted: HashSet<String> = artist_names.into_iter()
        .map(|name| name.as_ref().to_lowercase())
        .collect();
    let mut seen = HashSet::new();

    events.iter()
        .filter(|e| e.performers.iter().any(|p| wanted.contains(&p.to_lowercase())))
        .filter(|e| seen.insert(e.id.clone()))
        .cloned()
        .collect()
}

/// One line of the gig table on the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventRow {
    pub name: Option<String>,
    pub venue: Option<String>,
    pub performers: Option<String>,
    pub date: Option<String>,
    pub status: Option<String>,
    pub link: Option<String>
}

/// Tabular projection of matched events; a single all-null row when
/// nothing matched so the table still renders
pub fn event_table(matches: &[Event]) -> Vec<EventRow> {
    if matches.is_empty() {
        return vec![EventRow::default()];
    }
    matches.iter()
        .map(|e| EventRow {
            name: Some(e.display_name.clone()),
            venue: Some(e.venue.clone()),
            performers: Some(e.performers.join(", ")),
            date: Some(e.start.format(ROW_DATE_FORMAT).to_string()),
            status: Some(e.status.as_str().to_string()),
            link: Some(e.uri.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use serde_json::json;
    use crate::config::test_config;

    fn raw_event(id: u64, performers: &[&str]) -> Value {
        json!({
            "id": id,
            "type": "Concert",
            "uri": format!("https://www.songkick.com/concerts/{id}"),
            "displayName": format!("Gig {id}"),
            "start": { "date": "2026-11-20", "time": "19:30:00",
                       "datetime": "2026-11-20T19:30:00+0000" },
            "performance": performers.iter()
                .map(|p| json!({ "artist": { "displayName": p } }))
                .collect::<Vec<_>>(),
            "venue": { "displayName": "The Fillmore" },
            "status": "ok"
        })
    }

    fn calendar(ids: std::ops::Range<u64>, total: u32) -> Value {
        let events: Vec<Value> = ids.map(|id| raw_event(id, &["Someone"])).collect();
        json!({
            "resultsPage": {
                "status": "ok",
                "results": { "event": events },
                "perPage": 50,
                "page": 1,
                "totalEntries": total
            }
        })
    }

    struct FakeCalendar {
        total: u32,
        asked: Mutex<Vec<u32>>
    }

    #[async_trait]
    impl CalendarSource for FakeCalendar {
        fn per_page(&self) -> u32 { 50 }

        async fn calendar_page(&self, _metro_id: u64, _window: &EventWindow, page: u32) ->
            Result<Value, CollaboratorError> {
            self.asked.lock().unwrap().push(page);
            let start = u64::from((page - 1) * 50);
            let end = u64::from(self.total).min(start + 50);
            Ok(calendar(start..end, self.total))
        }
    }

    fn event(id: &str, performers: &[&str]) -> Event {
        let mut raw = raw_event(id.parse().unwrap(), performers);
        raw["displayName"] = json!(format!("Gig {id}"));
        Event::from_raw(serde_json::from_value(raw).unwrap()).unwrap()
    }

    #[test]
    fn event_parses_songkick_json() {
        let (events, total) = parse_events(calendar(7..8, 1)).unwrap();
        assert_eq!(total, 1);
        let e = &events[0];
        assert_eq!(e.id, "7");
        assert_eq!(e.kind, "Concert");
        assert_eq!(e.venue, "The Fillmore");
        assert_eq!(e.status, EventStatus::Ok);
        assert_eq!(e.performers, vec!["Someone"]);
        assert_eq!(e.start.to_rfc3339(), "2026-11-20T19:30:00+00:00");
    }

    #[test]
    fn event_without_time_starts_at_midnight() {
        let mut raw = raw_event(1, &["A"]);
        raw["start"] = json!({ "date": "2026-12-01", "time": null, "datetime": null });
        let e = Event::from_raw(serde_json::from_value(raw).unwrap()).unwrap();
        assert_eq!(e.start.to_rfc3339(), "2026-12-01T00:00:00+00:00");
    }

    #[test]
    fn empty_results_mean_no_events() {
        let value = json!({
            "resultsPage": { "status": "ok", "results": {}, "totalEntries": 0 }
        });
        let (events, total) = parse_events(value).unwrap();
        assert!(events.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn page_without_results_key_is_empty() {
        let value = json!({ "resultsPage": { "status": "ok", "totalEntries": 0 } });
        let (events, _) = parse_events(value.clone()).unwrap();
        assert!(events.is_empty());
        assert!(parse_locations(value).unwrap().is_empty());
    }

    #[test]
    fn songkick_error_status_is_http_error() {
        let value = json!({
            "resultsPage": { "status": "error", "error": { "message": "Invalid API key" } }
        });
        let err = parse_events(value).unwrap_err();
        assert!(matches!(err, CollaboratorError::Http(ref m) if m.contains("Invalid API key")));
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0, 50), 0);
        assert_eq!(page_count(1, 50), 1);
        assert_eq!(page_count(50, 50), 1);
        assert_eq!(page_count(51, 50), 2);
        assert_eq!(page_count(123, 50), 3);
    }

    #[tokio::test]
    async fn calendar_pages_are_all_fetched_once() {
        let source = FakeCalendar { total: 123, asked: Mutex::new(Vec::new()) };
        let window = EventWindow {
            start: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            end: NaiveDate::from_ymd_opt(2027, 1, 8).unwrap()
        };

        let events = get_events_for_location(&source, 24426, Some(window)).await.unwrap();

        assert_eq!(events.len(), 123);
        assert_eq!(*source.asked.lock().unwrap(), vec![1, 2, 3]);
        let ids: HashSet<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), 123);
    }

    #[test]
    fn default_window_is_twelve_weeks() {
        let window = EventWindow::upcoming(12);
        assert_eq!(window.end - window.start, Duration::weeks(12));
        let (min, max) = window.query_dates();
        assert_eq!(min.len(), 10);
        assert_eq!(max.len(), 10);
    }

    #[test]
    fn matching_is_case_insensitive_and_exact() {
        let events = vec![
            event("1", &["radiohead"]),
            event("2", &["Muse"]),
            event("3", &["Radiohead Tribute Band"]),
        ];

        let matched = match_events(&events, ["Radiohead"]);

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "1");
    }

    #[test]
    fn matching_keeps_each_event_once() {
        let events = vec![
            event("1", &["Muse", "Radiohead"]),
            event("1", &["Muse", "Radiohead"]),
            event("2", &["Raveena"]),
        ];

        let matched = match_events(&events, vec!["radiohead".to_string(), "MUSE".to_string()]);

        assert_eq!(matched.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["1"]);
    }

    #[test]
    fn table_rows_project_matches() {
        let rows = event_table(&[event("5", &["Muse", "Raveena"])]);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.name.as_deref(), Some("Gig 5"));
        assert_eq!(row.venue.as_deref(), Some("The Fillmore"));
        assert_eq!(row.performers.as_deref(), Some("Muse, Raveena"));
        assert_eq!(row.date.as_deref(), Some("Fri 20 Nov 2026, 19:30"));
        assert_eq!(row.status.as_deref(), Some("ok"));
        assert_eq!(row.link.as_deref(), Some("https://www.songkick.com/concerts/5"));
    }

    #[test]
    fn empty_table_is_one_null_row() {
        assert_eq!(event_table(&[]), vec![EventRow::default()]);
    }

    #[test]
    fn locations_parse_city_and_metro_area() {
        let value = json!({
            "resultsPage": {
                "status": "ok",
                "results": { "location": [{
                    "city": { "displayName": "London", "lat": 51.5, "lng": -0.12 },
                    "metroArea": { "id": 24426, "displayName": "London" }
                }]},
                "totalEntries": 1
            }
        });
        let locations = parse_locations(value).unwrap();
        assert_eq!(locations, vec![Location {
            city: "London".to_string(),
            metro_area_id: 24426,
            metro_area: "London".to_string()
        }]);
    }

    #[tokio::test]
    async fn location_search_needs_name_or_coordinates() {
        let cfgs = test_config();
        let client = SongkickClient::new(&cfgs.http, &cfgs.songkick).unwrap();

        let half = LocationQuery { lat: Some(51.5), ..Default::default() };
        for query in [LocationQuery::default(), half] {
            let err = search_locations(&client, &query).await.unwrap_err();
            assert!(matches!(err, CollaboratorError::Misuse(_)));
        }
    }
}
