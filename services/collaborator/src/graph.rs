//!
//! src/graph.rs
//!
//! Cumulative "tracks added" series and the plotly figure json the
//! dashboard page renders
//!

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::types::PlaylistTrack;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSeries {
    pub x: Vec<String>,
    pub y: Vec<usize>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub title: String
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Figure {
    pub data: Vec<TimeSeries>,
    pub layout: Layout
}

fn iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One point per distinct `added_at` carrying the running total, plus a
/// final point at `now` so the line runs up to the present. `tracks` must
/// already be in time order.
pub fn produce_track_time_series(
    tracks: &[PlaylistTrack],
    name: &str,
    now: DateTime<Utc>
) -> TimeSeries {
    let mut x: Vec<String> = Vec::new();
    let mut y: Vec<usize> = Vec::new();
    let mut last: Option<DateTime<Utc>> = None;

    for (count, pt) in (1..).zip(tracks) {
        if last == Some(pt.added_at) {
            if let Some(top) = y.last_mut() {
                *top = count;
            }
            continue;
        }
        x.push(iso(&pt.added_at));
        y.push(count);
        last = Some(pt.added_at);
    }

    x.push(iso(&now));
    y.push(tracks.len());

    TimeSeries { x, y, name: name.to_string(), kind: "scatter" }
}

/// One series per (name, tracks) pair, in the order given
pub fn plot_sorted_tracks<'a, I>(series: I, title: &str, now: DateTime<Utc>) -> Figure
where
    I: IntoIterator<Item = (&'a str, &'a [PlaylistTrack])>,
{
    let data = series.into_iter()
        .map(|(name, tracks)| produce_track_time_series(tracks, name, now))
        .collect();
    Figure { data, layout: Layout { title: title.to_string() } }
}
