//!
//! src/main.rs
//!
//! Wires configuration, logging and the api clients together and serves
//! the playlist dashboard until Ctrl-C. Also holds the live testbenches
//! that hit the real apis.
//!
//!


mod config;
mod errors;
mod logging;

mod fetch;
mod paging;
mod types;
mod playlist;
mod live_shows;
mod graph;
mod dashboard;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::CollaboratorError;

#[tokio::main]
async fn main() -> Result<(), CollaboratorError> {
    let cfgs = config::load_config()?;
    let _guard = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service="collaborator",
        version=%env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let spotify  = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let songkick = fetch::SongkickClient::new(&cfgs.http, &cfgs.songkick)?;
    let state    = dashboard::AppState::new(spotify, songkick, &cfgs.server);

    let shutdown = CancellationToken::new();
    let trigger  = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(msg = "shutting dashboard down", "dashboard.signal");
            trigger.cancel();
        }
    });

    dashboard::serve(&cfgs.server, state, shutdown).await
}
