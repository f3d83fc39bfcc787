//! Nakliyematik tracking watcher
//!
//! Follows one or more transportations from the terminal and logs every
//! change of their tracking state until interrupted.
//!
//! ```text
//! nakliyematik [--report=LAT,LNG[,NOTE]] <transportation-id>...
//! ```
//!
//! With `--report`, the given position is sent once each socket is live,
//! the way a driver's device reports its location.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use futures_util::future::join_all;
use nakliye_client::{ConnectionRegistry, TrackingConfig, TrackingSession, TrackingState};
use nakliye_shared::{parse_coordinate_str, TrackedEntityId};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: nakliyematik [--report=LAT,LNG[,NOTE]] <transportation-id>...";

#[derive(Debug, Clone)]
struct Report {
    latitude: f64,
    longitude: f64,
    note: String,
}

fn parse_report(raw: &str) -> Result<Report> {
    let mut parts = raw.splitn(3, ',');
    let latitude = parts
        .next()
        .and_then(parse_coordinate_str)
        .context("--report needs a numeric latitude")?;
    let longitude = parts
        .next()
        .and_then(parse_coordinate_str)
        .context("--report needs a numeric longitude")?;
    let note = parts.next().unwrap_or_default().trim().to_string();
    Ok(Report {
        latitude,
        longitude,
        note,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nakliyematik=info,nakliye_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut report = None;
    let mut ids = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.strip_prefix("--report=") {
            Some(raw) => report = Some(parse_report(raw)?),
            None => ids.push(TrackedEntityId::new(arg)),
        }
    }
    if ids.is_empty() {
        bail!(USAGE);
    }

    let config = TrackingConfig::from_env();
    tracing::info!(
        "Tracking {} transportation(s) via {}",
        ids.len(),
        config.api_base_url
    );
    let registry = ConnectionRegistry::native(config);

    let mut sessions = Vec::with_capacity(ids.len());
    for id in ids {
        let session = Arc::new(
            TrackingSession::new(registry.clone(), id.clone())
                .with_context(|| format!("cannot track '{}'", id))?,
        );
        tokio::spawn(log_changes(id, session.subscribe()));
        sessions.push(session);
    }

    let started = join_all(sessions.iter().map(|session| session.start())).await;
    for (session, result) in sessions.iter().zip(started) {
        if let Err(e) = result {
            tracing::error!("Transportation {} not tracked live: {}", session.entity_id(), e);
        }
    }

    if let Some(report) = report {
        for session in &sessions {
            tokio::spawn(report_when_live(session.clone(), report.clone()));
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutting down");

    for session in &sessions {
        session.set_user_status(false);
        session.stop();
    }
    registry.dispose();
    Ok(())
}

async fn log_changes(id: TrackedEntityId, mut updates: watch::Receiver<TrackingState>) {
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        log_state(&id, &state);
    }
}

fn log_state(id: &TrackedEntityId, state: &TrackingState) {
    let fmt_position = |p: Option<nakliye_shared::Position>| {
        p.map_or_else(|| "-".to_string(), |p| p.to_string())
    };
    let last_update = state
        .last_update
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    if let Some(error) = &state.error {
        tracing::warn!(transportation = %id, "{}", error);
    }
    tracing::info!(
        transportation = %id,
        link = ?state.link,
        status = state.status.status_display.as_deref().unwrap_or("-"),
        "current {} (at {}), pickup {}, delivery {}, {} samples",
        fmt_position(state.current),
        last_update,
        fmt_position(state.pickup),
        fmt_position(state.delivery),
        state.location_history.len()
    );
    if let Some(message) = &state.link_message {
        tracing::info!(transportation = %id, "{}", message);
    }
}

async fn report_when_live(session: Arc<TrackingSession>, report: Report) {
    let mut updates = session.subscribe();
    if updates.wait_for(|state| state.connected).await.is_err() {
        return;
    }

    session.set_user_status(true);
    if session.update_location(report.latitude, report.longitude, &report.note) {
        tracing::info!(
            "Reported {}, {} for transportation {}",
            report.latitude,
            report.longitude,
            session.entity_id()
        );
    } else {
        tracing::warn!("Could not report position for transportation {}", session.entity_id());
    }
}
