//! Derived tracking state and the rules for folding data into it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use nakliye_shared::{Participant, Position, PushUpdate, StatusSummary, TransportationSnapshot};

/// Health of the live link, finer grained than `connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    #[default]
    Idle,
    Connecting,
    Live,
    /// An automatic retry is pending.
    Retrying { attempt: u32, delay: Duration },
    /// Automatic retries are spent; a manual reconnect is needed.
    Abandoned,
    /// The server refused this user (close code 4001).
    Denied,
    /// Closed on purpose by either side.
    Closed,
}

/// One accepted position of the mover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub position: Position,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Everything a map widget needs to render one transportation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingState {
    pub pickup: Option<Position>,
    pub delivery: Option<Position>,
    /// Last known position of the mover.
    pub current: Option<Position>,
    pub last_update: Option<DateTime<Utc>>,
    pub status: StatusSummary,
    pub connected: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub link: LinkStatus,
    /// User-facing explanation of the link status, when there is one.
    pub link_message: Option<String>,
    /// Oldest first, bounded by the configured history limit.
    pub location_history: Vec<LocationSample>,
    pub cargo_owner_online: bool,
    pub transporter_online: bool,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self {
            pickup: None,
            delivery: None,
            current: None,
            last_update: None,
            status: StatusSummary::default(),
            connected: false,
            loading: true,
            error: None,
            link: LinkStatus::Idle,
            link_message: None,
            location_history: Vec::new(),
            cargo_owner_online: false,
            transporter_online: false,
        }
    }
}

impl TrackingState {
    /// Apply a fresh REST snapshot.
    ///
    /// Positions that fail validation keep their previous value; the status
    /// block is replaced as a whole.
    pub fn apply_snapshot(&mut self, snapshot: &TransportationSnapshot, history_limit: usize) {
        if let Some(pickup) = snapshot.pickup() {
            self.pickup = Some(pickup);
        }
        if let Some(delivery) = snapshot.delivery() {
            self.delivery = Some(delivery);
        }
        let recorded_at = snapshot.last_update();
        if let Some(current) = snapshot.current() {
            self.current = Some(current);
            self.record(current, recorded_at, history_limit);
        }
        if recorded_at.is_some() {
            self.last_update = recorded_at;
        }
        self.status = snapshot.status_summary();
        self.error = None;
        self.loading = false;
    }

    /// A fetch failed: keep what we know and surface the error.
    pub fn apply_fetch_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.loading = false;
    }

    /// Fold a push message into the state.
    ///
    /// Only groups that are present and valid are applied, so known values
    /// never regress to unknown. A current position stamped older than the
    /// known `last_update` is ignored. Applying the same update twice has the
    /// same effect as applying it once. Returns whether anything changed.
    pub fn merge_push(&mut self, update: &PushUpdate, history_limit: usize) -> bool {
        let before = self.clone();

        if let Some(pickup) = update.pickup {
            self.pickup = Some(pickup);
        }
        if let Some(delivery) = update.delivery {
            self.delivery = Some(delivery);
        }

        // The stamp only describes a position fix; alone it means nothing.
        if let Some(current) = update.current {
            let stale = match (update.last_update, self.last_update) {
                (Some(incoming), Some(known)) => incoming < known,
                _ => false,
            };
            if stale {
                crate::log_debug!("Ignoring stale location stamped {:?}", update.last_update);
            } else {
                self.current = Some(current);
                self.record(current, update.last_update, history_limit);
                if update.last_update.is_some() {
                    self.last_update = update.last_update;
                }
            }
        }

        if let Some(status) = &update.status {
            self.status.status = Some(status.clone());
        }
        if let Some(display) = &update.status_display {
            self.status.status_display = Some(display.clone());
        }
        if let Some(confirmed) = update.pickup_confirmed {
            self.status.pickup_confirmed = confirmed;
        }
        if let Some(confirmed) = update.delivery_confirmed {
            self.status.delivery_confirmed = confirmed;
        }
        if update.estimated_arrival.is_some() {
            self.status.estimated_arrival = update.estimated_arrival;
        }

        if let Some(presence) = update.presence {
            match presence.participant {
                Participant::CargoOwner => self.cargo_owner_online = presence.is_online,
                Participant::Transporter => self.transporter_online = presence.is_online,
            }
        }

        *self != before
    }

    fn record(
        &mut self,
        position: Position,
        recorded_at: Option<DateTime<Utc>>,
        history_limit: usize,
    ) {
        let sample = LocationSample {
            position,
            recorded_at,
        };
        if self.location_history.last() == Some(&sample) {
            return;
        }
        self.location_history.push(sample);
        if self.location_history.len() > history_limit {
            let overflow = self.location_history.len() - history_limit;
            self.location_history.drain(..overflow);
        }
    }
}
