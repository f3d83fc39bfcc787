//! Shared data models for transportation tracking.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coordinate::{parse_coordinate, parse_timestamp, parse_timestamp_value};

// --- Identity ---

/// Identifier of the transportation (shipment) being tracked.
///
/// The backend uses integer primary keys but routes accept any path segment,
/// so the id is kept as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedEntityId(String);

impl TrackedEntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank ids are rejected before any I/O is attempted.
    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TrackedEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackedEntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TrackedEntityId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<u64> for TrackedEntityId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

// --- Positions ---

/// A validated geographic position. Both components are always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    latitude: f64,
    longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if latitude.is_finite() && longitude.is_finite() {
            Some(Self {
                latitude,
                longitude,
            })
        } else {
            None
        }
    }

    /// Build a position from two raw JSON components. Both must be present and
    /// numerically valid.
    pub fn from_raw(latitude: Option<&Value>, longitude: Option<&Value>) -> Option<Self> {
        let latitude = parse_coordinate(latitude?)?;
        let longitude = parse_coordinate(longitude?)?;
        Self::new(latitude, longitude)
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

// --- Status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status: Option<String>,
    pub status_display: Option<String>,
    pub pickup_confirmed: bool,
    pub delivery_confirmed: bool,
    pub estimated_arrival: Option<DateTime<Utc>>,
}

// --- REST snapshot ---

/// Body of `GET /transportations/{id}/`, reduced to what tracking needs.
///
/// Coordinates arrive as stringified decimals (sometimes numbers), so they are
/// kept as raw JSON and validated on access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportationSnapshot {
    #[serde(default)]
    pub pickup_latitude: Option<Value>,
    #[serde(default)]
    pub pickup_longitude: Option<Value>,
    #[serde(default)]
    pub delivery_latitude: Option<Value>,
    #[serde(default)]
    pub delivery_longitude: Option<Value>,
    #[serde(default)]
    pub current_latitude: Option<Value>,
    #[serde(default)]
    pub current_longitude: Option<Value>,
    #[serde(default)]
    pub last_location_update: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_display: Option<String>,
    #[serde(default)]
    pub pickup_confirmed: Option<bool>,
    #[serde(default)]
    pub delivery_confirmed: Option<bool>,
    #[serde(default)]
    pub estimated_arrival: Option<String>,
}

impl TransportationSnapshot {
    pub fn pickup(&self) -> Option<Position> {
        Position::from_raw(self.pickup_latitude.as_ref(), self.pickup_longitude.as_ref())
    }

    pub fn delivery(&self) -> Option<Position> {
        Position::from_raw(
            self.delivery_latitude.as_ref(),
            self.delivery_longitude.as_ref(),
        )
    }

    pub fn current(&self) -> Option<Position> {
        Position::from_raw(
            self.current_latitude.as_ref(),
            self.current_longitude.as_ref(),
        )
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_location_update
            .as_deref()
            .and_then(parse_timestamp)
    }

    pub fn status_summary(&self) -> StatusSummary {
        StatusSummary {
            status: self.status.clone(),
            status_display: self.status_display.clone(),
            pickup_confirmed: self.pickup_confirmed.unwrap_or(false),
            delivery_confirmed: self.delivery_confirmed.unwrap_or(false),
            estimated_arrival: self.estimated_arrival.as_deref().and_then(parse_timestamp),
        }
    }
}

/// Body of `GET /transportations/{id}/websocket-token/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSocketTokenResponse {
    #[serde(default)]
    pub token: Option<String>,
}

// --- Push messages ---

/// Which side of the transportation a presence message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    CargoOwner,
    Transporter,
}

impl Participant {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cargo_owner" | "cargoowner" | "owner" => Some(Self::CargoOwner),
            "transporter" | "driver" => Some(Self::Transporter),
            _ => None,
        }
    }
}

/// A presence change carried by a `user_status` push message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    pub participant: Participant,
    pub is_online: bool,
}

/// A server push message decoded leniently.
///
/// The server owns the schema, so every field is optional, unknown fields are
/// ignored and a field with an unexpected type is treated as absent. Fields
/// may sit at the top level or inside a nested `coordinates` / `data` object;
/// top-level values win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushUpdate {
    pub kind: Option<String>,
    pub pickup: Option<Position>,
    pub delivery: Option<Position>,
    pub current: Option<Position>,
    pub last_update: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub status_display: Option<String>,
    pub pickup_confirmed: Option<bool>,
    pub delivery_confirmed: Option<bool>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub presence: Option<PresenceChange>,
}

impl PushUpdate {
    /// Decode a parsed JSON payload. Non-object payloads decode to an empty
    /// update.
    pub fn from_value(payload: &Value) -> Self {
        let Some(top) = payload.as_object() else {
            return Self::default();
        };
        let nested = ["coordinates", "data"]
            .iter()
            .find_map(|key| top.get(*key).and_then(Value::as_object));
        let fields = Fields { top, nested };

        let kind = fields.get("type").and_then(Value::as_str).map(str::to_string);

        // `location_update` echoes carry plain latitude/longitude for the mover.
        let current = fields.position("current_lat", "current_lng").or_else(|| {
            if kind.as_deref() == Some("location_update") {
                fields.position("latitude", "longitude")
            } else {
                None
            }
        });

        let last_update = parse_timestamp_value(fields.get("last_update"))
            .or_else(|| parse_timestamp_value(fields.get("timestamp")));

        // `user_connected` / `user_disconnected` announcements carry no flag.
        let announced = match kind.as_deref() {
            Some("user_connected") => Some(true),
            Some("user_disconnected") => Some(false),
            _ => None,
        };
        let presence = fields
            .get("isOnline")
            .or_else(|| fields.get("is_online"))
            .and_then(Value::as_bool)
            .or(announced)
            .and_then(|is_online| {
                let participant = fields
                    .get("user_type")
                    .or_else(|| fields.get("role"))
                    .and_then(Value::as_str)
                    .and_then(Participant::parse)?;
                Some(PresenceChange {
                    participant,
                    is_online,
                })
            });

        Self {
            pickup: fields.position("pickup_lat", "pickup_lng"),
            delivery: fields.position("delivery_lat", "delivery_lng"),
            current,
            last_update,
            status: fields.string("status"),
            status_display: fields.string("status_display"),
            pickup_confirmed: fields.get("pickup_confirmed").and_then(Value::as_bool),
            delivery_confirmed: fields.get("delivery_confirmed").and_then(Value::as_bool),
            estimated_arrival: parse_timestamp_value(fields.get("estimated_arrival")),
            presence,
            kind,
        }
    }

    /// True when the message carried nothing tracking cares about.
    pub fn is_empty(&self) -> bool {
        self.pickup.is_none()
            && self.delivery.is_none()
            && self.current.is_none()
            && self.last_update.is_none()
            && self.status.is_none()
            && self.status_display.is_none()
            && self.pickup_confirmed.is_none()
            && self.delivery_confirmed.is_none()
            && self.estimated_arrival.is_none()
            && self.presence.is_none()
    }
}

/// Field lookup over the top-level object with a nested fallback.
struct Fields<'a> {
    top: &'a Map<String, Value>,
    nested: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        match self.top.get(key) {
            Some(Value::Null) | None => self.nested.and_then(|n| n.get(key)),
            found => found,
        }
    }

    fn position(&self, lat_key: &str, lng_key: &str) -> Option<Position> {
        Position::from_raw(self.get(lat_key), self.get(lng_key))
    }

    fn string(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

// --- Client commands ---

/// Messages the client sends over the tracking socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    LocationUpdate {
        latitude: f64,
        longitude: f64,
        note: String,
    },
    UserStatus {
        #[serde(rename = "isOnline")]
        is_online: bool,
    },
    Disconnect {
        message: String,
    },
}

impl ClientCommand {
    pub fn location_update(position: Position, note: impl Into<String>) -> Self {
        Self::LocationUpdate {
            latitude: position.latitude(),
            longitude: position.longitude(),
            note: note.into(),
        }
    }

    pub fn graceful_disconnect() -> Self {
        Self::Disconnect {
            message: "Client disconnecting gracefully".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
