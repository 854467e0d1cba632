//! Wire types for the network layout document and the passenger event
//! payload, both JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level network layout document, as served at `/network-layout.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkLayout {
    pub stations: Vec<StationRecord>,
    pub lines: Vec<LineRecord>,
    pub travel_times: Vec<TravelTimeRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StationRecord {
    pub station_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LineRecord {
    pub line_id: String,
    pub name: String,
    pub routes: Vec<RouteRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRecord {
    pub route_id: String,
    pub start_station_id: String,
    pub end_station_id: String,
    pub route_stations: Vec<String>,
}

/// Travel time between two adjacent stations. The document scopes these to
/// station pairs, not to individual routes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TravelTimeRecord {
    pub start_station_id: String,
    pub end_station_id: String,
    pub travel_time: u32,
}

/// A passenger tapping in or out of a station.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PassengerEvent {
    pub station_id: String,
    #[serde(rename = "passenger_event")]
    pub kind: PassengerEventKind,
    #[serde(rename = "datetime")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassengerEventKind {
    In,
    Out,
}
