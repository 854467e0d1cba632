//! Transport network model.
//!
//! A [`TransportNetwork`] is a typed multigraph: stations are nodes, and each
//! adjacent station pair on a route contributes one directed travel segment
//! tagged with its `(line, route)`. The topology is built once from a
//! [`NetworkLayout`] and never changes; only station passenger counters and
//! segment travel times are mutable afterwards.
//!
//! Construction is total: any invariant violation fails the whole build and
//! no partial network is exposed.

pub mod layout;

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

pub use layout::{NetworkLayout, PassengerEvent, PassengerEventKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("unknown station: {0}")]
    UnknownStation(String),
    #[error("duplicate station: {0}")]
    DuplicateStation(String),
    #[error("duplicate line: {0}")]
    DuplicateLine(String),
    #[error("duplicate route {1} on line {0}")]
    DuplicateRoute(String, String),
    #[error("invalid route {0}: {1}")]
    InvalidRoute(String, String),
    #[error("no travel segment from {0} to {1}")]
    EdgeNotFound(String, String),
}

/// A directed travel segment to an adjacent station on one specific route.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    line_id: String,
    route_id: String,
    to: String,
    travel_time: u32,
}

#[derive(Debug, Clone)]
struct StationNode {
    name: String,
    passenger_count: i64,
    edges: Vec<Edge>,
}

#[derive(Debug, Clone)]
struct Route {
    stations: Vec<String>,
}

#[derive(Debug, Clone)]
struct Line {
    name: String,
    routes: HashMap<String, Route>,
}

/// In-memory model of the transport network.
#[derive(Debug, Clone, Default)]
pub struct TransportNetwork {
    stations: HashMap<String, StationNode>,
    lines: HashMap<String, Line>,
    // station id -> (line id, route id) pairs serving it, kept sorted so
    // queries that pick "a" route are deterministic.
    routes_at_station: HashMap<String, BTreeSet<(String, String)>>,
}

impl TransportNetwork {
    /// Build the network from a layout document: stations first, then lines
    /// with their routes (which define the travel segments), then the travel
    /// times. Any unknown station, duplicate id or malformed route fails the
    /// whole construction.
    pub fn from_layout(layout: &NetworkLayout) -> Result<Self, NetworkError> {
        let mut network = Self::default();
        for station in &layout.stations {
            network.add_station(&station.station_id, &station.name)?;
        }
        for line in &layout.lines {
            network.add_line(line)?;
        }
        for record in &layout.travel_times {
            network.apply_travel_time_record(record)?;
        }
        Ok(network)
    }

    /// Current net passenger count at a station. Counts can go negative: they
    /// are a net delta, not a capacity.
    pub fn passenger_count(&self, station_id: &str) -> Result<i64, NetworkError> {
        self.stations
            .get(station_id)
            .map(|s| s.passenger_count)
            .ok_or_else(|| NetworkError::UnknownStation(station_id.to_string()))
    }

    /// Apply a passenger event: +1 for a tap-in, -1 for a tap-out. Events for
    /// stations outside the network are rejected without any mutation.
    pub fn record_passenger_event(&mut self, event: &PassengerEvent) -> Result<(), NetworkError> {
        let station = self
            .stations
            .get_mut(&event.station_id)
            .ok_or_else(|| NetworkError::UnknownStation(event.station_id.clone()))?;
        match event.kind {
            PassengerEventKind::In => station.passenger_count += 1,
            PassengerEventKind::Out => station.passenger_count -= 1,
        }
        Ok(())
    }

    /// All `(line id, route id)` pairs whose route passes through the
    /// station. Empty when the station is unknown or unserved.
    pub fn routes_serving_station(&self, station_id: &str) -> Vec<(String, String)> {
        self.routes_at_station
            .get(station_id)
            .map(|routes| routes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Overwrite the travel time of the segment `from -> to` on the given
    /// route. Never creates a segment.
    pub fn set_travel_time(
        &mut self,
        from: &str,
        to: &str,
        line_id: &str,
        route_id: &str,
        travel_time: u32,
    ) -> Result<(), NetworkError> {
        let station = self
            .stations
            .get_mut(from)
            .ok_or_else(|| NetworkError::UnknownStation(from.to_string()))?;
        let edge = station
            .edges
            .iter_mut()
            .find(|e| e.to == to && e.line_id == line_id && e.route_id == route_id)
            .ok_or_else(|| NetworkError::EdgeNotFound(from.to_string(), to.to_string()))?;
        edge.travel_time = travel_time;
        Ok(())
    }

    /// Travel time from `from` to `to` along some route serving both, in the
    /// route's declared direction. Returns 0 when no single route connects
    /// them that way.
    pub fn travel_time(&self, from: &str, to: &str) -> u32 {
        let Some(routes) = self.routes_at_station.get(from) else {
            return 0;
        };
        for (line_id, route_id) in routes {
            if let Some(total) = self.segment_sum(line_id, route_id, from, to) {
                return total;
            }
        }
        0
    }

    /// Travel time from `from` to `to` along one specific route, in the
    /// route's declared direction. Returns 0 when `to` does not follow
    /// `from` on that route.
    pub fn route_travel_time(&self, line_id: &str, route_id: &str, from: &str, to: &str) -> u32 {
        self.segment_sum(line_id, route_id, from, to).unwrap_or(0)
    }

    fn add_station(&mut self, station_id: &str, name: &str) -> Result<(), NetworkError> {
        if self.stations.contains_key(station_id) {
            return Err(NetworkError::DuplicateStation(station_id.to_string()));
        }
        self.stations.insert(
            station_id.to_string(),
            StationNode {
                name: name.to_string(),
                passenger_count: 0,
                edges: Vec::new(),
            },
        );
        Ok(())
    }

    fn add_line(&mut self, record: &layout::LineRecord) -> Result<(), NetworkError> {
        if self.lines.contains_key(&record.line_id) {
            return Err(NetworkError::DuplicateLine(record.line_id.clone()));
        }
        let mut line = Line {
            name: record.name.clone(),
            routes: HashMap::new(),
        };
        for route in &record.routes {
            if line.routes.contains_key(&route.route_id) {
                return Err(NetworkError::DuplicateRoute(
                    record.line_id.clone(),
                    route.route_id.clone(),
                ));
            }
            self.check_route(route)?;
            for pair in route.route_stations.windows(2) {
                let station = self
                    .stations
                    .get_mut(&pair[0])
                    .ok_or_else(|| NetworkError::UnknownStation(pair[0].clone()))?;
                station.edges.push(Edge {
                    line_id: record.line_id.clone(),
                    route_id: route.route_id.clone(),
                    to: pair[1].clone(),
                    travel_time: 0,
                });
            }
            for station_id in &route.route_stations {
                self.routes_at_station
                    .entry(station_id.clone())
                    .or_default()
                    .insert((record.line_id.clone(), route.route_id.clone()));
            }
            line.routes.insert(
                route.route_id.clone(),
                Route {
                    stations: route.route_stations.clone(),
                },
            );
        }
        self.lines.insert(record.line_id.clone(), line);
        Ok(())
    }

    fn check_route(&self, route: &layout::RouteRecord) -> Result<(), NetworkError> {
        let stations = &route.route_stations;
        if stations.len() < 2 {
            return Err(NetworkError::InvalidRoute(
                route.route_id.clone(),
                "a route needs at least two stations".to_string(),
            ));
        }
        if stations.first() != Some(&route.start_station_id)
            || stations.last() != Some(&route.end_station_id)
        {
            return Err(NetworkError::InvalidRoute(
                route.route_id.clone(),
                "route endpoints do not match the station sequence".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for station_id in stations {
            if !self.stations.contains_key(station_id) {
                return Err(NetworkError::UnknownStation(station_id.clone()));
            }
            if !seen.insert(station_id) {
                return Err(NetworkError::InvalidRoute(
                    route.route_id.clone(),
                    format!("station {} appears twice", station_id),
                ));
            }
        }
        Ok(())
    }

    /// The layout scopes travel times to station pairs, so a record applies
    /// to every parallel segment between the two stations, in both
    /// directions. A record for a pair with no segment at all fails the
    /// build: travel times overwrite, they never create.
    fn apply_travel_time_record(
        &mut self,
        record: &layout::TravelTimeRecord,
    ) -> Result<(), NetworkError> {
        if !self.stations.contains_key(&record.start_station_id) {
            return Err(NetworkError::UnknownStation(record.start_station_id.clone()));
        }
        if !self.stations.contains_key(&record.end_station_id) {
            return Err(NetworkError::UnknownStation(record.end_station_id.clone()));
        }
        let mut touched = 0;
        for (a, b) in [
            (&record.start_station_id, &record.end_station_id),
            (&record.end_station_id, &record.start_station_id),
        ] {
            if let Some(station) = self.stations.get_mut(a) {
                for edge in station.edges.iter_mut().filter(|e| &e.to == b) {
                    edge.travel_time = record.travel_time;
                    touched += 1;
                }
            }
        }
        if touched == 0 {
            return Err(NetworkError::EdgeNotFound(
                record.start_station_id.clone(),
                record.end_station_id.clone(),
            ));
        }
        Ok(())
    }

    /// Sum of segment times from `from` to `to` along the route's declared
    /// direction; `None` when the route does not connect them that way.
    fn segment_sum(&self, line_id: &str, route_id: &str, from: &str, to: &str) -> Option<u32> {
        let route = self.lines.get(line_id)?.routes.get(route_id)?;
        let start = route.stations.iter().position(|s| s == from)?;
        let end = route.stations.iter().position(|s| s == to)?;
        if start >= end {
            return None;
        }
        let mut total = 0;
        for pair in route.stations[start..=end].windows(2) {
            let edge = self
                .stations
                .get(&pair[0])?
                .edges
                .iter()
                .find(|e| e.to == pair[1] && e.line_id == line_id && e.route_id == route_id)?;
            total += edge.travel_time;
        }
        Some(total)
    }

    /// Display name of a station, if it exists.
    pub fn station_name(&self, station_id: &str) -> Option<&str> {
        self.stations.get(station_id).map(|s| s.name.as_str())
    }
}
