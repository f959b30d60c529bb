//! Client for the external routing engine.
//!
//! One request per vehicle: previous position to current position, returning
//! the engine's route geometry as a [`RawPath`].

pub mod graphhopper;
pub mod osrm;

use crate::geometry::{Position, RawPath};
use async_trait::async_trait;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Precision of encoded polylines returned by both engines.
pub const POLYLINE_PRECISION: u32 = 5;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("routing request timed out after {0:?}")]
    Timeout(Duration),
    #[error("routing engine returned HTTP {0}")]
    Status(u16),
    #[error("routing request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("could not decode route: {0}")]
    Decode(String),
    #[error("routing engine rejected the request: {0}")]
    Rejected(String),
    #[error("routing engine returned no route")]
    NoRoute,
    #[error("could not build routing url: {0}")]
    Url(String),
    #[error("routing task ended before completing: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait RouteClient: Send + Sync {
    async fn route(&self, from: Position, to: Position) -> Result<RawPath, RouteError>;
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingEngine {
    #[default]
    #[serde(rename = "graphhopper")]
    GraphHopper,
    #[serde(rename = "osrm")]
    Osrm,
}

impl RoutingEngine {
    pub fn default_profile(&self) -> &'static str {
        match self {
            RoutingEngine::GraphHopper => "car",
            RoutingEngine::Osrm => "driving",
        }
    }
}

impl FromStr for RoutingEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "graphhopper" => Ok(RoutingEngine::GraphHopper),
            "osrm" => Ok(RoutingEngine::Osrm),
            other => Err(format!("expected graphhopper or osrm, got {other}")),
        }
    }
}

/// Route geometry as either engine may return it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RouteGeometry {
    /// Google encoded polyline.
    Encoded(String),
    /// GeoJSON style `[lon, lat]` (optionally with elevation) coordinate list.
    LineString { coordinates: Vec<Vec<f64>> },
}

impl RouteGeometry {
    pub(crate) fn into_path(self) -> Result<RawPath, RouteError> {
        let path: RawPath = match self {
            RouteGeometry::Encoded(encoded) => {
                polyline::decode_polyline(&encoded, POLYLINE_PRECISION)
                    .map_err(|e| RouteError::Decode(e.to_string()))?
                    .0
                    .into_iter()
                    .map(|coord| Position::new(coord.y, coord.x))
                    .collect()
            }
            RouteGeometry::LineString { coordinates } => coordinates
                .into_iter()
                .map(|coordinate| match coordinate.as_slice() {
                    [lon, lat, ..] => Ok(Position::new(*lat, *lon)),
                    _ => Err(RouteError::Decode(format!(
                        "coordinate with {} values",
                        coordinate.len()
                    ))),
                })
                .collect::<Result<_, _>>()?,
        };

        if path.is_empty() {
            return Err(RouteError::NoRoute);
        }

        Ok(path)
    }
}

/// [`RouteClient`] talking HTTP to a GraphHopper or OSRM instance.
#[derive(Clone)]
pub struct HttpRouteClient {
    client: reqwest::Client,
    engine: RoutingEngine,
    base_url: String,
    profile: String,
    timeout: Duration,
}

impl HttpRouteClient {
    pub fn new(
        client: reqwest::Client,
        engine: RoutingEngine,
        base_url: &Url,
        profile: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            engine,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            profile: profile.into(),
            timeout,
        }
    }

    pub fn request_url(&self, from: Position, to: Position) -> Result<Url, RouteError> {
        match self.engine {
            RoutingEngine::GraphHopper => {
                graphhopper::request_url(&self.base_url, &self.profile, from, to)
            }
            RoutingEngine::Osrm => osrm::request_url(&self.base_url, &self.profile, from, to),
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> RouteError {
        if error.is_timeout() {
            RouteError::Timeout(self.timeout)
        } else {
            RouteError::Transport(error)
        }
    }
}

#[async_trait]
impl RouteClient for HttpRouteClient {
    async fn route(&self, from: Position, to: Position) -> Result<RawPath, RouteError> {
        let url = self.request_url(from, to)?;

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouteError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        match self.engine {
            RoutingEngine::GraphHopper => graphhopper::decode(&body),
            RoutingEngine::Osrm => osrm::decode(&body),
        }
    }
}
