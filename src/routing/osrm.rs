use super::{RouteError, RouteGeometry};
use crate::geometry::{Position, RawPath};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: Option<RouteGeometry>,
}

/// `GET {base}/route/v1/{profile}/{lon},{lat};{lon},{lat}`. OSRM takes longitude first.
pub fn request_url(
    base: &str,
    profile: &str,
    from: Position,
    to: Position,
) -> Result<Url, RouteError> {
    let mut url = Url::parse(&format!(
        "{}/route/v1/{}/{},{};{},{}",
        base, profile, from.lon, from.lat, to.lon, to.lat
    ))
    .map_err(|e| RouteError::Url(e.to_string()))?;

    url.query_pairs_mut()
        .append_pair("overview", "full")
        .append_pair("geometries", "polyline");

    Ok(url)
}

pub fn decode(body: &[u8]) -> Result<RawPath, RouteError> {
    let response: OsrmResponse =
        serde_json::from_slice(body).map_err(|e| RouteError::Decode(e.to_string()))?;

    if response.code != "Ok" {
        return Err(RouteError::Rejected(match response.message {
            Some(message) => format!("{}: {}", response.code, message),
            None => response.code,
        }));
    }

    match response.routes.into_iter().next() {
        Some(OsrmRoute {
            geometry: Some(geometry),
        }) => geometry.into_path(),
        _ => Err(RouteError::NoRoute),
    }
}
