use super::{RouteError, RouteGeometry};
use crate::geometry::{Position, RawPath};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct GraphHopperResponse {
    #[serde(default)]
    paths: Vec<GraphHopperPath>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphHopperPath {
    points: Option<RouteGeometry>,
}

/// `GET {base}/route?point=lat,lon&point=lat,lon&profile=...`
pub fn request_url(
    base: &str,
    profile: &str,
    from: Position,
    to: Position,
) -> Result<Url, RouteError> {
    Url::parse_with_params(
        &format!("{}/route", base),
        &[
            ("point", format!("{},{}", from.lat, from.lon)),
            ("point", format!("{},{}", to.lat, to.lon)),
            ("profile", profile.to_string()),
            ("points_encoded", String::from("false")),
            ("locale", String::from("en")),
        ],
    )
    .map_err(|e| RouteError::Url(e.to_string()))
}

/// Geometry of the first path in a GraphHopper `/route` response.
pub fn decode(body: &[u8]) -> Result<RawPath, RouteError> {
    let response: GraphHopperResponse =
        serde_json::from_slice(body).map_err(|e| RouteError::Decode(e.to_string()))?;

    match response.paths.into_iter().next() {
        Some(GraphHopperPath {
            points: Some(points),
        }) => points.into_path(),
        Some(GraphHopperPath { points: None }) => Err(RouteError::NoRoute),
        None => match response.message {
            Some(message) => Err(RouteError::Rejected(message)),
            None => Err(RouteError::NoRoute),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_point_query() {
        let url = request_url(
            "http://localhost:8989",
            "car",
            Position::new(51.5, -0.1),
            Position::new(51.5001, -0.1005),
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:8989/route?point=51.5%2C-0.1&point=51.5001%2C-0.1005&profile=car&points_encoded=false&locale=en"
        );
    }

    #[test]
    fn decodes_unencoded_points() {
        let body = br#"{
            "hints": {"visited_nodes.sum": 12},
            "paths": [{
                "distance": 41.2,
                "time": 7100,
                "points_encoded": false,
                "points": {
                    "type": "LineString",
                    "coordinates": [[-0.1, 51.5], [-0.10025, 51.50005], [-0.1005, 51.5001]]
                }
            }]
        }"#;

        let path = decode(body).unwrap();

        assert_eq!(
            path,
            vec![
                Position::new(51.5, -0.1),
                Position::new(51.50005, -0.10025),
                Position::new(51.5001, -0.1005),
            ]
        );
    }

    #[test]
    fn decodes_encoded_points() {
        let body = br#"{"paths": [{"points_encoded": true, "points": "_p~iF~ps|U_ulLnnqC_mqNvxq`@"}]}"#;

        let path = decode(body).unwrap();

        assert_eq!(path.len(), 3);
        assert!((path[0].lat - 38.5).abs() < 1e-6);
        assert!((path[0].lon + 120.2).abs() < 1e-6);
    }

    #[test]
    fn error_message_is_rejected() {
        let body = br#"{"message": "Point 0 is out of bounds: 51.5,-0.1"}"#;

        assert!(matches!(decode(body), Err(RouteError::Rejected(_))));
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        assert!(matches!(decode(b"<html>"), Err(RouteError::Decode(_))));
    }
}
