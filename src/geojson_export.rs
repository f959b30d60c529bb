use crate::geometry::{Position, VehicleId};
use crate::snapshot::Snapshot;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};

fn lon_lat(position: &Position) -> Vec<f64> {
    vec![position.lon, position.lat]
}

fn vehicle_feature(vehicle_id: &VehicleId, geometry: Geometry) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("vehicle_id".to_string(), vehicle_id.clone().into());

    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: Some(geojson::feature::Id::String(vehicle_id.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// One LineString per vehicle trail.
pub fn snapshot_to_feature_collection(snapshot: &Snapshot) -> GeoJson {
    let features = snapshot
        .paths
        .iter()
        .map(|(vehicle_id, path)| {
            let line = path.iter().map(lon_lat).collect();
            vehicle_feature(vehicle_id, Geometry::new(Value::LineString(line)))
        })
        .collect();

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

/// One Point per vehicle, at the position of the poll behind `snapshot`.
pub fn positions_to_feature_collection(snapshot: &Snapshot) -> GeoJson {
    let features = snapshot
        .positions
        .iter()
        .map(|(vehicle_id, position)| {
            vehicle_feature(vehicle_id, Geometry::new(Value::Point(lon_lat(position))))
        })
        .collect();

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::empty(Utc::now());
        snapshot.paths.insert(
            String::from("1_2_bus7"),
            vec![Position::new(51.5, -0.1), Position::new(51.5001, -0.1005)],
        );
        snapshot
            .positions
            .insert(String::from("1_2_bus7"), Position::new(51.5001, -0.1005));
        snapshot
            .positions
            .insert(String::from("3_4_bus8"), Position::new(52.0, -1.0));
        snapshot
    }

    #[test]
    fn trails_are_lon_lat_linestrings() {
        let GeoJson::FeatureCollection(collection) = snapshot_to_feature_collection(&snapshot())
        else {
            panic!("expected a feature collection");
        };

        assert_eq!(collection.features.len(), 1);
        let feature = &collection.features[0];
        assert_eq!(
            feature.property("vehicle_id").and_then(|v| v.as_str()),
            Some("1_2_bus7")
        );
        assert_eq!(
            feature.geometry.as_ref().map(|g| g.value.clone()),
            Some(Value::LineString(vec![
                vec![-0.1, 51.5],
                vec![-0.1005, 51.5001]
            ]))
        );
    }

    #[test]
    fn every_polled_vehicle_is_a_point() {
        let GeoJson::FeatureCollection(collection) = positions_to_feature_collection(&snapshot())
        else {
            panic!("expected a feature collection");
        };

        assert_eq!(collection.features.len(), 2);
        assert_eq!(
            collection.features[1].geometry.as_ref().map(|g| g.value.clone()),
            Some(Value::Point(vec![-1.0, 52.0]))
        );
    }

    #[test]
    fn serialises_as_geojson_text() {
        let text = snapshot_to_feature_collection(&snapshot()).to_string();

        assert!(text.contains(r#""type":"FeatureCollection""#));
        assert!(text.contains(r#""coordinates":[[-0.1,51.5],[-0.1005,51.5001]]"#));
    }
}
