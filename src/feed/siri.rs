//! SIRI-VM vehicle activity parsing.
//!
//! Elements are matched on their local name, so documents using the default
//! namespace and documents using a `siri:` prefix both parse.

use super::{FeedError, VehicleIdPolicy};
use crate::geometry::{Position, PositionSet, VehicleId};
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use thiserror::Error;

/// A single `VehicleActivity` entry that could not be turned into a position.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("vehicle activity is missing {0}")]
    MissingField(&'static str),
    #[error("vehicle activity has an unreadable {field}: '{value}'")]
    InvalidCoordinate { field: &'static str, value: String },
    #[error("vehicle activity {0} is outside WGS84 bounds")]
    OutOfRange(VehicleId),
}

/// The closed set of record layouts seen in SIRI-VM feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityShape {
    /// `OriginRef`, `DestinationRef` and `VehicleRef` all present.
    Journey {
        origin: String,
        destination: String,
        vehicle: String,
    },
    /// Only `VehicleRef` present.
    Vehicle { vehicle: String },
}

impl ActivityShape {
    pub fn vehicle_id(&self, policy: VehicleIdPolicy) -> Result<VehicleId, RecordError> {
        match (self, policy) {
            (ActivityShape::Journey { vehicle, .. }, VehicleIdPolicy::VehicleRef)
            | (ActivityShape::Vehicle { vehicle }, VehicleIdPolicy::VehicleRef) => {
                Ok(vehicle.clone())
            }
            (
                ActivityShape::Journey {
                    origin,
                    destination,
                    vehicle,
                },
                VehicleIdPolicy::Composite,
            ) => Ok(format!("{}_{}_{}", origin, destination, vehicle)),
            (ActivityShape::Vehicle { .. }, VehicleIdPolicy::Composite) => {
                Err(RecordError::MissingField("OriginRef/DestinationRef"))
            }
        }
    }
}

/// Raw text captured from one `VehicleActivity`.
#[derive(Debug, Default, Clone)]
struct ActivityFields {
    vehicle_ref: Option<String>,
    origin_ref: Option<String>,
    destination_ref: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    VehicleRef,
    OriginRef,
    DestinationRef,
    Latitude,
    Longitude,
}

impl ActivityFields {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::VehicleRef => &mut self.vehicle_ref,
            Field::OriginRef => &mut self.origin_ref,
            Field::DestinationRef => &mut self.destination_ref,
            Field::Latitude => &mut self.latitude,
            Field::Longitude => &mut self.longitude,
        }
    }

    fn shape(&self) -> Result<ActivityShape, RecordError> {
        let vehicle = non_empty(&self.vehicle_ref).ok_or(RecordError::MissingField("VehicleRef"))?;

        match (non_empty(&self.origin_ref), non_empty(&self.destination_ref)) {
            (Some(origin), Some(destination)) => Ok(ActivityShape::Journey {
                origin,
                destination,
                vehicle,
            }),
            _ => Ok(ActivityShape::Vehicle { vehicle }),
        }
    }

    fn position(&self) -> Result<Position, RecordError> {
        let lat = parse_coordinate("Latitude", &self.latitude)?;
        let lon = parse_coordinate("Longitude", &self.longitude)?;

        Ok(Position::new(lat, lon))
    }

    fn into_record(self, policy: VehicleIdPolicy) -> Result<(VehicleId, Position), RecordError> {
        let vehicle_id = self.shape()?.vehicle_id(policy)?;
        let position = self.position()?;

        if !position.is_valid() {
            return Err(RecordError::OutOfRange(vehicle_id));
        }

        Ok((vehicle_id, position))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn parse_coordinate(field: &'static str, value: &Option<String>) -> Result<f64, RecordError> {
    let raw = non_empty(value).ok_or(RecordError::MissingField(field))?;

    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(RecordError::InvalidCoordinate { field, value: raw })
}

/// Result of parsing one feed document.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub positions: PositionSet,
    pub activities: usize,
    pub skipped: Vec<RecordError>,
    pub duplicates: usize,
}

/// Extracts one position per vehicle from a SIRI-VM document.
///
/// Malformed `VehicleActivity` entries are collected in [`ParsedFeed::skipped`];
/// only a document that is not well-formed XML fails the whole parse.
pub fn parse_vehicle_activities(
    xml: &[u8],
    policy: VehicleIdPolicy,
) -> Result<ParsedFeed, FeedError> {
    let mut reader = Reader::from_reader(xml);

    let mut parsed = ParsedFeed::default();
    let mut buf = Vec::new();

    let mut activity: Option<ActivityFields> = None;
    let mut location_depth = 0usize;
    let mut current_field: Option<Field> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| FeedError::Xml(format!("at byte {}: {}", reader.error_position(), e)))?;

        match event {
            Event::Start(element) => {
                let name = element.local_name();
                match name.as_ref() {
                    b"VehicleActivity" => {
                        activity = Some(ActivityFields::default());
                        location_depth = 0;
                        current_field = None;
                    }
                    b"VehicleLocation" if activity.is_some() => location_depth += 1,
                    other if activity.is_some() => {
                        text.clear();
                        current_field = match other {
                            b"VehicleRef" => Some(Field::VehicleRef),
                            b"OriginRef" => Some(Field::OriginRef),
                            b"DestinationRef" => Some(Field::DestinationRef),
                            b"Latitude" if location_depth > 0 => Some(Field::Latitude),
                            b"Longitude" if location_depth > 0 => Some(Field::Longitude),
                            _ => None,
                        };
                    }
                    _ => {}
                }
            }
            Event::Text(chunk) if current_field.is_some() => {
                let decoded = chunk.decode().map_err(|e| FeedError::Xml(e.to_string()))?;
                text.push_str(&decoded);
            }
            Event::CData(chunk) if current_field.is_some() => {
                let decoded = chunk.decode().map_err(|e| FeedError::Xml(e.to_string()))?;
                text.push_str(&decoded);
            }
            Event::GeneralRef(reference) if current_field.is_some() => {
                push_reference(&mut text, &reference)?;
            }
            Event::End(element) => {
                let name = element.local_name();
                match name.as_ref() {
                    b"VehicleActivity" => {
                        if let Some(fields) = activity.take() {
                            parsed.activities += 1;
                            match fields.into_record(policy) {
                                Ok((vehicle_id, position)) => {
                                    if parsed.positions.insert(vehicle_id, position).is_some() {
                                        parsed.duplicates += 1;
                                    }
                                }
                                Err(record_error) => parsed.skipped.push(record_error),
                            }
                        }
                        current_field = None;
                    }
                    b"VehicleLocation" => location_depth = location_depth.saturating_sub(1),
                    _ => {
                        if let (Some(fields), Some(field)) = (activity.as_mut(), current_field.take())
                        {
                            let slot = fields.slot(field);
                            // the first occurrence of a field wins
                            if slot.is_none() {
                                *slot = Some(std::mem::take(&mut text));
                            }
                        }
                        text.clear();
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    Ok(parsed)
}

/// Appends the text an entity or character reference stands for. Unknown
/// entities are kept as written.
fn push_reference(text: &mut String, reference: &BytesRef<'_>) -> Result<(), FeedError> {
    if let Some(ch) = reference
        .resolve_char_ref()
        .map_err(|e| FeedError::Xml(e.to_string()))?
    {
        text.push(ch);
        return Ok(());
    }

    let name = reference
        .decode()
        .map_err(|e| FeedError::Xml(e.to_string()))?;

    match resolve_predefined_entity(&name) {
        Some(resolved) => text.push_str(resolved),
        None => {
            text.push('&');
            text.push_str(&name);
            text.push(';');
        }
    }

    Ok(())
}
