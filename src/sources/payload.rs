//! Upstream JSON shapes for both agencies.
//!
//! Both APIs wrap results in a `data` field and are inconsistent about whether
//! numbers arrive as JSON numbers or numeric strings, so sequences and
//! coordinates go through lenient deserializers.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(serde_json::Number),
    Text(String),
}

fn de_sequence<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    match Lenient::deserialize(d)? {
        Lenient::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid sequence {n}"))),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid sequence {s:?}"))),
    }
}

fn de_coordinate<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Lenient::deserialize(d)? {
        Lenient::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid coordinate {n}"))),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid coordinate {s:?}"))),
    }
}

fn de_code<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Lenient::deserialize(d)? {
        Lenient::Number(n) => n.to_string(),
        Lenient::Text(s) => s,
    })
}

/// Row of the bulk stop dump.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkStop {
    pub stop: String,
    #[serde(default)]
    pub name_tc: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(deserialize_with = "de_coordinate")]
    pub lat: f64,
    #[serde(rename = "long", deserialize_with = "de_coordinate")]
    pub lon: f64,
}

/// Row of the bulk route dump; one per (route, bound, service type).
#[derive(Debug, Clone, Deserialize)]
pub struct BulkRoute {
    pub route: String,
    pub bound: String,
    #[serde(deserialize_with = "de_code")]
    pub service_type: String,
    #[serde(default)]
    pub orig_tc: String,
    #[serde(default)]
    pub orig_en: String,
    #[serde(default)]
    pub dest_tc: String,
    #[serde(default)]
    pub dest_en: String,
}

/// Row of the bulk route-stop edge dump.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkRouteStop {
    pub route: String,
    pub bound: String,
    #[serde(deserialize_with = "de_code")]
    pub service_type: String,
    #[serde(deserialize_with = "de_sequence")]
    pub seq: u32,
    pub stop: String,
}

/// Row of a per-route agency's route listing.
#[derive(Debug, Clone, Deserialize)]
pub struct AgencyRoute {
    pub route: String,
    #[serde(default)]
    pub orig_tc: String,
    #[serde(default)]
    pub orig_en: String,
    #[serde(default)]
    pub dest_tc: String,
    #[serde(default)]
    pub dest_en: String,
}

/// Row of a single route-direction stop sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct AgencyRouteStop {
    pub stop: String,
    #[serde(deserialize_with = "de_sequence")]
    pub seq: u32,
}

/// Body of a single stop detail lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct AgencyStop {
    #[serde(default)]
    pub name_tc: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(deserialize_with = "de_coordinate")]
    pub lat: f64,
    #[serde(rename = "long", deserialize_with = "de_coordinate")]
    pub lon: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_accepts_string_and_number() {
        let rows: Vec<BulkRouteStop> = serde_json::from_str(
            r#"[
                {"route":"1","bound":"O","service_type":"1","seq":"10","stop":"A"},
                {"route":"1","bound":"O","service_type":1,"seq":2,"stop":"B"}
            ]"#,
        )
        .unwrap();
        assert_eq!(rows[0].seq, 10);
        assert_eq!(rows[1].seq, 2);
        assert_eq!(rows[1].service_type, "1");
    }

    #[test]
    fn test_coordinates_accept_strings() {
        let stop: AgencyStop = serde_json::from_str(
            r#"{"stop":"001","name_tc":"中環","name_en":"Central","lat":"22.28","long":114.15}"#,
        )
        .unwrap();
        assert_eq!(stop.lat, 22.28);
        assert_eq!(stop.lon, 114.15);
    }

    #[test]
    fn test_bad_sequence_is_rejected() {
        let result: Result<AgencyRouteStop, _> =
            serde_json::from_str(r#"{"stop":"001","seq":"first"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_without_data() {
        let env: Envelope<Vec<AgencyRoute>> = serde_json::from_str(r#"{"type":"RouteList"}"#).unwrap();
        assert!(env.data.is_none());
    }
}
