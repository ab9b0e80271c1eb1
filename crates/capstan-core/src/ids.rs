//! Identifiers for runs and job instances.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Identity of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let uuid_str = s.strip_prefix("run_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(uuid_str)?))
    }
}

/// Identity of one concrete job instance: the template name plus its matrix
/// coordinate tuple, in axis declaration order.
///
/// Two instances of the same template differ only in coordinates, so the
/// ordered pairs are part of the identity. Displays as
/// `name (axis=value, axis=value)`, or the bare name for an empty matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    job: String,
    coords: Vec<(String, String)>,
}

impl InstanceId {
    pub fn new(job: impl Into<String>, coords: Vec<(String, String)>) -> Self {
        Self {
            job: job.into(),
            coords,
        }
    }

    /// The bare job template name.
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Matrix coordinates in axis declaration order.
    pub fn coords(&self) -> &[(String, String)] {
        &self.coords
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.coords.is_empty() {
            return write!(f, "{}", self.job);
        }
        let parts: Vec<String> = self
            .coords
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{} ({})", self.job, parts.join(", "))
    }
}

impl std::str::FromStr for InstanceId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(" (") {
            None => Ok(Self::new(s, vec![])),
            Some((job, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| format!("unclosed coordinate list in '{}'", s))?;
                let mut coords = Vec::new();
                for pair in inner.split(", ") {
                    let (k, v) = pair
                        .split_once('=')
                        .ok_or_else(|| format!("bad coordinate '{}' in '{}'", pair, s))?;
                    coords.push((k.to_string(), v.to_string()));
                }
                Ok(Self::new(job, coords))
            }
        }
    }
}

// Serialized as the display string so instance ids can key JSON maps.
impl Serialize for InstanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        assert!(s.starts_with("run_"));
        let parsed: RunId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn instance_id_display() {
        let bare = InstanceId::new("lint", vec![]);
        assert_eq!(bare.to_string(), "lint");

        let id = InstanceId::new(
            "test",
            vec![
                ("os".to_string(), "linux".to_string()),
                ("toolchain".to_string(), "stable".to_string()),
            ],
        );
        assert_eq!(id.to_string(), "test (os=linux, toolchain=stable)");
    }

    #[test]
    fn instance_id_parse_roundtrip() {
        let id = InstanceId::new(
            "test",
            vec![("toolchain".to_string(), "1.64.0".to_string())],
        );
        let parsed: InstanceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn coordinate_order_is_part_of_identity() {
        let a = InstanceId::new(
            "t",
            vec![
                ("x".to_string(), "1".to_string()),
                ("y".to_string(), "2".to_string()),
            ],
        );
        let b = InstanceId::new(
            "t",
            vec![
                ("y".to_string(), "2".to_string()),
                ("x".to_string(), "1".to_string()),
            ],
        );
        assert_ne!(a, b);
    }
}
