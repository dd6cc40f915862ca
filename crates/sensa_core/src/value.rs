use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::time::parse_datetime;
use crate::{SensaError, SensaResult};

/// The four primitive kinds an attribute may be declared with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "datetime")]
    Datetime,
}

impl AttributeKind {
    pub fn as_tag(self) -> &'static str {
        match self {
            AttributeKind::Str => "str",
            AttributeKind::Int => "int",
            AttributeKind::Float => "float",
            AttributeKind::Datetime => "datetime",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "str" => Some(AttributeKind::Str),
            "int" => Some(AttributeKind::Int),
            "float" => Some(AttributeKind::Float),
            "datetime" => Some(AttributeKind::Datetime),
            _ => None,
        }
    }

    /// Best-effort recovery of a kind from the type name reported by the
    /// engine catalog. Time is matched first because SQLite reports
    /// `datetime_text` for datetime columns.
    pub fn from_sql_type(sql_type: &str) -> Option<Self> {
        let lowered = sql_type.to_ascii_lowercase();
        if lowered.contains("time") || lowered.contains("date") {
            Some(AttributeKind::Datetime)
        } else if lowered.contains("char") || lowered.contains("text") || lowered.contains("clob")
        {
            Some(AttributeKind::Str)
        } else if lowered.contains("int") {
            Some(AttributeKind::Int)
        } else if ["double", "float", "real", "numeric", "decimal"]
            .iter()
            .any(|needle| lowered.contains(needle))
        {
            Some(AttributeKind::Float)
        } else {
            None
        }
    }

    /// Parses a payload value tagged with this kind.
    pub fn parse_value(self, raw: &JsonValue) -> SensaResult<AttributeValue> {
        let mismatch = || {
            SensaError::validation(format!(
                "value {raw} is not a valid {} attribute",
                self.as_tag()
            ))
        };
        match (self, raw) {
            (_, JsonValue::Null) => Err(SensaError::validation("attribute value must not be null")),
            (AttributeKind::Str, JsonValue::String(value)) => Ok(AttributeValue::Str(value.clone())),
            (AttributeKind::Str, JsonValue::Number(value)) => {
                Ok(AttributeValue::Str(value.to_string()))
            }
            (AttributeKind::Str, JsonValue::Bool(value)) => {
                Ok(AttributeValue::Str(value.to_string()))
            }
            (AttributeKind::Int, JsonValue::Number(value)) => {
                if let Some(int) = value.as_i64() {
                    return Ok(AttributeValue::Int(int));
                }
                match value.as_f64() {
                    Some(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
                        Ok(AttributeValue::Int(float as i64))
                    }
                    _ => Err(mismatch()),
                }
            }
            (AttributeKind::Int, JsonValue::String(value)) => value
                .trim()
                .parse::<i64>()
                .map(AttributeValue::Int)
                .map_err(|_| mismatch()),
            (AttributeKind::Float, JsonValue::Number(value)) => value
                .as_f64()
                .map(AttributeValue::Float)
                .ok_or_else(mismatch),
            (AttributeKind::Float, JsonValue::String(value)) => match value.trim().parse::<f64>() {
                Ok(float) if float.is_finite() => Ok(AttributeValue::Float(float)),
                _ => Err(mismatch()),
            },
            (AttributeKind::Datetime, JsonValue::String(value)) => {
                parse_datetime(value).map(AttributeValue::Datetime)
            }
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for AttributeKind {
    type Err = SensaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        AttributeKind::from_tag(value).ok_or_else(|| {
            SensaError::invalid_kind(format!(
                "'{value}' is not one of str, int, float, datetime"
            ))
        })
    }
}

/// A typed attribute reading. Serializes as `{"type": <tag>, "value": <value>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    #[serde(rename = "str")]
    Str(String),
    #[serde(rename = "int")]
    Int(i64),
    #[serde(rename = "float")]
    Float(f64),
    #[serde(rename = "datetime")]
    Datetime(NaiveDateTime),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Str(_) => AttributeKind::Str,
            AttributeValue::Int(_) => AttributeKind::Int,
            AttributeValue::Float(_) => AttributeKind::Float,
            AttributeValue::Datetime(_) => AttributeKind::Datetime,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            AttributeValue::Str(value) => JsonValue::String(value.clone()),
            AttributeValue::Int(value) => JsonValue::from(*value),
            AttributeValue::Float(value) => JsonValue::from(*value),
            AttributeValue::Datetime(value) => {
                JsonValue::String(value.format(crate::time::DATETIME_FORMAT).to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeKind, AttributeValue};
    use serde_json::json;

    #[test]
    fn tags_roundtrip_and_reject_unknown() {
        for kind in [
            AttributeKind::Str,
            AttributeKind::Int,
            AttributeKind::Float,
            AttributeKind::Datetime,
        ] {
            assert_eq!(AttributeKind::from_tag(kind.as_tag()), Some(kind));
        }
        assert!("bool".parse::<AttributeKind>().is_err());
        assert!("FLOAT".parse::<AttributeKind>().is_err());
    }

    #[test]
    fn sql_types_map_back_to_kinds() {
        assert_eq!(
            AttributeKind::from_sql_type("varchar(255)"),
            Some(AttributeKind::Str)
        );
        assert_eq!(
            AttributeKind::from_sql_type("character varying"),
            Some(AttributeKind::Str)
        );
        assert_eq!(AttributeKind::from_sql_type("bigint"), Some(AttributeKind::Int));
        assert_eq!(
            AttributeKind::from_sql_type("double precision"),
            Some(AttributeKind::Float)
        );
        assert_eq!(
            AttributeKind::from_sql_type("datetime_text"),
            Some(AttributeKind::Datetime)
        );
        assert_eq!(
            AttributeKind::from_sql_type("timestamp without time zone"),
            Some(AttributeKind::Datetime)
        );
        assert_eq!(AttributeKind::from_sql_type("blob"), None);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        assert_eq!(
            AttributeKind::Float.parse_value(&json!("15.0")).expect("float"),
            AttributeValue::Float(15.0)
        );
        assert_eq!(
            AttributeKind::Int.parse_value(&json!(" 28 ")).expect("int"),
            AttributeValue::Int(28)
        );
        assert_eq!(
            AttributeKind::Int.parse_value(&json!(40.0)).expect("int"),
            AttributeValue::Int(40)
        );
    }

    #[test]
    fn mismatched_values_are_rejected() {
        assert!(AttributeKind::Int.parse_value(&json!(1.5)).is_err());
        assert!(AttributeKind::Float.parse_value(&json!("warm")).is_err());
        assert!(AttributeKind::Datetime.parse_value(&json!(12)).is_err());
        assert!(AttributeKind::Str.parse_value(&json!(null)).is_err());
        assert!(AttributeKind::Str.parse_value(&json!({"nested": true})).is_err());
    }

    #[test]
    fn values_serialize_as_tagged_objects() {
        let encoded = serde_json::to_value(AttributeValue::Float(16.5)).expect("encode");
        assert_eq!(encoded, json!({"type": "float", "value": 16.5}));
        let decoded: AttributeValue =
            serde_json::from_value(json!({"type": "int", "value": 40})).expect("decode");
        assert_eq!(decoded, AttributeValue::Int(40));
    }
}
