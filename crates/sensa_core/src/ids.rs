use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{SensaError, SensaResult};

pub const MAX_TYPE_NAME_LEN: usize = 40;
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 64;
pub const MAX_ENTITY_ID_LEN: usize = 64;
pub const QUALIFIED_ID_SEPARATOR: char = ':';

/// Payload keys and implicit type-table columns that can never be attributes.
pub const RESERVED_NAMES: [&str; 4] = ["id", "type", "entity_id", "timestamp"];

/// Case-normalized entity type name. Safe to interpolate into DDL.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeName(String);

impl TypeName {
    pub fn parse(raw: &str) -> SensaResult<Self> {
        let name = raw.trim().to_ascii_lowercase();
        if name.is_empty() || name.len() > MAX_TYPE_NAME_LEN {
            return Err(SensaError::validation(format!(
                "type name must be 1..={MAX_TYPE_NAME_LEN} characters"
            )));
        }
        let mut chars = name.chars();
        let leading_alpha = chars.next().is_some_and(|ch| ch.is_ascii_lowercase());
        if !leading_alpha
            || !chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
        {
            return Err(SensaError::validation(format!(
                "invalid type name '{raw}': use letters, digits and '_' starting with a letter"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cased attribute name; also the column name. `Temp` and `temp` name
/// the same attribute.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AttributeName(String);

impl AttributeName {
    pub fn parse(raw: &str) -> SensaResult<Self> {
        if raw.is_empty() || raw.len() > MAX_ATTRIBUTE_NAME_LEN {
            return Err(SensaError::validation(format!(
                "attribute name must be 1..={MAX_ATTRIBUTE_NAME_LEN} characters"
            )));
        }
        let mut chars = raw.chars();
        let leading = chars
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');
        if !leading || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(SensaError::validation(format!(
                "invalid attribute name '{raw}': use letters, digits and '_'"
            )));
        }
        if is_reserved(raw) {
            return Err(SensaError::validation(format!(
                "attribute name '{raw}' is reserved"
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Identity of an entity: unique id within its type.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntityRef {
    pub entity_type: TypeName,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: &str, id: &str) -> SensaResult<Self> {
        Ok(Self {
            entity_type: TypeName::parse(entity_type)?,
            id: validate_entity_id(id)?,
        })
    }

    /// Splits `"<type>:<id>"` at the first separator.
    pub fn parse_qualified(raw: &str) -> SensaResult<Self> {
        let (entity_type, id) = raw.split_once(QUALIFIED_ID_SEPARATOR).ok_or_else(|| {
            SensaError::validation(format!(
                "entity identifier '{raw}' must have the form <type>:<id>"
            ))
        })?;
        Self::new(entity_type, id)
    }

    pub fn qualified(&self) -> String {
        format!("{}{QUALIFIED_ID_SEPARATOR}{}", self.entity_type, self.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{QUALIFIED_ID_SEPARATOR}{}", self.entity_type, self.id)
    }
}

impl Serialize for EntityRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.qualified())
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        EntityRef::parse_qualified(&value).map_err(serde::de::Error::custom)
    }
}

fn validate_entity_id(raw: &str) -> SensaResult<String> {
    if raw.trim().is_empty() || raw.len() > MAX_ENTITY_ID_LEN {
        return Err(SensaError::validation(format!(
            "entity id must be 1..={MAX_ENTITY_ID_LEN} non-blank characters"
        )));
    }
    if raw.chars().any(char::is_control) {
        return Err(SensaError::validation(
            "entity id must not contain control characters",
        ));
    }
    Ok(raw.to_string())
}
