//! Replicated entities.

use crate::checksum::checksum;
use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain fields of an entity, opaque to the sync engine.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Wire names of the envelope. Domain fields share the entity's JSON object,
/// so they may not use these keys.
pub const ENVELOPE_FIELDS: [&str; 6] = [
    "id",
    "rev",
    "updatedBy",
    "updatedAt",
    "checksum",
    "deletedAt",
];

/// Checks that `fields` uses no key reserved for the envelope.
pub fn check_fields(fields: &Payload) -> ProtocolResult<()> {
    match ENVELOPE_FIELDS.iter().find(|key| fields.contains_key(**key)) {
        Some(key) => Err(ProtocolError::InvalidPayload(format!(
            "field `{key}` is reserved for the entity envelope"
        ))),
        None => Ok(()),
    }
}

/// The replica that authored a write.
///
/// Variants are declared in ascending tie-break order, so `Cloud > Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The on-premises replica.
    Local,
    /// The hosted replica.
    Cloud,
}

impl Origin {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Cloud => "cloud",
        }
    }

    /// Returns the other replica.
    pub fn peer(&self) -> Self {
        match self {
            Origin::Local => Origin::Cloud,
            Origin::Cloud => Origin::Local,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Origin::Local),
            "cloud" => Ok(Origin::Cloud),
            other => Err(ProtocolError::UnknownOrigin(other.to_string())),
        }
    }
}

/// The unit of replication.
///
/// The envelope fields are what the engine reasons about; everything else is
/// carried in `fields` and flattened into the same JSON object on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Stable identifier, unique within an entity kind.
    pub id: String,
    /// Revision at which this value was written.
    #[serde(default)]
    pub rev: u64,
    /// Replica that wrote this value.
    pub updated_by: Origin,
    /// Wall-clock time of the write on the origin.
    pub updated_at: DateTime<Utc>,
    /// Digest of `fields`. May be empty on the wire; receivers fill it in.
    #[serde(default)]
    pub checksum: String,
    /// Set when the entity is a tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: Payload,
}

impl Entity {
    /// Creates a live entity with its checksum computed from `fields`.
    pub fn new(
        id: impl Into<String>,
        rev: u64,
        updated_by: Origin,
        updated_at: DateTime<Utc>,
        fields: Payload,
    ) -> Self {
        let checksum = checksum(&fields);
        Self {
            id: id.into(),
            rev,
            updated_by,
            updated_at,
            checksum,
            deleted_at: None,
            fields,
        }
    }

    /// Creates an entity from a typed payload.
    pub fn from_payload<P: EntityPayload>(
        id: impl Into<String>,
        payload: &P,
        rev: u64,
        updated_by: Origin,
        updated_at: DateTime<Utc>,
    ) -> ProtocolResult<Self> {
        Ok(Self::new(id, rev, updated_by, updated_at, payload.to_fields()?))
    }

    /// Decodes the domain fields as a typed payload.
    pub fn payload<P: EntityPayload>(&self) -> ProtocolResult<P> {
        serde_json::from_value(serde_json::Value::Object(self.fields.clone()))
            .map_err(|e| ProtocolError::InvalidPayload(format!("{}: {}", P::KIND, e)))
    }

    /// Marks this value as a tombstone written at `at`.
    pub fn into_tombstone(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(at);
        self
    }

    /// Returns true if this value is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Recomputes the checksum from the domain fields.
    pub fn computed_checksum(&self) -> String {
        checksum(&self.fields)
    }

    /// Checks the carried checksum against the payload.
    ///
    /// An empty checksum is filled in rather than rejected, since peers are
    /// allowed to omit it.
    pub fn verify_checksum(&mut self) -> ProtocolResult<()> {
        let expected = self.computed_checksum();
        if self.checksum.is_empty() {
            self.checksum = expected;
            return Ok(());
        }
        if self.checksum != expected {
            return Err(ProtocolError::ChecksumMismatch {
                id: self.id.clone(),
                expected,
                actual: self.checksum.clone(),
            });
        }
        Ok(())
    }
}

/// A schema'd entity kind.
///
/// Implementors serialize to a JSON object whose keys become the entity's
/// domain fields.
pub trait EntityPayload: Serialize + DeserializeOwned {
    /// Entity kind name used in `Change::entity`.
    const KIND: &'static str;

    /// Serializes this payload into domain fields.
    fn to_fields(&self) -> ProtocolResult<Payload> {
        payload_fields(self)
    }
}

fn payload_fields<P: EntityPayload + ?Sized>(payload: &P) -> ProtocolResult<Payload> {
    match serde_json::to_value(payload)? {
        serde_json::Value::Object(map) => {
            check_fields(&map)?;
            Ok(map)
        }
        other => Err(ProtocolError::InvalidPayload(format!(
            "{} must serialize to an object, got {}",
            P::KIND,
            other
        ))),
    }
}

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Display name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Whether the product is listed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Long description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Product {
    /// Creates an enabled product with no description or category.
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            price,
            enabled: true,
            description: None,
            category_id: None,
        }
    }
}

impl EntityPayload for Product {
    const KIND: &'static str = "product";
}
