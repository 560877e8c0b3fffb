//! Semantic checksums for attribute versions.
//!
//! The checksum is a SHA-256 hex digest over exactly the fields that define
//! what an attribute *means*: its lineage name, its type, whether it is a
//! collection, and (for choice types) the ordered value/label pairs.
//! Surrogate ids, form position and timestamps are excluded, so two attribute
//! rows created at different times under different schema versions fingerprint
//! identically when they describe the same field.

use sha2::{Digest, Sha256};

use crate::schema::Attribute;

/// Compute the semantic fingerprint for an attribute.
///
/// Stable: same semantic definition in any schema version → same digest.
pub fn attribute_checksum(attribute: &Attribute) -> String {
  let mut hasher = Sha256::new();

  hasher.update(attribute.name.as_bytes());
  hasher.update([0u8]);
  hasher.update(attribute.ty.as_str().as_bytes());
  hasher.update([0u8]);
  hasher.update([attribute.is_collection as u8]);

  // Choice order is part of the definition: reordering a vocabulary is a
  // semantic change.
  for choice in &attribute.choices {
    hasher.update([0u8]);
    hasher.update(choice.value.as_bytes());
    hasher.update([0u8]);
    hasher.update(choice.title.as_bytes());
  }

  hex::encode(hasher.finalize())
}
