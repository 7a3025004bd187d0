//! Partition specs: the versioned mapping from table columns to partition columns.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::schema::{Schema, StructField, StructType};
use crate::{Error, FieldId, FloeResult};

/// How a source column is transformed into a partition value.
///
/// Only identity-transformed partition fields participate in pruning and residual collapse; a
/// value produced by any other transform cannot be compared against row-filter literals, so
/// evaluators treat those fields as unknown.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Transform {
    Identity,
    Void,
}

/// One field of a partition spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    /// Id of the table schema field this partition field is derived from.
    pub source_id: FieldId,
    pub name: String,
    pub transform: Transform,
}

impl PartitionField {
    pub fn identity(source_id: FieldId, name: impl Into<String>) -> Self {
        Self {
            source_id,
            name: name.into(),
            transform: Transform::Identity,
        }
    }
}

/// An ordered list of [`PartitionField`]s with a stable id. Manifest entries written under a spec
/// carry one partition value per field, in spec order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub spec_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn new(spec_id: i32, fields: impl IntoIterator<Item = PartitionField>) -> Self {
        Self {
            spec_id,
            fields: fields.into_iter().collect(),
        }
    }

    pub fn unpartitioned(spec_id: i32) -> Self {
        Self {
            spec_id,
            fields: vec![],
        }
    }

    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the identity partition field derived from `source_id`, if any. This is the
    /// index into both partition tuples and manifest partition summaries.
    pub fn identity_position_for(&self, source_id: FieldId) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.source_id == source_id && f.transform == Transform::Identity)
    }

    /// Derives the struct type of partition tuples written under this spec. Fails if a source
    /// field is missing from `schema`.
    pub fn partition_type(&self, schema: &Schema) -> FloeResult<StructType> {
        self.fields
            .iter()
            .map(|field| {
                let source = schema.field_by_id(field.source_id).ok_or_else(|| {
                    Error::validation(format!(
                        "Partition field '{}' references unknown source field {} in schema: {schema}",
                        field.name, field.source_id
                    ))
                })?;
                Ok(StructField::optional(
                    source.id,
                    field.name.clone(),
                    source.field_type,
                ))
            })
            .collect()
    }

    pub fn to_json(&self) -> FloeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> FloeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Display for PartitionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "spec#{}[", self.spec_id)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}({})={}", field.transform, field.source_id, field.name)?;
        }
        write!(f, "]")
    }
}
