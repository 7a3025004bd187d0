//! Table schemas with stable field ids.
//!
//! A [`Schema`] is the table's top-level struct type. Every field carries an id that stays stable
//! across renames; projection and predicate binding resolve names down to ids once, and everything
//! downstream of the planner works in terms of ids. Schemas serialize to a canonical JSON form
//! (declaration order, ids preserved) so that scan tasks are self-contained across process
//! boundaries.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::utils::require;
use crate::{Error, FieldId, FloeResult};

pub type Schema = StructType;
pub type SchemaRef = Arc<Schema>;

/// Primitive column types supported by the planner. Bounds and partition values are compared as
/// [`Scalar`]s of these types.
///
/// [`Scalar`]: crate::expressions::Scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    /// Days since the unix epoch.
    Date,
    /// Microseconds since the unix epoch.
    Timestamp,
    String,
    Binary,
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Date => "date",
            PrimitiveType::Timestamp => "timestamp",
            PrimitiveType::String => "string",
            PrimitiveType::Binary => "binary",
        };
        write!(f, "{s}")
    }
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub id: FieldId,
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: PrimitiveType,
}

impl StructField {
    pub fn required(id: FieldId, name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            id,
            name: name.into(),
            required: true,
            field_type,
        }
    }

    pub fn optional(id: FieldId, name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            id,
            name: name.into(),
            required: false,
            field_type,
        }
    }
}

impl Display for StructField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let req = if self.required { "required" } else { "optional" };
        write!(f, "{}: {} {} {}", self.id, self.name, req, self.field_type)
    }
}

/// An ordered collection of [`StructField`]s. The table schema is a `StructType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    fields: Vec<StructField>,
}

impl StructType {
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &StructField> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn field_by_id(&self, id: FieldId) -> Option<&StructField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Exact-match name lookup.
    pub fn field_by_name(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Case-insensitive name lookup. Two distinct fields matching the same name is a validation
    /// error rather than an arbitrary pick.
    pub fn field_by_name_case_insensitive(&self, name: &str) -> FloeResult<Option<&StructField>> {
        let mut matches = self
            .fields
            .iter()
            .filter(|f| f.name.eq_ignore_ascii_case(name));
        let first = matches.next();
        if let Some(second) = matches.next() {
            return Err(Error::validation(format!(
                "Cannot resolve column '{name}' case insensitively: matches both '{}' and '{}'",
                first.map(|f| f.name.as_str()).unwrap_or_default(),
                second.name
            )));
        }
        Ok(first)
    }

    /// Returns the sub-schema containing exactly the fields whose ids are in `ids`, preserving
    /// this schema's declaration order.
    pub fn select(&self, ids: &HashSet<FieldId>) -> StructType {
        StructType::new(self.fields.iter().filter(|f| ids.contains(&f.id)).cloned())
    }

    /// Resolves column names to field ids under the given case sensitivity. Unknown names (and
    /// case-insensitive ambiguity) fail with a validation error.
    pub fn project_ids(
        &self,
        names: &[impl AsRef<str>],
        case_sensitive: bool,
    ) -> FloeResult<Vec<FieldId>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let field = if case_sensitive {
                    self.field_by_name(name)
                } else {
                    self.field_by_name_case_insensitive(name)?
                };
                let field = field.ok_or_else(|| {
                    Error::validation(format!("Cannot find column '{name}' in schema: {self}"))
                })?;
                Ok(field.id)
            })
            .collect()
    }

    pub fn to_json(&self) -> FloeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> FloeResult<Self> {
        let schema: StructType = serde_json::from_str(json)?;
        require!(
            schema.fields.iter().map(|f| f.id).all_unique(),
            Error::validation(format!("Schema contains duplicate field ids: {schema}"))
        );
        Ok(schema)
    }
}

impl Display for StructType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "struct<{}>",
            self.fields.iter().map(|field| format!("{field}")).join(", ")
        )
    }
}

impl FromIterator<StructField> for StructType {
    fn from_iter<T: IntoIterator<Item = StructField>>(iter: T) -> Self {
        StructType::new(iter)
    }
}
