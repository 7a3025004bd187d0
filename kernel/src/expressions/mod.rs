//! Definitions and functions to create and manipulate row predicates.
//!
//! Predicates are tagged variants evaluated by structural match, not dynamic dispatch; the
//! evaluators in [`crate::predicates`] are pure functions over this tree. An unbound [`Predicate`]
//! references columns by name; [`Predicate::bind`] resolves the names to field ids under a given
//! case sensitivity and produces a [`BoundPredicate`], which is what evaluators (and the residual
//! payload on scan tasks) work with.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub use self::scalars::Scalar;
use crate::schema::{Schema, StructField};
use crate::{Error, FieldId, FloeResult};

mod scalars;

////////////////////////////////////////////////////////////////////////
// Operators
////////////////////////////////////////////////////////////////////////

/// A unary (null-test) operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    IsNull,
    NotNull,
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
}

/// A set-membership operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOperator {
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JunctionOperator {
    /// Conjunction
    And,
    /// Disjunction
    Or,
}

impl UnaryOperator {
    pub(crate) fn negate(&self) -> UnaryOperator {
        match self {
            UnaryOperator::IsNull => UnaryOperator::NotNull,
            UnaryOperator::NotNull => UnaryOperator::IsNull,
        }
    }
}

impl BinaryOperator {
    pub(crate) fn negate(&self) -> BinaryOperator {
        use BinaryOperator::*;
        match self {
            LessThan => GreaterThanOrEqual,
            LessThanOrEqual => GreaterThan,
            GreaterThan => LessThanOrEqual,
            GreaterThanOrEqual => LessThan,
            Equal => NotEqual,
            NotEqual => Equal,
        }
    }
}

impl SetOperator {
    pub(crate) fn negate(&self) -> SetOperator {
        match self {
            SetOperator::In => SetOperator::NotIn,
            SetOperator::NotIn => SetOperator::In,
        }
    }
}

impl JunctionOperator {
    pub(crate) fn invert(&self) -> JunctionOperator {
        match self {
            JunctionOperator::And => JunctionOperator::Or,
            JunctionOperator::Or => JunctionOperator::And,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// Unbound predicates
////////////////////////////////////////////////////////////////////////

/// A row predicate referencing columns by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    AlwaysTrue,
    AlwaysFalse,
    Not(Box<Predicate>),
    Junction(JunctionPredicate),
    Unary(UnaryPredicate),
    Binary(BinaryPredicate),
    Set(SetPredicate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JunctionPredicate {
    pub op: JunctionOperator,
    pub preds: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryPredicate {
    pub op: UnaryOperator,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryPredicate {
    pub op: BinaryOperator,
    pub column: String,
    pub literal: Scalar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetPredicate {
    pub op: SetOperator,
    pub column: String,
    pub literals: Vec<Scalar>,
}

impl Predicate {
    pub fn is_null(column: impl Into<String>) -> Predicate {
        Predicate::Unary(UnaryPredicate {
            op: UnaryOperator::IsNull,
            column: column.into(),
        })
    }

    pub fn not_null(column: impl Into<String>) -> Predicate {
        Predicate::Unary(UnaryPredicate {
            op: UnaryOperator::NotNull,
            column: column.into(),
        })
    }

    pub fn less_than(column: impl Into<String>, literal: impl Into<Scalar>) -> Predicate {
        Predicate::binary(BinaryOperator::LessThan, column, literal)
    }

    pub fn less_than_or_equal(column: impl Into<String>, literal: impl Into<Scalar>) -> Predicate {
        Predicate::binary(BinaryOperator::LessThanOrEqual, column, literal)
    }

    pub fn greater_than(column: impl Into<String>, literal: impl Into<Scalar>) -> Predicate {
        Predicate::binary(BinaryOperator::GreaterThan, column, literal)
    }

    pub fn greater_than_or_equal(
        column: impl Into<String>,
        literal: impl Into<Scalar>,
    ) -> Predicate {
        Predicate::binary(BinaryOperator::GreaterThanOrEqual, column, literal)
    }

    pub fn equal(column: impl Into<String>, literal: impl Into<Scalar>) -> Predicate {
        Predicate::binary(BinaryOperator::Equal, column, literal)
    }

    pub fn not_equal(column: impl Into<String>, literal: impl Into<Scalar>) -> Predicate {
        Predicate::binary(BinaryOperator::NotEqual, column, literal)
    }

    pub fn is_in(
        column: impl Into<String>,
        literals: impl IntoIterator<Item = impl Into<Scalar>>,
    ) -> Predicate {
        Predicate::set(SetOperator::In, column, literals)
    }

    pub fn not_in(
        column: impl Into<String>,
        literals: impl IntoIterator<Item = impl Into<Scalar>>,
    ) -> Predicate {
        Predicate::set(SetOperator::NotIn, column, literals)
    }

    pub fn binary(
        op: BinaryOperator,
        column: impl Into<String>,
        literal: impl Into<Scalar>,
    ) -> Predicate {
        Predicate::Binary(BinaryPredicate {
            op,
            column: column.into(),
            literal: literal.into(),
        })
    }

    pub fn set(
        op: SetOperator,
        column: impl Into<String>,
        literals: impl IntoIterator<Item = impl Into<Scalar>>,
    ) -> Predicate {
        Predicate::Set(SetPredicate {
            op,
            column: column.into(),
            literals: literals.into_iter().map(Into::into).collect(),
        })
    }

    /// Conjunction with constant folding: `AND(true, x)` is `x`, `AND(false, x)` is `false`.
    pub fn and(left: Predicate, right: Predicate) -> Predicate {
        match (left, right) {
            (Predicate::AlwaysFalse, _) | (_, Predicate::AlwaysFalse) => Predicate::AlwaysFalse,
            (Predicate::AlwaysTrue, other) | (other, Predicate::AlwaysTrue) => other,
            (left, right) => Predicate::Junction(JunctionPredicate {
                op: JunctionOperator::And,
                preds: vec![left, right],
            }),
        }
    }

    /// Disjunction with constant folding: `OR(false, x)` is `x`, `OR(true, x)` is `true`.
    pub fn or(left: Predicate, right: Predicate) -> Predicate {
        match (left, right) {
            (Predicate::AlwaysTrue, _) | (_, Predicate::AlwaysTrue) => Predicate::AlwaysTrue,
            (Predicate::AlwaysFalse, other) | (other, Predicate::AlwaysFalse) => other,
            (left, right) => Predicate::Junction(JunctionPredicate {
                op: JunctionOperator::Or,
                preds: vec![left, right],
            }),
        }
    }

    pub fn not(pred: Predicate) -> Predicate {
        match pred {
            Predicate::AlwaysTrue => Predicate::AlwaysFalse,
            Predicate::AlwaysFalse => Predicate::AlwaysTrue,
            Predicate::Not(inner) => *inner,
            pred => Predicate::Not(Box::new(pred)),
        }
    }

    /// Pushes every `NOT` down to the leaves (De Morgan) so that evaluators never have to deal
    /// with negation of a whole subtree.
    pub fn rewrite_not(self) -> Predicate {
        self.rewrite(false)
    }

    fn rewrite(self, negate: bool) -> Predicate {
        match self {
            Predicate::AlwaysTrue if negate => Predicate::AlwaysFalse,
            Predicate::AlwaysFalse if negate => Predicate::AlwaysTrue,
            p @ (Predicate::AlwaysTrue | Predicate::AlwaysFalse) => p,
            Predicate::Not(inner) => inner.rewrite(!negate),
            Predicate::Junction(JunctionPredicate { op, preds }) => {
                let op = if negate { op.invert() } else { op };
                Predicate::Junction(JunctionPredicate {
                    op,
                    preds: preds.into_iter().map(|p| p.rewrite(negate)).collect(),
                })
            }
            Predicate::Unary(UnaryPredicate { op, column }) => Predicate::Unary(UnaryPredicate {
                op: if negate { op.negate() } else { op },
                column,
            }),
            Predicate::Binary(BinaryPredicate { op, column, literal }) => {
                Predicate::Binary(BinaryPredicate {
                    op: if negate { op.negate() } else { op },
                    column,
                    literal,
                })
            }
            Predicate::Set(SetPredicate { op, column, literals }) => Predicate::Set(SetPredicate {
                op: if negate { op.negate() } else { op },
                column,
                literals,
            }),
        }
    }

    /// Resolves every column reference against `schema` under the given case sensitivity.
    /// Unknown or (case-insensitively) ambiguous names fail with a validation error. `NOT` is
    /// rewritten away as part of binding.
    pub fn bind(&self, schema: &Schema, case_sensitive: bool) -> FloeResult<BoundPredicate> {
        self.clone()
            .rewrite_not()
            .bind_inner(schema, case_sensitive)
    }

    fn bind_inner(self, schema: &Schema, case_sensitive: bool) -> FloeResult<BoundPredicate> {
        let bind_column = |column: &str| -> FloeResult<BoundReference> {
            let field = if case_sensitive {
                schema.field_by_name(column)
            } else {
                schema.field_by_name_case_insensitive(column)?
            };
            let field = field.ok_or_else(|| {
                Error::validation(format!(
                    "Cannot find column '{column}' referenced by the filter in schema: {schema}"
                ))
            })?;
            Ok(BoundReference::new(field))
        };
        let bound = match self {
            Predicate::AlwaysTrue => BoundPredicate::AlwaysTrue,
            Predicate::AlwaysFalse => BoundPredicate::AlwaysFalse,
            // rewrite_not leaves no Not nodes behind
            Predicate::Not(_) => return Err(Error::internal("binding a predicate containing NOT")),
            Predicate::Junction(JunctionPredicate { op, preds }) => {
                BoundPredicate::Junction(BoundJunctionPredicate {
                    op,
                    preds: preds
                        .into_iter()
                        .map(|p| p.bind_inner(schema, case_sensitive))
                        .try_collect()?,
                })
            }
            Predicate::Unary(UnaryPredicate { op, column }) => {
                BoundPredicate::Unary(BoundUnaryPredicate {
                    op,
                    reference: bind_column(&column)?,
                })
            }
            Predicate::Binary(BinaryPredicate { op, column, literal }) => {
                BoundPredicate::Binary(BoundBinaryPredicate {
                    op,
                    reference: bind_column(&column)?,
                    literal,
                })
            }
            Predicate::Set(SetPredicate { op, column, literals }) => {
                BoundPredicate::Set(BoundSetPredicate {
                    op,
                    reference: bind_column(&column)?,
                    literals,
                })
            }
        };
        Ok(bound)
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::AlwaysTrue => write!(f, "true"),
            Predicate::AlwaysFalse => write!(f, "false"),
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
            Predicate::Junction(JunctionPredicate { op, preds }) => {
                let op = match op {
                    JunctionOperator::And => "AND",
                    JunctionOperator::Or => "OR",
                };
                write!(f, "{op}({})", preds.iter().map(|p| format!("{p}")).join(", "))
            }
            Predicate::Unary(UnaryPredicate { op, column }) => match op {
                UnaryOperator::IsNull => write!(f, "{column} IS NULL"),
                UnaryOperator::NotNull => write!(f, "{column} IS NOT NULL"),
            },
            Predicate::Binary(BinaryPredicate { op, column, literal }) => {
                write!(f, "{column} {} {literal}", binary_symbol(*op))
            }
            Predicate::Set(SetPredicate { op, column, literals }) => {
                let op = match op {
                    SetOperator::In => "IN",
                    SetOperator::NotIn => "NOT IN",
                };
                write!(
                    f,
                    "{column} {op} ({})",
                    literals.iter().map(|l| format!("{l}")).join(", ")
                )
            }
        }
    }
}

fn binary_symbol(op: BinaryOperator) -> &'static str {
    use BinaryOperator::*;
    match op {
        LessThan => "<",
        LessThanOrEqual => "<=",
        GreaterThan => ">",
        GreaterThanOrEqual => ">=",
        Equal => "=",
        NotEqual => "!=",
    }
}

////////////////////////////////////////////////////////////////////////
// Bound predicates
////////////////////////////////////////////////////////////////////////

/// A column reference resolved to a field id. The name is kept only for display; all semantics
/// key off the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundReference {
    pub field_id: FieldId,
    pub name: String,
}

impl BoundReference {
    pub fn new(field: &StructField) -> Self {
        Self {
            field_id: field.id,
            name: field.name.clone(),
        }
    }
}

impl Display for BoundReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.field_id)
    }
}

/// A row predicate with every column reference resolved to a field id. Contains no `NOT` nodes;
/// negation was pushed to the leaves during binding.
///
/// Bound predicates are serialized as the residual payload on scan tasks, so downstream readers
/// need no planner state to enforce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundPredicate {
    AlwaysTrue,
    AlwaysFalse,
    Junction(BoundJunctionPredicate),
    Unary(BoundUnaryPredicate),
    Binary(BoundBinaryPredicate),
    Set(BoundSetPredicate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundJunctionPredicate {
    pub op: JunctionOperator,
    pub preds: Vec<BoundPredicate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundUnaryPredicate {
    pub op: UnaryOperator,
    pub reference: BoundReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundBinaryPredicate {
    pub op: BinaryOperator,
    pub reference: BoundReference,
    pub literal: Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundSetPredicate {
    pub op: SetOperator,
    pub reference: BoundReference,
    pub literals: Vec<Scalar>,
}

impl BoundPredicate {
    /// Returns the set of field ids referenced by this predicate.
    pub fn references(&self) -> HashSet<FieldId> {
        let mut ids = HashSet::new();
        self.collect_references(&mut ids);
        ids
    }

    fn collect_references(&self, ids: &mut HashSet<FieldId>) {
        match self {
            BoundPredicate::AlwaysTrue | BoundPredicate::AlwaysFalse => {}
            BoundPredicate::Junction(j) => {
                for pred in &j.preds {
                    pred.collect_references(ids);
                }
            }
            BoundPredicate::Unary(u) => {
                ids.insert(u.reference.field_id);
            }
            BoundPredicate::Binary(b) => {
                ids.insert(b.reference.field_id);
            }
            BoundPredicate::Set(s) => {
                ids.insert(s.reference.field_id);
            }
        }
    }

    pub fn to_json(&self) -> FloeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> FloeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Display for BoundPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundPredicate::AlwaysTrue => write!(f, "true"),
            BoundPredicate::AlwaysFalse => write!(f, "false"),
            BoundPredicate::Junction(BoundJunctionPredicate { op, preds }) => {
                let op = match op {
                    JunctionOperator::And => "AND",
                    JunctionOperator::Or => "OR",
                };
                write!(f, "{op}({})", preds.iter().map(|p| format!("{p}")).join(", "))
            }
            BoundPredicate::Unary(BoundUnaryPredicate { op, reference }) => match op {
                UnaryOperator::IsNull => write!(f, "{reference} IS NULL"),
                UnaryOperator::NotNull => write!(f, "{reference} IS NOT NULL"),
            },
            BoundPredicate::Binary(BoundBinaryPredicate { op, reference, literal }) => {
                write!(f, "{reference} {} {literal}", binary_symbol(*op))
            }
            BoundPredicate::Set(BoundSetPredicate { op, reference, literals }) => {
                let op = match op {
                    SetOperator::In => "IN",
                    SetOperator::NotIn => "NOT IN",
                };
                write!(
                    f,
                    "{reference} {op} ({})",
                    literals.iter().map(|l| format!("{l}")).join(", ")
                )
            }
        }
    }
}
