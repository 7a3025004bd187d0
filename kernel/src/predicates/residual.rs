//! Residual predicates: the part of a row filter that partition values cannot resolve.
//!
//! For a manifest written under some spec, every row of a given data file shares one partition
//! tuple. Partial evaluation substitutes those values into the filter: any subtree fully resolved
//! by the tuple collapses to a constant, `AND`/`OR` short-circuit over the constants, and the
//! first irreducible subtree is kept verbatim. The result is what a per-row reader must still
//! enforce; `true` means every row matches and `false` means the file can be skipped outright.

use crate::expressions::{
    BinaryOperator, BoundBinaryPredicate, BoundJunctionPredicate, BoundPredicate,
    BoundSetPredicate, BoundUnaryPredicate, JunctionOperator, Predicate, Scalar, SetOperator,
    UnaryOperator,
};
use crate::partition::PartitionSpec;
use crate::schema::Schema;
use crate::FloeResult;

/// Computes residual predicates for data files written under one partition spec.
///
/// The residual is sound: it never drops a matching row, though it may keep rows the original
/// filter would reject (e.g. when a partition value and literal are not comparable).
#[derive(Debug)]
pub struct ResidualEvaluator {
    spec: PartitionSpec,
    filter: BoundPredicate,
}

impl ResidualEvaluator {
    pub fn new(
        spec: PartitionSpec,
        schema: &Schema,
        filter: &Predicate,
        case_sensitive: bool,
    ) -> FloeResult<Self> {
        Ok(Self {
            spec,
            filter: filter.bind(schema, case_sensitive)?,
        })
    }

    /// The residual for a file with the given partition tuple (one value per spec field, `None`
    /// for a null partition value).
    pub fn residual_for(&self, partition: &[Option<Scalar>]) -> BoundPredicate {
        self.eval(&self.filter, partition)
    }

    fn eval(&self, pred: &BoundPredicate, partition: &[Option<Scalar>]) -> BoundPredicate {
        match pred {
            BoundPredicate::AlwaysTrue => BoundPredicate::AlwaysTrue,
            BoundPredicate::AlwaysFalse => BoundPredicate::AlwaysFalse,
            BoundPredicate::Junction(BoundJunctionPredicate { op, preds }) => {
                self.eval_junction(*op, preds, partition)
            }
            BoundPredicate::Unary(BoundUnaryPredicate { op, reference }) => {
                match self.partition_value(reference.field_id, partition) {
                    Some(value) => {
                        let is_null = value.is_none();
                        constant(match op {
                            UnaryOperator::IsNull => is_null,
                            UnaryOperator::NotNull => !is_null,
                        })
                    }
                    None => pred.clone(),
                }
            }
            BoundPredicate::Binary(BoundBinaryPredicate { op, reference, literal }) => {
                match self.partition_value(reference.field_id, partition) {
                    // a null value fails every comparison
                    Some(None) => BoundPredicate::AlwaysFalse,
                    Some(Some(value)) => match compare(*op, value, literal) {
                        Some(result) => constant(result),
                        // incomparable: leave the subtree for the reader
                        None => pred.clone(),
                    },
                    None => pred.clone(),
                }
            }
            BoundPredicate::Set(BoundSetPredicate { op, reference, literals }) => {
                match self.partition_value(reference.field_id, partition) {
                    Some(None) => BoundPredicate::AlwaysFalse,
                    Some(Some(value)) => {
                        let contained = literals.iter().any(|l| l == value);
                        constant(match op {
                            SetOperator::In => contained,
                            SetOperator::NotIn => !contained,
                        })
                    }
                    None => pred.clone(),
                }
            }
        }
    }

    fn eval_junction(
        &self,
        op: JunctionOperator,
        preds: &[BoundPredicate],
        partition: &[Option<Scalar>],
    ) -> BoundPredicate {
        let mut residuals = Vec::with_capacity(preds.len());
        for pred in preds {
            match (op, self.eval(pred, partition)) {
                (JunctionOperator::And, BoundPredicate::AlwaysFalse) => {
                    return BoundPredicate::AlwaysFalse
                }
                (JunctionOperator::And, BoundPredicate::AlwaysTrue) => {}
                (JunctionOperator::Or, BoundPredicate::AlwaysTrue) => {
                    return BoundPredicate::AlwaysTrue
                }
                (JunctionOperator::Or, BoundPredicate::AlwaysFalse) => {}
                (_, residual) => residuals.push(residual),
            }
        }
        match residuals.len() {
            0 => constant(op == JunctionOperator::And),
            1 => residuals.remove(0),
            _ => BoundPredicate::Junction(BoundJunctionPredicate { op, preds: residuals }),
        }
    }

    /// `Some(value)` when the field is identity-partitioned and the tuple carries a value for it
    /// (`Some(None)` is an explicit null); `None` when partitioning says nothing about the field.
    fn partition_value<'a>(
        &self,
        field_id: crate::FieldId,
        partition: &'a [Option<Scalar>],
    ) -> Option<&'a Option<Scalar>> {
        let pos = self.spec.identity_position_for(field_id)?;
        partition.get(pos)
    }
}

fn constant(value: bool) -> BoundPredicate {
    if value {
        BoundPredicate::AlwaysTrue
    } else {
        BoundPredicate::AlwaysFalse
    }
}

fn compare(op: BinaryOperator, value: &Scalar, literal: &Scalar) -> Option<bool> {
    use BinaryOperator::*;
    let ord = value.partial_cmp(literal)?;
    Some(match op {
        LessThan => ord == std::cmp::Ordering::Less,
        LessThanOrEqual => ord != std::cmp::Ordering::Greater,
        GreaterThan => ord == std::cmp::Ordering::Greater,
        GreaterThanOrEqual => ord != std::cmp::Ordering::Less,
        Equal => ord == std::cmp::Ordering::Equal,
        NotEqual => ord != std::cmp::Ordering::Equal,
    })
}
