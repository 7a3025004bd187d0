//! Inclusive predicate evaluation for pruning.
//!
//! Two evaluators share one algebra: [`InclusiveManifestEvaluator`] decides whether a whole
//! manifest *might* contain matching rows using its partition-value summary, and
//! [`InclusiveMetricsEvaluator`] makes the same decision per data-file entry using its column
//! statistics. Both are pure functions of `(spec/schema, filter, case_sensitive)` evaluated by
//! structural match over the bound predicate tree.
//!
//! The contract is soundness: an evaluator may say "might match" for a file with no matching
//! rows, but never "cannot match" for a file that has one. Anything unknown, such as a
//! non-identity partition field or an incomparable literal, evaluates to "might match".

use std::cmp::Ordering;

use tracing::debug;

use crate::expressions::{
    BinaryOperator, BoundBinaryPredicate, BoundJunctionPredicate, BoundPredicate,
    BoundSetPredicate, BoundUnaryPredicate, JunctionOperator, Predicate, Scalar, SetOperator,
    UnaryOperator,
};
use crate::manifest::DataFile;
use crate::metadata::{ManifestFile, PartitionFieldSummary};
use crate::partition::PartitionSpec;
use crate::schema::Schema;
use crate::utils::require;
use crate::{Error, FloeResult};

pub mod residual;

const ROWS_MIGHT_MATCH: bool = true;
const ROWS_CANNOT_MATCH: bool = false;

/// Decides whether a manifest might contain rows matching a filter, from its per-partition-column
/// `(lower, upper, contains_null)` summaries alone.
///
/// One instance exists per `(partition_spec_id, row_filter, case_sensitive)`; the planner caches
/// them per spec id for the duration of a scan.
#[derive(Debug)]
pub struct InclusiveManifestEvaluator {
    spec: PartitionSpec,
    filter: BoundPredicate,
}

impl InclusiveManifestEvaluator {
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

    /// Returns true if the manifest might contain rows matching the filter.
    pub fn eval(&self, manifest: &ManifestFile) -> FloeResult<bool> {
        require!(
            manifest.partition_spec_id == self.spec.spec_id,
            Error::internal(format!(
                "Manifest {} was written under spec {} but evaluated under spec {}",
                manifest.path, manifest.partition_spec_id, self.spec.spec_id
            ))
        );
        let matches = self.eval_pred(&self.filter, &manifest.partition_summaries);
        if !matches {
            debug!(
                "Skipping manifest {}: summary cannot match filter",
                manifest.path
            );
        }
        Ok(matches)
    }

    fn eval_pred(&self, pred: &BoundPredicate, summaries: &[PartitionFieldSummary]) -> bool {
        match pred {
            BoundPredicate::AlwaysTrue => ROWS_MIGHT_MATCH,
            BoundPredicate::AlwaysFalse => ROWS_CANNOT_MATCH,
            BoundPredicate::Junction(BoundJunctionPredicate { op, preds }) => match op {
                JunctionOperator::And => preds.iter().all(|p| self.eval_pred(p, summaries)),
                JunctionOperator::Or => preds.iter().any(|p| self.eval_pred(p, summaries)),
            },
            BoundPredicate::Unary(BoundUnaryPredicate { op, reference }) => {
                let Some(summary) = self.summary_for(reference.field_id, summaries) else {
                    return ROWS_MIGHT_MATCH;
                };
                match op {
                    UnaryOperator::IsNull => summary.contains_null,
                    // a summary with no bounds covers only null partition values
                    UnaryOperator::NotNull => summary.lower_bound.is_some(),
                }
            }
            BoundPredicate::Binary(BoundBinaryPredicate { op, reference, literal }) => {
                let Some(summary) = self.summary_for(reference.field_id, summaries) else {
                    return ROWS_MIGHT_MATCH;
                };
                eval_summary_bounds(
                    *op,
                    summary.lower_bound.as_ref(),
                    summary.upper_bound.as_ref(),
                    literal,
                )
            }
            BoundPredicate::Set(BoundSetPredicate { op, reference, literals }) => match op {
                SetOperator::NotIn => ROWS_MIGHT_MATCH,
                SetOperator::In => {
                    let Some(summary) = self.summary_for(reference.field_id, summaries) else {
                        return ROWS_MIGHT_MATCH;
                    };
                    literals.iter().any(|literal| {
                        eval_summary_bounds(
                            BinaryOperator::Equal,
                            summary.lower_bound.as_ref(),
                            summary.upper_bound.as_ref(),
                            literal,
                        )
                    })
                }
            },
        }
    }

    /// The summary for the identity partition field derived from this source field, if the spec
    /// has one and the manifest carries it.
    fn summary_for<'a>(
        &self,
        field_id: crate::FieldId,
        summaries: &'a [PartitionFieldSummary],
    ) -> Option<&'a PartitionFieldSummary> {
        let pos = self.spec.identity_position_for(field_id)?;
        summaries.get(pos)
    }
}

/// Inclusive comparison of `column <op> literal` against a partition summary's `[lower, upper]`
/// range. Summary bounds are authoritative: an absent bound means the range covers no non-null
/// values. An incomparable literal means unknown.
fn eval_summary_bounds(
    op: BinaryOperator,
    lower: Option<&Scalar>,
    upper: Option<&Scalar>,
    literal: &Scalar,
) -> bool {
    use BinaryOperator::*;
    match op {
        LessThan | LessThanOrEqual => {
            // some value below the literal must exist, so check the lower bound
            let Some(lower) = lower else {
                return ROWS_CANNOT_MATCH;
            };
            match lower.partial_cmp(literal) {
                Some(Ordering::Less) => ROWS_MIGHT_MATCH,
                Some(Ordering::Equal) => op == LessThanOrEqual,
                Some(Ordering::Greater) => ROWS_CANNOT_MATCH,
                None => ROWS_MIGHT_MATCH,
            }
        }
        GreaterThan | GreaterThanOrEqual => {
            let Some(upper) = upper else {
                return ROWS_CANNOT_MATCH;
            };
            match upper.partial_cmp(literal) {
                Some(Ordering::Greater) => ROWS_MIGHT_MATCH,
                Some(Ordering::Equal) => op == GreaterThanOrEqual,
                Some(Ordering::Less) => ROWS_CANNOT_MATCH,
                None => ROWS_MIGHT_MATCH,
            }
        }
        Equal => {
            let (Some(lower), Some(upper)) = (lower, upper) else {
                return ROWS_CANNOT_MATCH;
            };
            match (lower.partial_cmp(literal), literal.partial_cmp(upper)) {
                (Some(l), Some(u)) => l != Ordering::Greater && u != Ordering::Greater,
                _ => ROWS_MIGHT_MATCH,
            }
        }
        // a range of values almost always contains something != literal
        NotEqual => ROWS_MIGHT_MATCH,
    }
}

/// Decides whether a single data file might contain matching rows, from its per-column value
/// counts, null counts, and bounds. Used by the manifest reader's row filter.
#[derive(Debug)]
pub struct InclusiveMetricsEvaluator {
    filter: BoundPredicate,
}

impl InclusiveMetricsEvaluator {
    pub fn new(schema: &Schema, filter: &Predicate, case_sensitive: bool) -> FloeResult<Self> {
        Ok(Self {
            filter: filter.bind(schema, case_sensitive)?,
        })
    }

    /// Returns true if the file might contain rows matching the filter.
    pub fn eval(&self, file: &DataFile) -> bool {
        if file.record_count == 0 {
            return ROWS_CANNOT_MATCH;
        }
        self.eval_pred(&self.filter, file)
    }

    fn eval_pred(&self, pred: &BoundPredicate, file: &DataFile) -> bool {
        match pred {
            BoundPredicate::AlwaysTrue => ROWS_MIGHT_MATCH,
            BoundPredicate::AlwaysFalse => ROWS_CANNOT_MATCH,
            BoundPredicate::Junction(BoundJunctionPredicate { op, preds }) => match op {
                JunctionOperator::And => preds.iter().all(|p| self.eval_pred(p, file)),
                JunctionOperator::Or => preds.iter().any(|p| self.eval_pred(p, file)),
            },
            BoundPredicate::Unary(BoundUnaryPredicate { op, reference }) => {
                let id = reference.field_id;
                match op {
                    UnaryOperator::IsNull => match file.null_value_counts.get(&id) {
                        Some(&0) => ROWS_CANNOT_MATCH,
                        _ => ROWS_MIGHT_MATCH,
                    },
                    UnaryOperator::NotNull => {
                        match (file.value_counts.get(&id), file.null_value_counts.get(&id)) {
                            // every value is null
                            (Some(values), Some(nulls)) if values == nulls => ROWS_CANNOT_MATCH,
                            _ => ROWS_MIGHT_MATCH,
                        }
                    }
                }
            }
            BoundPredicate::Binary(BoundBinaryPredicate { op, reference, literal }) => {
                let id = reference.field_id;
                if contains_nulls_only(file, id) {
                    return ROWS_CANNOT_MATCH;
                }
                eval_stats_bounds(
                    *op,
                    file.lower_bounds.get(&id),
                    file.upper_bounds.get(&id),
                    literal,
                )
            }
            BoundPredicate::Set(BoundSetPredicate { op, reference, literals }) => match op {
                SetOperator::NotIn => ROWS_MIGHT_MATCH,
                SetOperator::In => {
                    let id = reference.field_id;
                    if contains_nulls_only(file, id) {
                        return ROWS_CANNOT_MATCH;
                    }
                    literals.iter().any(|literal| {
                        eval_stats_bounds(
                            BinaryOperator::Equal,
                            file.lower_bounds.get(&id),
                            file.upper_bounds.get(&id),
                            literal,
                        )
                    })
                }
            },
        }
    }
}

fn contains_nulls_only(file: &DataFile, id: crate::FieldId) -> bool {
    match (file.value_counts.get(&id), file.null_value_counts.get(&id)) {
        (Some(values), Some(nulls)) => values == nulls,
        _ => false,
    }
}

/// Inclusive comparison of `column <op> literal` against a data file's `[lower, upper]` stats.
/// Unlike summary bounds, a missing file stat means the stat was not collected, so nothing can be
/// pruned from it.
fn eval_stats_bounds(
    op: BinaryOperator,
    lower: Option<&Scalar>,
    upper: Option<&Scalar>,
    literal: &Scalar,
) -> bool {
    use BinaryOperator::*;
    match op {
        LessThan | LessThanOrEqual => match lower.and_then(|l| l.partial_cmp(literal)) {
            Some(Ordering::Greater) => ROWS_CANNOT_MATCH,
            Some(Ordering::Equal) => op == LessThanOrEqual,
            _ => ROWS_MIGHT_MATCH,
        },
        GreaterThan | GreaterThanOrEqual => match upper.and_then(|u| u.partial_cmp(literal)) {
            Some(Ordering::Less) => ROWS_CANNOT_MATCH,
            Some(Ordering::Equal) => op == GreaterThanOrEqual,
            _ => ROWS_MIGHT_MATCH,
        },
        Equal => {
            if lower.and_then(|l| l.partial_cmp(literal)) == Some(Ordering::Greater) {
                return ROWS_CANNOT_MATCH;
            }
            if upper.and_then(|u| u.partial_cmp(literal)) == Some(Ordering::Less) {
                return ROWS_CANNOT_MATCH;
            }
            ROWS_MIGHT_MATCH
        }
        NotEqual => ROWS_MIGHT_MATCH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileFormat;
    use crate::partition::PartitionField;
    use crate::schema::{PrimitiveType, StructField};
    use std::collections::HashMap;

    fn test_schema() -> Schema {
        Schema::new([
            StructField::required(1, "id", PrimitiveType::Long),
            StructField::optional(2, "date", PrimitiveType::String),
        ])
    }

    fn date_spec() -> PartitionSpec {
        PartitionSpec::new(0, [PartitionField::identity(2, "date")])
    }

    fn manifest(summary: PartitionFieldSummary) -> ManifestFile {
        ManifestFile {
            path: "m1.json".to_string(),
            length: 100,
            partition_spec_id: 0,
            partition_summaries: vec![summary],
        }
    }

    fn summary(lower: &str, upper: &str, contains_null: bool) -> PartitionFieldSummary {
        PartitionFieldSummary {
            contains_null,
            lower_bound: Some(Scalar::from(lower)),
            upper_bound: Some(Scalar::from(upper)),
        }
    }

    fn evaluator(filter: Predicate) -> InclusiveManifestEvaluator {
        InclusiveManifestEvaluator::new(date_spec(), &test_schema(), &filter, true).unwrap()
    }

    #[test]
    fn test_manifest_eq_pruning() {
        let eval = evaluator(Predicate::equal("date", "2024-01-01"));
        let dec = manifest(summary("2023-12-01", "2023-12-31", false));
        let jan = manifest(summary("2024-01-01", "2024-01-31", false));
        assert!(!eval.eval(&dec).unwrap());
        assert!(eval.eval(&jan).unwrap());
    }

    #[test]
    fn test_manifest_comparison_bounds() {
        let m = manifest(summary("b", "d", false));
        for (filter, expected) in [
            (Predicate::less_than("date", "b"), false),
            (Predicate::less_than_or_equal("date", "b"), true),
            (Predicate::less_than("date", "c"), true),
            (Predicate::greater_than("date", "d"), false),
            (Predicate::greater_than_or_equal("date", "d"), true),
            (Predicate::not_equal("date", "c"), true),
        ] {
            let eval = evaluator(filter.clone());
            assert_eq!(eval.eval(&m).unwrap(), expected, "filter: {filter}");
        }
    }

    #[test]
    fn test_manifest_null_summary() {
        let with_nulls = manifest(summary("a", "z", true));
        let no_nulls = manifest(summary("a", "z", false));
        let all_null = manifest(PartitionFieldSummary {
            contains_null: true,
            lower_bound: None,
            upper_bound: None,
        });

        let is_null = evaluator(Predicate::is_null("date"));
        assert!(is_null.eval(&with_nulls).unwrap());
        assert!(!is_null.eval(&no_nulls).unwrap());

        let not_null = evaluator(Predicate::not_null("date"));
        assert!(not_null.eval(&with_nulls).unwrap());
        assert!(!not_null.eval(&all_null).unwrap());

        // comparisons cannot match a summary covering only nulls
        let eq = evaluator(Predicate::equal("date", "a"));
        assert!(!eq.eval(&all_null).unwrap());
    }

    #[test]
    fn test_manifest_in_pruning() {
        let m = manifest(summary("b", "d", false));
        assert!(evaluator(Predicate::is_in("date", ["a", "c"]))
            .eval(&m)
            .unwrap());
        assert!(!evaluator(Predicate::is_in("date", ["a", "e"]))
            .eval(&m)
            .unwrap());
        // NOT IN never prunes at manifest level
        assert!(evaluator(Predicate::not_in("date", ["c"])).eval(&m).unwrap());
    }

    #[test]
    fn test_manifest_junctions_and_not() {
        let m = manifest(summary("b", "d", false));
        let and = Predicate::and(
            Predicate::greater_than_or_equal("date", "a"),
            Predicate::less_than("date", "b"),
        );
        assert!(!evaluator(and).eval(&m).unwrap());
        let or = Predicate::or(
            Predicate::less_than("date", "a"),
            Predicate::greater_than("date", "c"),
        );
        assert!(evaluator(or).eval(&m).unwrap());
        // NOT(date < 'z') => date >= 'z'
        let not = Predicate::not(Predicate::less_than("date", "z"));
        assert!(!evaluator(not).eval(&m).unwrap());
    }

    #[test]
    fn test_manifest_non_partition_column_is_unknown() {
        // `id` is not a partition column, so nothing about it can prune
        let eval = evaluator(Predicate::equal("id", 7i64));
        let m = manifest(summary("a", "b", false));
        assert!(eval.eval(&m).unwrap());
    }

    #[test]
    fn test_manifest_spec_mismatch_is_internal_error() {
        let eval = evaluator(Predicate::AlwaysTrue);
        let mut m = manifest(summary("a", "b", false));
        m.partition_spec_id = 7;
        assert!(matches!(eval.eval(&m), Err(Error::Internal(_))));
    }

    fn data_file(lower: Option<i64>, upper: Option<i64>, values: u64, nulls: u64) -> DataFile {
        let mut file = DataFile {
            path: "f.parquet".to_string(),
            file_format: FileFormat::Parquet,
            file_size_in_bytes: 100,
            record_count: values,
            partition: vec![],
            value_counts: HashMap::from([(1, values)]),
            null_value_counts: HashMap::from([(1, nulls)]),
            lower_bounds: HashMap::new(),
            upper_bounds: HashMap::new(),
        };
        if let Some(lower) = lower {
            file.lower_bounds.insert(1, Scalar::Long(lower));
        }
        if let Some(upper) = upper {
            file.upper_bounds.insert(1, Scalar::Long(upper));
        }
        file
    }

    fn metrics_eval(filter: Predicate) -> InclusiveMetricsEvaluator {
        InclusiveMetricsEvaluator::new(&test_schema(), &filter, true).unwrap()
    }

    #[test]
    fn test_metrics_bounds() {
        let file = data_file(Some(10), Some(20), 100, 0);
        assert!(metrics_eval(Predicate::equal("id", 15i64)).eval(&file));
        assert!(!metrics_eval(Predicate::equal("id", 25i64)).eval(&file));
        assert!(!metrics_eval(Predicate::less_than("id", 10i64)).eval(&file));
        assert!(metrics_eval(Predicate::less_than_or_equal("id", 10i64)).eval(&file));
        assert!(!metrics_eval(Predicate::greater_than("id", 20i64)).eval(&file));
    }

    #[test]
    fn test_metrics_null_counts() {
        let no_nulls = data_file(Some(1), Some(2), 10, 0);
        let all_null = data_file(None, None, 10, 10);
        assert!(!metrics_eval(Predicate::is_null("id")).eval(&no_nulls));
        assert!(metrics_eval(Predicate::is_null("id")).eval(&all_null));
        assert!(!metrics_eval(Predicate::not_null("id")).eval(&all_null));
        assert!(metrics_eval(Predicate::not_null("id")).eval(&no_nulls));
    }

    #[test]
    fn test_metrics_missing_stats_keep_file() {
        let mut file = data_file(None, None, 10, 0);
        file.value_counts.clear();
        file.null_value_counts.clear();
        file.lower_bounds.clear();
        file.upper_bounds.clear();
        // no stats at all: nothing can prune except an empty file
        assert!(metrics_eval(Predicate::equal("id", 1i64)).eval(&file));
        assert!(metrics_eval(Predicate::is_null("id")).eval(&file));
    }

    #[test]
    fn test_metrics_empty_file_skipped() {
        let file = data_file(Some(1), Some(2), 0, 0);
        assert!(!metrics_eval(Predicate::AlwaysTrue).eval(&file));
    }
}
