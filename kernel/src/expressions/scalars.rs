use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::schema::PrimitiveType;

/// A literal value, used on the right-hand side of comparisons and as partition / bound values.
///
/// Scalars of different types are incomparable: [`PartialOrd`] returns `None` rather than
/// guessing at a coercion, and every evaluator treats an incomparable pair as "unknown", which
/// keeps pruning sound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Days since the unix epoch.
    Date(i32),
    /// Microseconds since the unix epoch.
    Timestamp(i64),
    String(String),
    Binary(Vec<u8>),
}

impl Scalar {
    pub fn data_type(&self) -> PrimitiveType {
        match self {
            Scalar::Boolean(_) => PrimitiveType::Boolean,
            Scalar::Int(_) => PrimitiveType::Int,
            Scalar::Long(_) => PrimitiveType::Long,
            Scalar::Float(_) => PrimitiveType::Float,
            Scalar::Double(_) => PrimitiveType::Double,
            Scalar::Date(_) => PrimitiveType::Date,
            Scalar::Timestamp(_) => PrimitiveType::Timestamp,
            Scalar::String(_) => PrimitiveType::String,
            Scalar::Binary(_) => PrimitiveType::Binary,
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Scalar::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Long(a), Long(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (String(a), String(b)) => a.partial_cmp(b),
            (Binary(a), Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Boolean(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Long(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Double(v) => write!(f, "{v}"),
            Scalar::Date(v) => write!(f, "date({v})"),
            Scalar::Timestamp(v) => write!(f, "timestamp({v})"),
            Scalar::String(v) => write!(f, "'{v}'"),
            Scalar::Binary(v) => write!(f, "binary({} bytes)", v.len()),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Long(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Double(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_type_ordering() {
        assert_eq!(
            Scalar::Long(1).partial_cmp(&Scalar::Long(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Scalar::String("b".into()).partial_cmp(&Scalar::String("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Scalar::Date(10).partial_cmp(&Scalar::Date(10)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_cross_type_incomparable() {
        let values = [
            Scalar::Int(1),
            Scalar::Long(1),
            Scalar::Double(1.0),
            Scalar::String("1".into()),
            Scalar::Boolean(true),
        ];
        for (i, a) in values.iter().enumerate() {
            for b in values.iter().skip(i + 1) {
                assert!(
                    a.partial_cmp(b).is_none(),
                    "{:?} should not be comparable to {:?}",
                    a.data_type(),
                    b.data_type()
                );
            }
        }
    }

    #[test]
    fn test_serde_round_trip() {
        for scalar in [
            Scalar::Long(42),
            Scalar::String("x".into()),
            Scalar::Boolean(false),
            Scalar::Timestamp(1_700_000_000_000_000),
        ] {
            let json = serde_json::to_string(&scalar).unwrap();
            let parsed: Scalar = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, scalar);
        }
    }
}
