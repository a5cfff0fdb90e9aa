//! Boolean condition grammar
//!
//! ```text
//! query     := group (logicalOp group)*
//! group     := "(" cond (logicalOp cond)* ")"
//! cond      := field operator value
//! operator  := = | != | > | >= | < | <=
//! logicalOp := AND | OR
//! ```
//!
//! The structured form keeps the operator *preceding* each element: the first
//! group and the first condition of every group carry none. Structures built
//! through [`QueryBuilder`] always satisfy this and round-trip through
//! [`serialize`] and [`parse`] unchanged.

mod builder;
mod codec;

pub use builder::QueryBuilder;
pub use codec::{parse, parse_groups, serialize, DiagnosticKind, ParsedQuery, QueryDiagnostic};

use serde::{Deserialize, Serialize};

/// Fields offered by the query editor; advisory, the grammar accepts any
/// identifier
pub const KNOWN_FIELDS: [&str; 4] = ["speed", "acceleration", "TTC", "brake_status"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "AND" => Some(LogicalOp::And),
            "OR" => Some(LogicalOp::Or),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl ComparisonOp {
    pub const ALL: [ComparisonOp; 6] = [
        ComparisonOp::Eq,
        ComparisonOp::Ne,
        ComparisonOp::Gt,
        ComparisonOp::Ge,
        ComparisonOp::Lt,
        ComparisonOp::Le,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == s)
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryCondition {
    pub field: String,
    pub operator: ComparisonOp,
    pub value: String,
    /// Operator joining this condition to the previous one
    #[serde(default, with = "empty_as_none")]
    pub logical_op: Option<LogicalOp>,
}

impl QueryCondition {
    pub fn new(field: impl Into<String>, operator: ComparisonOp, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            logical_op: None,
        }
    }

    pub fn joined(mut self, op: LogicalOp) -> Self {
        self.logical_op = Some(op);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryGroup {
    pub conditions: Vec<QueryCondition>,
    /// Operator joining this group to the previous one
    #[serde(default, with = "empty_as_none")]
    pub group_logical_op: Option<LogicalOp>,
}

/// Wire form uses `""` for "no operator"
mod empty_as_none {
    use super::LogicalOp;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(op: &Option<LogicalOp>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(op.map(|op| op.as_str()).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<LogicalOp>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        match raw.as_str() {
            "" => Ok(None),
            other => LogicalOp::from_keyword(other)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown logical operator: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_uses_empty_operator() {
        let group = QueryGroup {
            conditions: vec![
                QueryCondition::new("speed", ComparisonOp::Gt, "50"),
                QueryCondition::new("TTC", ComparisonOp::Le, "1.5").joined(LogicalOp::Or),
            ],
            group_logical_op: None,
        };
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["groupLogicalOp"], "");
        assert_eq!(json["conditions"][0]["logicalOp"], "");
        assert_eq!(json["conditions"][1]["logicalOp"], "OR");
        assert_eq!(json["conditions"][1]["operator"], "<=");

        let back: QueryGroup = serde_json::from_value(json).unwrap();
        assert_eq!(back, group);
    }

    #[test]
    fn test_missing_operator_field_decodes_as_none() {
        let cond: QueryCondition =
            serde_json::from_str(r#"{"field":"speed","operator":"=","value":"0"}"#).unwrap();
        assert_eq!(cond.logical_op, None);
        assert!(serde_json::from_str::<QueryCondition>(
            r#"{"field":"speed","operator":"=","value":"0","logicalOp":"XOR"}"#
        )
        .is_err());
    }

    #[test]
    fn test_operator_symbols() {
        for op in ComparisonOp::ALL {
            assert_eq!(ComparisonOp::from_symbol(op.as_str()), Some(op));
        }
        assert_eq!(ComparisonOp::from_symbol("=="), None);
    }
}
