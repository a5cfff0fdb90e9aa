//! Round-trip tests for the query grammar
//!
//! Anything built through `QueryBuilder` must serialize to text that parses
//! back into the same structure without diagnostics.

use curio_common::query::{parse, parse_groups, serialize, ComparisonOp, LogicalOp, QueryBuilder, KNOWN_FIELDS};
use proptest::prelude::*;

fn logical_op() -> impl Strategy<Value = LogicalOp> {
    prop_oneof![Just(LogicalOp::And), Just(LogicalOp::Or)]
}

fn comparison_op() -> impl Strategy<Value = ComparisonOp> {
    prop::sample::select(ComparisonOp::ALL.to_vec())
}

fn field() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(KNOWN_FIELDS.to_vec()).prop_map(str::to_string),
        "[A-Za-z_][A-Za-z0-9_]{0,12}",
    ]
}

fn value() -> impl Strategy<Value = String> {
    prop_oneof![
        "-?[0-9]{1,4}(\\.[0-9]{1,3})?",
        "[A-Za-z0-9_.:=<>!-]{1,10}",
        "[a-z]{1,5} [a-z]{1,5}",
    ]
}

/// Steps replayed against a builder: (group op, [(cond op, field, operator, value)])
type Plan = Vec<(LogicalOp, Vec<(LogicalOp, String, ComparisonOp, String)>)>;

fn plan() -> impl Strategy<Value = Plan> {
    prop::collection::vec(
        (
            logical_op(),
            prop::collection::vec((logical_op(), field(), comparison_op(), value()), 0..5),
        ),
        0..5,
    )
}

fn build(plan: Plan) -> QueryBuilder {
    let mut builder = QueryBuilder::new();
    for (group_op, conditions) in plan {
        let group = builder.add_group(group_op);
        for (op, field, operator, value) in conditions {
            // Values the grammar cannot carry are rejected by the builder
            let _ = builder.add_condition(group, op, &field, operator, &value);
        }
    }
    builder
}

proptest! {
    #[test]
    fn built_queries_round_trip(plan in plan()) {
        let builder = build(plan);
        let text = builder.build();
        let parsed = parse(&text);
        prop_assert!(parsed.is_clean(), "diagnostics for {:?}: {:?}", text, parsed.diagnostics);
        prop_assert_eq!(parsed.groups.as_slice(), builder.groups(), "text: {}", text);
    }

    #[test]
    fn serialization_is_stable(plan in plan()) {
        let text = build(plan).build();
        prop_assert_eq!(serialize(&parse_groups(&text)), text);
    }

    #[test]
    fn parser_never_panics(text in "[ -~]{0,200}") {
        let _ = parse(&text);
    }
}

#[test]
fn test_single_condition_round_trip() {
    let mut builder = QueryBuilder::new();
    builder.add_group(LogicalOp::And);
    builder
        .add_condition(0, LogicalOp::And, "speed", ComparisonOp::Gt, "50")
        .unwrap();

    let text = builder.build();
    assert_eq!(text, "(speed > 50)");

    let groups = parse_groups(&text);
    assert_eq!(groups.len(), 1);
    let cond = &groups[0].conditions[0];
    assert_eq!(cond.field, "speed");
    assert_eq!(cond.operator, ComparisonOp::Gt);
    assert_eq!(cond.value, "50");
    assert_eq!(cond.logical_op, None);
    assert_eq!(groups[0].group_logical_op, None);
}

#[test]
fn test_nested_operators_and_groups() {
    let text = "(speed >= 80 AND acceleration < -3) OR (TTC <= 1.5 OR brake_status != 0)";
    let parsed = parse(text);
    assert!(parsed.is_clean());
    assert_eq!(parsed.groups.len(), 2);
    assert_eq!(parsed.groups[1].group_logical_op, Some(LogicalOp::Or));
    assert_eq!(parsed.groups[1].conditions[1].logical_op, Some(LogicalOp::Or));
    assert_eq!(serialize(&parsed.groups), text);

    let builder = QueryBuilder::from_groups(parsed.groups).unwrap();
    assert_eq!(builder.build(), text);
}
