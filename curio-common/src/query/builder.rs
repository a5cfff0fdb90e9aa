//! Structured editing of a query
//!
//! Every mutation keeps the normal form (no operator on the first group or on
//! the first condition of a group, an operator on every other element) and
//! rejects fields and values the text grammar could not carry back.

use super::codec::{serialize, JOIN_OP_REGEX};
use super::{ComparisonOp, LogicalOp, QueryCondition, QueryGroup};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    groups: Vec<QueryGroup>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt existing groups after validating every condition
    pub fn from_groups(groups: Vec<QueryGroup>) -> Result<Self> {
        for group in &groups {
            for cond in &group.conditions {
                validate_field(&cond.field)?;
                validate_value(&cond.value)?;
            }
        }
        let mut builder = Self { groups };
        builder.normalize();
        Ok(builder)
    }

    pub fn groups(&self) -> &[QueryGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<QueryGroup> {
        self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Query text for the current structure
    pub fn build(&self) -> String {
        serialize(&self.groups)
    }

    /// Append an empty group; `op` joins it to the previous group and is
    /// ignored for the first one. Returns the new group's index.
    pub fn add_group(&mut self, op: LogicalOp) -> usize {
        let group_logical_op = if self.groups.is_empty() { None } else { Some(op) };
        self.groups.push(QueryGroup {
            conditions: Vec::new(),
            group_logical_op,
        });
        self.groups.len() - 1
    }

    pub fn remove_group(&mut self, group: usize) -> Result<QueryGroup> {
        self.group_mut(group)?;
        let removed = self.groups.remove(group);
        self.normalize();
        Ok(removed)
    }

    pub fn set_group_op(&mut self, group: usize, op: LogicalOp) -> Result<()> {
        if group == 0 {
            return Err(Error::InvalidInput("the first group has no operator".to_string()));
        }
        self.group_mut(group)?.group_logical_op = Some(op);
        Ok(())
    }

    /// Append a condition to `group`; `op` joins it to the previous condition
    /// and is ignored for the first one. Returns the condition's index.
    pub fn add_condition(
        &mut self,
        group: usize,
        op: LogicalOp,
        field: &str,
        operator: ComparisonOp,
        value: &str,
    ) -> Result<usize> {
        validate_field(field)?;
        validate_value(value)?;
        let conditions = &mut self.group_mut(group)?.conditions;
        let logical_op = if conditions.is_empty() { None } else { Some(op) };
        conditions.push(QueryCondition {
            field: field.to_string(),
            operator,
            value: value.to_string(),
            logical_op,
        });
        Ok(conditions.len() - 1)
    }

    pub fn remove_condition(&mut self, group: usize, condition: usize) -> Result<QueryCondition> {
        let conditions = &mut self.group_mut(group)?.conditions;
        if condition >= conditions.len() {
            return Err(Error::NotFound(format!("condition {} in group {}", condition, group)));
        }
        let removed = conditions.remove(condition);
        self.normalize();
        Ok(removed)
    }

    /// Replace a condition's field, operator and value, keeping its position
    /// and joining operator
    pub fn update_condition(
        &mut self,
        group: usize,
        condition: usize,
        field: &str,
        operator: ComparisonOp,
        value: &str,
    ) -> Result<()> {
        validate_field(field)?;
        validate_value(value)?;
        let cond = self.condition_mut(group, condition)?;
        cond.field = field.to_string();
        cond.operator = operator;
        cond.value = value.to_string();
        Ok(())
    }

    pub fn set_condition_op(&mut self, group: usize, condition: usize, op: LogicalOp) -> Result<()> {
        if condition == 0 {
            return Err(Error::InvalidInput(
                "the first condition of a group has no operator".to_string(),
            ));
        }
        self.condition_mut(group, condition)?.logical_op = Some(op);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.groups.clear();
    }

    fn group_mut(&mut self, group: usize) -> Result<&mut QueryGroup> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| Error::NotFound(format!("group {}", group)))
    }

    fn condition_mut(&mut self, group: usize, condition: usize) -> Result<&mut QueryCondition> {
        self.group_mut(group)?
            .conditions
            .get_mut(condition)
            .ok_or_else(|| Error::NotFound(format!("condition {} in group {}", condition, group)))
    }

    fn normalize(&mut self) {
        for (gi, group) in self.groups.iter_mut().enumerate() {
            if gi == 0 {
                group.group_logical_op = None;
            } else if group.group_logical_op.is_none() {
                group.group_logical_op = Some(LogicalOp::And);
            }
            for (ci, cond) in group.conditions.iter_mut().enumerate() {
                if ci == 0 {
                    cond.logical_op = None;
                } else if cond.logical_op.is_none() {
                    cond.logical_op = Some(LogicalOp::And);
                }
            }
        }
    }
}

fn validate_field(field: &str) -> Result<()> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidInput(format!(
            "field must be letters, digits or underscores: {:?}",
            field
        )));
    }
    if LogicalOp::from_keyword(field).is_some() {
        return Err(Error::InvalidInput(format!("field cannot be a keyword: {}", field)));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<()> {
    if value.is_empty() || value.trim() != value {
        return Err(Error::InvalidInput(format!(
            "value must be non-empty without surrounding whitespace: {:?}",
            value
        )));
    }
    if value.contains(['(', ')']) || value.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidInput(format!(
            "value cannot contain parentheses or control characters: {:?}",
            value
        )));
    }
    if JOIN_OP_REGEX.is_match(value) {
        return Err(Error::InvalidInput(format!(
            "value cannot contain a standalone AND/OR: {:?}",
            value
        )));
    }
    Ok(())
}
