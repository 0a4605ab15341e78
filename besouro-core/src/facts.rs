//! Fact projection
//!
//! Turns the buffered actions of one episode window into the facts the rule
//! engine reasons over. One fact per action; the `index` slot carries the
//! 1-based position in the buffer so temporal rules can order actions.
//!
//! | Template | Slots |
//! |----------|-------|
//! | `edit` | index, timestamp, path, is_test, size, size_increase, methods, method_increase, statements, statement_increase, test_assertions, test_assertion_increase, test_methods, test_method_increase, linked |
//! | `file-open` | index, timestamp, path, size |
//! | `unit-test-case` | index, timestamp, name, success |
//! | `unit-test-session` | index, timestamp, success |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{Action, FileAction};

pub const EDIT: &str = "edit";
pub const FILE_OPEN: &str = "file-open";
pub const UNIT_TEST_CASE: &str = "unit-test-case";
pub const UNIT_TEST_SESSION: &str = "unit-test-session";

/// A slot value. Rules compare integers, booleans and strings only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Int(_) | Value::Bool(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// Sizes and counters above `i64::MAX` have no slot representation.
impl TryFrom<u64> for Value {
    type Error = Error;

    fn try_from(n: u64) -> Result<Self> {
        i64::try_from(n)
            .map(Value::Int)
            .map_err(|_| Error::Inference(format!("{n} does not fit an integer slot")))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl TryFrom<usize> for Value {
    type Error = Error;

    fn try_from(n: usize) -> Result<Self> {
        Value::try_from(n as u64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// An ordered fact: template name plus a complete slot map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    pub template: String,
    pub slots: BTreeMap<String, Value>,
}

impl Fact {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            slots: BTreeMap::new(),
        }
    }

    pub fn with(mut self, slot: &str, value: impl Into<Value>) -> Self {
        self.slots.insert(slot.to_string(), value.into());
        self
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }
}

impl std::fmt::Display for Fact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}", self.template)?;
        for (slot, value) in &self.slots {
            write!(f, " ({slot} {value})")?;
        }
        write!(f, ")")
    }
}

/// Project one action at its 1-based buffer position.
///
/// Fails with [`Error::Inference`] when a size or increase does not fit an
/// integer slot.
pub fn project_action(index: usize, action: &Action) -> Result<Fact> {
    let timestamp = action.timestamp().timestamp_millis();
    let index = Value::try_from(index)?;
    let fact = match action {
        Action::Edit(edit) => Fact::new(EDIT)
            .with("index", index)
            .with("timestamp", timestamp)
            .with("path", edit.path.as_str())
            .with("is_test", edit.is_test)
            .with("size", Value::try_from(edit.size)?)
            .with("size_increase", Value::try_from(edit.size_increase())?)
            .with("methods", edit.structure.methods)
            .with("method_increase", Value::try_from(edit.method_increase())?)
            .with("statements", edit.structure.statements)
            .with("statement_increase", Value::try_from(edit.statement_increase())?)
            .with("test_assertions", edit.structure.test_assertions)
            .with(
                "test_assertion_increase",
                Value::try_from(edit.test_assertion_increase())?,
            )
            .with("test_methods", edit.structure.test_methods)
            .with(
                "test_method_increase",
                Value::try_from(edit.test_method_increase())?,
            )
            .with("linked", edit.previous_action().is_some()),
        Action::FileOpened(open) => Fact::new(FILE_OPEN)
            .with("index", index)
            .with("timestamp", timestamp)
            .with("path", open.path.as_str())
            .with("size", Value::try_from(open.size)?),
        Action::UnitTestCase(case) => Fact::new(UNIT_TEST_CASE)
            .with("index", index)
            .with("timestamp", timestamp)
            .with("name", case.test_name.as_str())
            .with("success", case.successful),
        Action::UnitTestSession(session) => Fact::new(UNIT_TEST_SESSION)
            .with("index", index)
            .with("timestamp", timestamp)
            .with("success", session.successful),
    };
    Ok(fact)
}

/// Project a whole buffer, preserving order.
pub fn project(actions: &[Action]) -> Result<Vec<Fact>> {
    actions
        .iter()
        .enumerate()
        .map(|(i, action)| project_action(i + 1, action))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ActionLinker;
    use crate::types::{EditAction, StructureMetrics, UnitTestCaseAction, UnitTestSessionAction};
    use chrono::{TimeZone, Utc};

    fn buffer() -> Vec<Action> {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut linker = ActionLinker::new();
        let mut actions: Vec<Action> = vec![
            EditAction::new(ts, "src/FooTest.java")
                .with_size(40)
                .with_test(true)
                .into(),
            EditAction::new(ts, "src/FooTest.java")
                .with_size(90)
                .with_test(true)
                .with_structure(StructureMetrics {
                    test_methods: 1,
                    test_assertions: 2,
                    ..Default::default()
                })
                .into(),
            UnitTestCaseAction::new(ts, "FooTest.testBar", false).into(),
            UnitTestSessionAction::new(ts, true).into(),
        ];
        for action in &mut actions {
            linker.link(action).unwrap();
        }
        actions
    }

    #[test]
    fn test_indices_are_one_based_and_ordered() {
        let facts = project(&buffer()).unwrap();
        let indices: Vec<_> = facts.iter().map(|f| f.get("index").cloned()).collect();
        assert_eq!(
            indices,
            vec![
                Some(Value::Int(1)),
                Some(Value::Int(2)),
                Some(Value::Int(3)),
                Some(Value::Int(4))
            ]
        );
        let templates: Vec<_> = facts.iter().map(|f| f.template.as_str()).collect();
        assert_eq!(templates, vec![EDIT, EDIT, UNIT_TEST_CASE, UNIT_TEST_SESSION]);
    }

    #[test]
    fn test_edit_fact_carries_increases() {
        let facts = project(&buffer()).unwrap();
        let second = &facts[1];
        assert_eq!(second.get("size_increase"), Some(&Value::Int(50)));
        assert_eq!(second.get("test_method_increase"), Some(&Value::Int(1)));
        assert_eq!(second.get("test_assertion_increase"), Some(&Value::Int(2)));
        assert_eq!(second.get("is_test"), Some(&Value::Bool(true)));
        assert_eq!(second.get("linked"), Some(&Value::Bool(true)));
        assert_eq!(facts[0].get("linked"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_projection_is_repeatable() {
        let actions = buffer();
        assert_eq!(project(&actions).unwrap(), project(&actions).unwrap());
    }

    #[test]
    fn test_fact_display() {
        let fact = Fact::new(UNIT_TEST_SESSION)
            .with("index", 3i64)
            .with("success", true);
        assert_eq!(fact.to_string(), "(unit-test-session (index 3) (success true))");
    }

    #[test]
    fn test_oversized_edit_is_rejected() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut linker = ActionLinker::new();
        let mut actions: Vec<Action> = vec![
            EditAction::new(ts, "src/Huge.java").with_size(10).into(),
            EditAction::new(ts, "src/Huge.java").with_size(u64::MAX).into(),
        ];
        for action in &mut actions {
            linker.link(action).unwrap();
        }

        assert!(project_action(1, &actions[0]).is_ok());
        let err = project(&actions).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert!(err.to_string().contains(&u64::MAX.to_string()), "{err}");
    }

    #[test]
    fn test_value_conversions_are_checked() {
        assert_eq!(Value::try_from(42u64).unwrap(), Value::Int(42));
        assert_eq!(Value::try_from(i64::MAX as u64).unwrap(), Value::Int(i64::MAX));
        assert!(Value::try_from(i64::MAX as u64 + 1).is_err());
        assert_eq!(Value::try_from(7usize).unwrap(), Value::Int(7));
    }
}
