//! Conditional-write predicates.
//!
//! Conditions are evaluated by the store against the current state of the
//! record being written. They are the only concurrency control this crate
//! relies on.

use serde_json::Value;

use crate::record::Record;

/// A predicate over the stored record a write targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    AttributeExists(String),
    AttributeNotExists(String),
    AttributeEquals { name: String, value: Value },
    And(Vec<Condition>),
}

/// A condition rendered into store expression syntax with placeholders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedCondition {
    pub expression: String,
    /// `#placeholder` to attribute name.
    pub names: Vec<(String, String)>,
    /// `:placeholder` to value.
    pub values: Vec<(String, Value)>,
}

impl Condition {
    pub fn exists(name: impl Into<String>) -> Self {
        Self::AttributeExists(name.into())
    }

    pub fn not_exists(name: impl Into<String>) -> Self {
        Self::AttributeNotExists(name.into())
    }

    pub fn equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::AttributeEquals {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Evaluate against the currently stored record, `None` if absent.
    pub fn evaluate(&self, existing: Option<&Record>) -> bool {
        match self {
            Self::AttributeExists(name) => existing.is_some_and(|r| r.contains_key(name)),
            Self::AttributeNotExists(name) => !existing.is_some_and(|r| r.contains_key(name)),
            Self::AttributeEquals { name, value } => {
                existing.and_then(|r| r.get(name)).is_some_and(|v| v == value)
            }
            Self::And(all) => all.iter().all(|c| c.evaluate(existing)),
        }
    }

    /// Render into `attribute_exists(#n0) AND #n1 = :v0` form.
    pub fn render(&self) -> RenderedCondition {
        let mut rendered = RenderedCondition::default();
        let expression = self.render_into(&mut rendered);
        RenderedCondition {
            expression,
            ..rendered
        }
    }

    fn render_into(&self, out: &mut RenderedCondition) -> String {
        match self {
            Self::AttributeExists(name) => {
                format!("attribute_exists({})", name_placeholder(out, name))
            }
            Self::AttributeNotExists(name) => {
                format!("attribute_not_exists({})", name_placeholder(out, name))
            }
            Self::AttributeEquals { name, value } => {
                let name = name_placeholder(out, name);
                let placeholder = format!(":v{}", out.values.len());
                out.values.push((placeholder.clone(), value.clone()));
                format!("{name} = {placeholder}")
            }
            Self::And(all) => all
                .iter()
                .map(|c| match c {
                    Self::And(_) => format!("({})", c.render_into(out)),
                    _ => c.render_into(out),
                })
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

fn name_placeholder(out: &mut RenderedCondition, name: &str) -> String {
    if let Some((placeholder, _)) = out.names.iter().find(|(_, n)| n == name) {
        return placeholder.clone();
    }
    let placeholder = format!("#n{}", out.names.len());
    out.names.push((placeholder.clone(), name.to_string()));
    placeholder
}
