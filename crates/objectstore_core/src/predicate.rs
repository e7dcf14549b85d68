//! Record predicates and fetch requests.
//!
//! # Responsibility
//! - Express fetch filters and attribute validators with one small
//!   expression language.
//! - Evaluate predicates against any keyed value source.
//!
//! # Invariants
//! - Evaluation never fails: type mismatches make a comparison false.
//! - `Matches` uses whole-string semantics.

use crate::value::Value;
use regex::Regex;
use std::cmp::Ordering;

/// Left-hand side of a comparison.
#[derive(Debug, Clone)]
pub enum Expr {
    /// The value under validation.
    This,
    /// A named attribute or to-one relationship of the subject.
    Key(String),
    /// Character count of a string, byte count of binary data.
    Length(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    True,
    Compare {
        lhs: Expr,
        op: CompareOp,
        rhs: Value,
    },
    In {
        lhs: Expr,
        values: Vec<Value>,
    },
    BeginsWith {
        lhs: Expr,
        prefix: String,
    },
    Contains {
        lhs: Expr,
        needle: String,
    },
    Matches {
        lhs: Expr,
        pattern: Regex,
    },
    IsNull(Expr),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Anything a predicate can be evaluated against.
pub trait Subject {
    /// Value of a named property, or `None` when unset.
    fn value_for_key(&self, key: &str) -> Option<Value>;
}

impl Expr {
    pub fn key(name: impl Into<String>) -> Self {
        Self::Key(name.into())
    }

    pub fn length(self) -> Self {
        Self::Length(Box::new(self))
    }

    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    pub fn is_in(self, values: impl IntoIterator<Item = Value>) -> Predicate {
        Predicate::In {
            lhs: self,
            values: values.into_iter().collect(),
        }
    }

    pub fn begins_with(self, prefix: impl Into<String>) -> Predicate {
        Predicate::BeginsWith {
            lhs: self,
            prefix: prefix.into(),
        }
    }

    pub fn contains(self, needle: impl Into<String>) -> Predicate {
        Predicate::Contains {
            lhs: self,
            needle: needle.into(),
        }
    }

    /// Whole-string regex match.
    ///
    /// The pattern is anchored on both ends before compiling.
    pub fn matches(self, pattern: &str) -> Result<Predicate, regex::Error> {
        let anchored = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Predicate::Matches {
            lhs: self,
            pattern: anchored,
        })
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self)
    }

    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            lhs: self,
            op,
            rhs: value.into(),
        }
    }

    fn resolve(&self, this: Option<&Value>, subject: &dyn Subject) -> Value {
        match self {
            Self::This => this.cloned().unwrap_or_default(),
            Self::Key(key) => subject.value_for_key(key).unwrap_or_default(),
            Self::Length(inner) => match inner.resolve(this, subject) {
                Value::String(text) => Value::Integer(text.chars().count() as i64),
                Value::Binary(bytes) => Value::Integer(bytes.len() as i64),
                _ => Value::Null,
            },
        }
    }
}

impl Predicate {
    /// Shorthand for `Expr::key(name)`.
    pub fn key(name: impl Into<String>) -> Expr {
        Expr::key(name)
    }

    /// Shorthand for `Expr::This`.
    pub fn this() -> Expr {
        Expr::This
    }

    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        Self::Not(Box::new(self))
    }

    /// Evaluates against a subject with no bound `This` value.
    pub fn evaluate(&self, subject: &dyn Subject) -> bool {
        self.evaluate_with(None, subject)
    }

    /// Evaluates with `This` bound to `this`.
    pub fn evaluate_with(&self, this: Option<&Value>, subject: &dyn Subject) -> bool {
        match self {
            Self::True => true,
            Self::Compare { lhs, op, rhs } => {
                let left = lhs.resolve(this, subject);
                compare(&left, *op, rhs)
            }
            Self::In { lhs, values } => {
                let left = lhs.resolve(this, subject);
                values
                    .iter()
                    .any(|value| compare(&left, CompareOp::Eq, value))
            }
            Self::BeginsWith { lhs, prefix } => match lhs.resolve(this, subject) {
                Value::String(text) => text.starts_with(prefix.as_str()),
                _ => false,
            },
            Self::Contains { lhs, needle } => match lhs.resolve(this, subject) {
                Value::String(text) => text.contains(needle.as_str()),
                _ => false,
            },
            Self::Matches { lhs, pattern } => match lhs.resolve(this, subject) {
                Value::String(text) => pattern.is_match(&text),
                _ => false,
            },
            Self::IsNull(expr) => expr.resolve(this, subject).is_null(),
            Self::And(parts) => parts.iter().all(|part| part.evaluate_with(this, subject)),
            Self::Or(parts) => parts.iter().any(|part| part.evaluate_with(this, subject)),
            Self::Not(inner) => !inner.evaluate_with(this, subject),
        }
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        let both_null = left.is_null() && right.is_null();
        return match op {
            CompareOp::Eq => both_null,
            CompareOp::Ne => !both_null,
            _ => false,
        };
    }
    let Some(ordering) = left.compare(right) else {
        return op == CompareOp::Ne;
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// Sort key for fetch results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

/// Fetch options for one entity.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub entity: String,
    pub predicate: Option<Predicate>,
    pub sort: Vec<SortDescriptor>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDescriptor {
            key: key.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn matches(&self, subject: &dyn Subject) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.evaluate(subject))
    }

    /// Orders two subjects by the sort descriptors; ties stay in input order.
    pub(crate) fn order(&self, left: &dyn Subject, right: &dyn Subject) -> Ordering {
        for descriptor in &self.sort {
            let left_value = left.value_for_key(&descriptor.key).unwrap_or_default();
            let right_value = right.value_for_key(&descriptor.key).unwrap_or_default();
            let ordering = left_value
                .compare(&right_value)
                .unwrap_or(Ordering::Equal);
            let ordering = if descriptor.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}
