//! Evaluating expressions against request facts.

use super::{Expression, FactKey, Junction, Operand, Target};
use crate::request::RequestFacts;

/// A fact as read from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactValue {
    Absent,
    Single(String),
    Multi(Vec<String>),
    /// Outcome of a per-candidate test (roles, presence)
    Flag(bool),
}

impl FactValue {
    fn from_option(value: Option<String>) -> Self {
        value.map_or(FactValue::Absent, FactValue::Single)
    }

    fn contains(&self, candidate: &str) -> bool {
        match self {
            FactValue::Absent => candidate.is_empty(),
            FactValue::Single(v) => v == candidate,
            FactValue::Multi(values) if values.is_empty() => candidate.is_empty(),
            FactValue::Multi(values) => values.iter().any(|v| v == candidate),
            FactValue::Flag(flag) => *flag,
        }
    }

    fn is_present(&self) -> bool {
        !self.contains("")
    }
}

/// An expression's live fact paired with the literal it is compared to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub actual: FactValue,
    pub expected: Operand,
}

impl Resolved {
    /// Whether the equality test holds, before the operator is applied.
    pub fn holds(&self) -> bool {
        if let FactValue::Flag(flag) = self.actual {
            return flag;
        }
        combine(
            self.expected.junction(),
            self.expected.candidates().iter().map(|c| self.actual.contains(c)),
        )
    }
}

fn combine(junction: Junction, mut outcomes: impl Iterator<Item = bool>) -> bool {
    match junction {
        Junction::And => outcomes.all(|o| o),
        Junction::Or => outcomes.any(|o| o),
    }
}

fn normalize_locale(tag: &str) -> String {
    tag.trim().replace('_', "-")
}

fn normalize_operand(operand: &Operand, f: fn(&str) -> String) -> Operand {
    match operand {
        Operand::Single(v) => Operand::Single(f(v)),
        Operand::Composite { junction, values } => Operand::Composite {
            junction: *junction,
            values: values.iter().map(|v| f(v)).collect(),
        },
    }
}

fn named_fact(key: FactKey, name: &str, facts: &dyn RequestFacts) -> FactValue {
    match key {
        FactKey::Header => FactValue::Multi(facts.headers(name)),
        FactKey::Parameter => FactValue::Multi(facts.parameters(name)),
        FactKey::Cookie => FactValue::from_option(facts.cookie(name)),
        FactKey::Attribute => FactValue::from_option(facts.attribute(name)),
        FactKey::UserRole => FactValue::Single(facts.is_user_in_role(name).to_string()),
        _ => FactValue::Absent,
    }
}

fn whole_fact(key: FactKey, facts: &dyn RequestFacts) -> FactValue {
    match key {
        FactKey::AuthScheme => FactValue::from_option(facts.auth_scheme()),
        FactKey::RemoteAddress => FactValue::from_option(facts.remote_address()),
        FactKey::UserPrincipal => FactValue::from_option(facts.user_principal()),
        FactKey::RequestUri => FactValue::Single(facts.request_uri()),
        FactKey::SessionId => FactValue::from_option(facts.session_id()),
        FactKey::Locale => FactValue::Multi(
            facts.locales().iter().map(|l| normalize_locale(l)).collect(),
        ),
        _ => FactValue::Absent,
    }
}

impl Expression {
    /// Read the fact this expression tests from a request.
    pub fn resolve(&self, facts: &dyn RequestFacts) -> Resolved {
        match &self.target {
            Target::Named { name, value } => Resolved {
                actual: named_fact(self.key, name, facts),
                expected: value.clone(),
            },
            Target::Presence(names) => {
                let present = combine(
                    names.junction(),
                    names.candidates().iter().map(|name| match self.key {
                        FactKey::Cookie => facts.cookie(name).is_some(),
                        key => named_fact(key, name, facts).is_present(),
                    }),
                );
                Resolved {
                    actual: FactValue::Flag(present),
                    expected: names.clone(),
                }
            }
            Target::Whole(value) => match self.key {
                FactKey::UserRole => {
                    let in_role = combine(
                        value.junction(),
                        value.candidates().iter().map(|r| facts.is_user_in_role(r)),
                    );
                    Resolved {
                        actual: FactValue::Flag(in_role),
                        expected: value.clone(),
                    }
                }
                FactKey::Locale => Resolved {
                    actual: whole_fact(self.key, facts),
                    expected: normalize_operand(value, normalize_locale),
                },
                key => Resolved {
                    actual: whole_fact(key, facts),
                    expected: value.clone(),
                },
            },
        }
    }

    /// Evaluate the expression against a request.
    pub fn matches(&self, facts: &dyn RequestFacts) -> bool {
        self.operator.apply(self.resolve(facts).holds())
    }
}
