//! Request condition expressions.
//!
//! An expression has the shape `key OPERATOR right`, for example
//! `web.request.header={Content-Type=text/plain}`. The key names one request
//! fact from a closed set, the operator is `=` or `!=`, and the right-hand side
//! takes one of three forms:
//!
//! - object form `{name=value}` for keys that need a sub-name
//!   (header, cookie, attribute, parameter), and for role as
//!   `{ROLE=true|false}`;
//! - name-only form `name` for header, attribute and parameter, true when the
//!   named fact is present and non-empty; for cookie, true when the cookie is
//!   present at all;
//! - value-only form `value` for keys without a sub-name (locale, remote
//!   address, uri, session id, principal, auth scheme). For role the bare
//!   value is a membership test.
//!
//! Locale tags compare with `_` and `-` treated as the same separator, so
//! `en_US` matches a request locale of `en-US`. Case is significant.
//!
//! Values and names may be composites: `[a|b]` holds if any candidate holds,
//! `[a&b]` if every candidate holds.
//!
//! Expressions are parsed eagerly; all syntax and key/form errors surface from
//! [`Expression::parse`].

mod parser;
mod resolve;

use std::fmt;
use thiserror::Error;

pub use resolve::{FactValue, Resolved};

/// Errors raised while parsing an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("no operator in '{0}'")]
    MissingOperator(String),

    #[error("unsupported operator '{operator}' in '{expression}'")]
    UnsupportedOperator { operator: String, expression: String },

    #[error("unsupported key '{0}'")]
    UnsupportedKey(String),

    #[error("key '{key}' does not accept the {form} form")]
    UnsupportedForm { key: String, form: &'static str },

    #[error("malformed {what} in '{expression}'")]
    Malformed { what: &'static str, expression: String },

    #[error("missing name in '{0}'")]
    MissingName(String),
}

/// The request facts an expression can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactKey {
    Attribute,
    AuthScheme,
    Cookie,
    Header,
    Parameter,
    RemoteAddress,
    Locale,
    UserRole,
    UserPrincipal,
    RequestUri,
    SessionId,
}

impl FactKey {
    pub const ALL: [FactKey; 11] = [
        FactKey::Attribute,
        FactKey::AuthScheme,
        FactKey::Cookie,
        FactKey::Header,
        FactKey::Parameter,
        FactKey::RemoteAddress,
        FactKey::Locale,
        FactKey::UserRole,
        FactKey::UserPrincipal,
        FactKey::RequestUri,
        FactKey::SessionId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactKey::Attribute => "web.request.attribute",
            FactKey::AuthScheme => "web.request.auth.scheme",
            FactKey::Cookie => "web.request.cookie",
            FactKey::Header => "web.request.header",
            FactKey::Parameter => "web.request.parameter",
            FactKey::RemoteAddress => "web.request.ip",
            FactKey::Locale => "web.request.locale",
            FactKey::UserRole => "web.session.user.role",
            FactKey::UserPrincipal => "web.session.user.principal",
            FactKey::RequestUri => "web.request.uri",
            FactKey::SessionId => "web.session.id",
        }
    }

    pub fn parse(key: &str) -> Option<FactKey> {
        FactKey::ALL.into_iter().find(|k| k.as_str() == key)
    }

    /// Keys addressing one of many named facts.
    pub fn takes_name(&self) -> bool {
        matches!(
            self,
            FactKey::Attribute | FactKey::Cookie | FactKey::Header | FactKey::Parameter
        )
    }

    /// Keys accepting the `{name=value}` form.
    pub fn takes_object(&self) -> bool {
        self.takes_name() || *self == FactKey::UserRole
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `=` or `!=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprOperator {
    Equals,
    NotEquals,
}

impl ExprOperator {
    pub fn negate(self) -> Self {
        match self {
            ExprOperator::Equals => ExprOperator::NotEquals,
            ExprOperator::NotEquals => ExprOperator::Equals,
        }
    }

    /// Apply the operator to the outcome of the equality test.
    pub fn apply(self, equal: bool) -> bool {
        match self {
            ExprOperator::Equals => equal,
            ExprOperator::NotEquals => !equal,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ExprOperator::Equals => "=",
            ExprOperator::NotEquals => "!=",
        }
    }
}

/// How the candidates of a composite combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Junction {
    And,
    Or,
}

/// A literal or a bracketed composite of literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Single(String),
    Composite { junction: Junction, values: Vec<String> },
}

impl Operand {
    pub fn candidates(&self) -> &[String] {
        match self {
            Operand::Single(v) => std::slice::from_ref(v),
            Operand::Composite { values, .. } => values,
        }
    }

    pub fn junction(&self) -> Junction {
        match self {
            Operand::Single(_) => Junction::Or,
            Operand::Composite { junction, .. } => *junction,
        }
    }
}

/// The parsed right-hand side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Value-only form: the whole fact is compared
    Whole(Operand),
    /// Object form, and name-only form with a single name after flipping to
    /// a not-equals-empty test
    Named { name: String, value: Operand },
    /// Name-only form with a composite of names, or any cookie name
    Presence(Operand),
}

/// A parsed, immutable condition expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    source: String,
    key: FactKey,
    operator: ExprOperator,
    target: Target,
}

impl Expression {
    /// Parse an expression, rejecting unsupported keys and forms.
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        parser::parse(input)
    }

    pub fn key(&self) -> FactKey {
        self.key
    }

    pub fn operator(&self) -> ExprOperator {
        self.operator
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The text this expression was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
