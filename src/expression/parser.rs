//! Expression parsing.

use super::{ExprOperator, Expression, ExpressionError, FactKey, Junction, Operand, Target};

const UNSUPPORTED_OPERATOR_CHARS: [char; 3] = ['<', '>', '~'];

pub(super) fn parse(input: &str) -> Result<Expression, ExpressionError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ExpressionError::Empty);
    }

    let Some(eq) = text.find('=') else {
        return Err(match text.find(&UNSUPPORTED_OPERATOR_CHARS[..]) {
            Some(pos) => ExpressionError::UnsupportedOperator {
                operator: text[pos..pos + 1].to_string(),
                expression: text.to_string(),
            },
            None => ExpressionError::MissingOperator(text.to_string()),
        });
    };

    let left = &text[..eq];
    let (key_part, operator) = match left.strip_suffix('!') {
        Some(rest) => (rest.trim(), ExprOperator::NotEquals),
        None => (left.trim(), ExprOperator::Equals),
    };
    if let Some(c) = key_part
        .chars()
        .last()
        .filter(|c| UNSUPPORTED_OPERATOR_CHARS.contains(c))
    {
        return Err(ExpressionError::UnsupportedOperator {
            operator: format!("{}=", c),
            expression: text.to_string(),
        });
    }

    let key = FactKey::parse(key_part)
        .ok_or_else(|| ExpressionError::UnsupportedKey(key_part.to_string()))?;
    let right = text[eq + 1..].trim();
    let (operator, target) = parse_target(key, operator, right, text)?;

    Ok(Expression {
        source: text.to_string(),
        key,
        operator,
        target,
    })
}

fn parse_target(
    key: FactKey,
    operator: ExprOperator,
    right: &str,
    text: &str,
) -> Result<(ExprOperator, Target), ExpressionError> {
    if right.starts_with('{') || right.ends_with('}') {
        if !key.takes_object() {
            return Err(ExpressionError::UnsupportedForm {
                key: key.to_string(),
                form: "object",
            });
        }
        let inner = right
            .strip_prefix('{')
            .and_then(|r| r.strip_suffix('}'))
            .ok_or_else(|| malformed("object", text))?;
        let (name, value) = inner.split_once('=').ok_or_else(|| malformed("object", text))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ExpressionError::MissingName(text.to_string()));
        }
        let mut value = parse_operand(value.trim(), text)?;
        if key == FactKey::UserRole {
            value = role_flag(value, text)?;
        }
        return Ok((
            operator,
            Target::Named {
                name: name.to_string(),
                value,
            },
        ));
    }

    if !key.takes_name() {
        return Ok((operator, Target::Whole(parse_operand(right, text)?)));
    }

    if right.is_empty() {
        return Err(ExpressionError::MissingName(text.to_string()));
    }
    match parse_operand(right, text)? {
        Operand::Single(name) if key == FactKey::Cookie => {
            Ok((operator, Target::Presence(Operand::Single(name))))
        }
        // `key=name` becomes `key!={name=}`
        Operand::Single(name) => Ok((
            operator.negate(),
            Target::Named {
                name,
                value: Operand::Single(String::new()),
            },
        )),
        names => Ok((operator, Target::Presence(names))),
    }
}

fn parse_operand(raw: &str, text: &str) -> Result<Operand, ExpressionError> {
    let Some(inner) = raw.strip_prefix('[') else {
        if raw.contains('[') || raw.contains(']') {
            return Err(malformed("composite", text));
        }
        return Ok(Operand::Single(raw.to_string()));
    };
    let inner = inner
        .strip_suffix(']')
        .ok_or_else(|| malformed("composite", text))?;

    let junction = match (inner.contains('|'), inner.contains('&')) {
        (true, true) => return Err(malformed("composite", text)),
        (false, true) => Junction::And,
        _ => Junction::Or,
    };
    let separator = match junction {
        Junction::And => '&',
        Junction::Or => '|',
    };

    let values: Vec<String> = inner.split(separator).map(|v| v.trim().to_string()).collect();
    if values.iter().any(|v| v.is_empty() || v.contains('[') || v.contains(']')) {
        return Err(malformed("composite", text));
    }
    Ok(Operand::Composite { junction, values })
}

/// Role object values are `true` or `false`, stored lowercase.
fn role_flag(value: Operand, text: &str) -> Result<Operand, ExpressionError> {
    let flag = |v: &str| match v.to_ascii_lowercase().as_str() {
        word @ ("true" | "false") => Ok(word.to_string()),
        _ => Err(malformed("role flag", text)),
    };
    Ok(match value {
        Operand::Single(v) => Operand::Single(flag(v.as_str())?),
        Operand::Composite { junction, values } => Operand::Composite {
            junction,
            values: values
                .iter()
                .map(|v| flag(v.as_str()))
                .collect::<Result<Vec<_>, _>>()?,
        },
    })
}

fn malformed(what: &'static str, text: &str) -> ExpressionError {
    ExpressionError::Malformed {
        what,
        expression: text.to_string(),
    }
}
