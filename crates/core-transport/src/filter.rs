//! Content filter expressions.
//!
//! Grammar (case-insensitive keywords):
//!
//! ```text
//! expression := conjunction ( OR conjunction )*
//! conjunction := clause ( AND clause )*
//! clause := field-path '=' literal
//! literal := '&hex(' hex-octets ')' | quoted-text | integer
//! ```
//!
//! Field paths are dotted attribute paths into the sample; `&hex(..)`
//! literals compare against GUID octet sequences. Constant clauses (`1 = 1`,
//! `1 = 0`) are accepted for always/never filters. No parentheses and no
//! negation: destination scoping, the only consumer, needs neither.

use core_guid::{AttributePath, Guid};
use core_message::{Record, Value, get_at_path};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("clause '{0}' is not of the form '<field> = <literal>'")]
    MalformedClause(String),
    #[error("bad hex literal '{0}'")]
    BadHexLiteral(String),
    #[error("empty filter expression")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Octets(Vec<u8>),
    Text(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq)]
enum Lhs {
    Field(AttributePath),
    Constant(i64),
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    lhs: Lhs,
    literal: Literal,
}

/// A parsed filter: disjunction of conjunctions of equality clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpression {
    source: String,
    disjuncts: Vec<Vec<Clause>>,
}

impl FilterExpression {
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(FilterError::Empty);
        }
        let mut disjuncts = Vec::new();
        for part in split_keyword(trimmed, "OR") {
            let mut clauses = Vec::new();
            for clause in split_keyword(&part, "AND") {
                clauses.push(parse_clause(clause.trim())?);
            }
            disjuncts.push(clauses);
        }
        Ok(FilterExpression {
            source: trimmed.to_string(),
            disjuncts,
        })
    }

    /// Convenience for the common destination-scoped form:
    /// `field = &hex(<guid octets>)`.
    pub fn field_equals_guid(field: &str, guid: Guid) -> Self {
        let expr = format!("{field} = &hex({})", guid.compact_hex());
        FilterExpression::parse(&expr).expect("generated clause is well-formed")
    }

    /// AND-combine with another expression.
    pub fn and(self, other: FilterExpression) -> Self {
        let expr = format!("{} AND {}", self.source, other.source);
        FilterExpression::parse(&expr).expect("both operands already parsed")
    }

    pub fn matches(&self, sample: &Record) -> bool {
        self.disjuncts
            .iter()
            .any(|clauses| clauses.iter().all(|c| clause_matches(c, sample)))
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split on a bare keyword at the top level, case-insensitively, without
/// touching occurrences inside quoted text.
fn split_keyword(input: &str, keyword: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let tokens: Vec<&str> = input.split(' ').collect();
    for token in tokens {
        if !in_quote && token.eq_ignore_ascii_case(keyword) {
            parts.push(current.trim().to_string());
            current.clear();
            continue;
        }
        if token.matches('\'').count() % 2 == 1 {
            in_quote = !in_quote;
        }
        current.push_str(token);
        current.push(' ');
    }
    parts.push(current.trim().to_string());
    parts
}

fn parse_clause(clause: &str) -> Result<Clause, FilterError> {
    let (lhs, rhs) = clause
        .split_once('=')
        .ok_or_else(|| FilterError::MalformedClause(clause.to_string()))?;
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    if lhs.is_empty() || rhs.is_empty() {
        return Err(FilterError::MalformedClause(clause.to_string()));
    }

    let lhs = match lhs.parse::<i64>() {
        Ok(n) => Lhs::Constant(n),
        Err(_) => Lhs::Field(AttributePath::parse(lhs)),
    };

    let literal = if let Some(body) = rhs
        .strip_prefix("&hex(")
        .and_then(|r| r.strip_suffix(')'))
    {
        Literal::Octets(parse_hex(body).ok_or_else(|| FilterError::BadHexLiteral(rhs.to_string()))?)
    } else if let Some(text) = rhs.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        Literal::Text(text.to_string())
    } else if let Ok(n) = rhs.parse::<i64>() {
        Literal::Integer(n)
    } else {
        return Err(FilterError::MalformedClause(clause.to_string()));
    };

    Ok(Clause { lhs, literal })
}

fn parse_hex(body: &str) -> Option<Vec<u8>> {
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || compact.len() % 2 != 0 {
        return None;
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&compact[i..i + 2], 16).ok())
        .collect()
}

fn clause_matches(clause: &Clause, sample: &Record) -> bool {
    let path = match &clause.lhs {
        Lhs::Constant(n) => {
            return matches!(clause.literal, Literal::Integer(m) if *n == m);
        }
        Lhs::Field(path) => path,
    };
    let Ok(value) = get_at_path(sample, path) else {
        return false;
    };
    match (&clause.literal, value) {
        (Literal::Octets(octets), Value::Guid(g)) => octets.as_slice() == g.octets(),
        (Literal::Text(t), Value::Text(s)) => t == s,
        (Literal::Integer(n), Value::Int(i)) => n == i,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dest_id: Guid, dest_parent: Guid) -> Record {
        Record::new("Cmd")
            .with(
                "destination",
                Value::Struct(
                    Record::new("Identifier")
                        .with("id", Value::Guid(dest_id))
                        .with("parentID", Value::Guid(dest_parent)),
                ),
            )
            .with("label", Value::Text("alpha".into()))
            .with("priority", Value::Int(3))
    }

    #[test]
    fn hex_clause_matches_guid_octets() {
        let id = Guid::from_octets([0xab; 16]);
        let f = FilterExpression::field_equals_guid("destination.id", id);
        assert!(f.matches(&sample(id, Guid::NIL)));
        assert!(!f.matches(&sample(Guid::from_octets([1; 16]), Guid::NIL)));
    }

    #[test]
    fn and_requires_both_sides() {
        let id = Guid::from_octets([1; 16]);
        let parent = Guid::from_octets([2; 16]);
        let f = FilterExpression::field_equals_guid("destination.parentID", parent)
            .and(FilterExpression::field_equals_guid("destination.id", id));
        assert!(f.matches(&sample(id, parent)));
        assert!(!f.matches(&sample(id, Guid::NIL)), "parent mismatch rejects");
    }

    #[test]
    fn or_accepts_either_side() {
        let f = FilterExpression::parse("label = 'alpha' OR priority = 9").expect("parses");
        assert!(f.matches(&sample(Guid::NIL, Guid::NIL)));
        let f = FilterExpression::parse("label = 'beta' OR priority = 9").expect("parses");
        assert!(!f.matches(&sample(Guid::NIL, Guid::NIL)));
    }

    #[test]
    fn constant_clauses() {
        let always = FilterExpression::parse("1 = 1").expect("parses");
        assert!(always.matches(&sample(Guid::NIL, Guid::NIL)));
        let never = FilterExpression::parse("1 = 0").expect("parses");
        assert!(!never.matches(&sample(Guid::NIL, Guid::NIL)));
    }

    #[test]
    fn missing_field_never_matches() {
        let f = FilterExpression::parse("nosuch.field = 1").expect("parses");
        assert!(!f.matches(&sample(Guid::NIL, Guid::NIL)));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(matches!(
            FilterExpression::parse("").unwrap_err(),
            FilterError::Empty
        ));
        assert!(matches!(
            FilterExpression::parse("destination.id &hex(00)").unwrap_err(),
            FilterError::MalformedClause(_)
        ));
        assert!(matches!(
            FilterExpression::parse("destination.id = &hex(zz)").unwrap_err(),
            FilterError::BadHexLiteral(_)
        ));
    }
}
