//! Label selectors: `a=b`, `a!=b`, `a in (x,y)`, `a notin (x)`, `a`, `!a`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid selector term {0:?}")]
    InvalidTerm(String),
    #[error("unknown selector operator {0:?}")]
    UnknownOperator(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, set) => labels.get(k).map_or(false, |v| set.contains(v)),
            Requirement::NotIn(k, set) => labels.get(k).map_or(true, |v| !set.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::In(k, set) => write!(f, "{} in ({})", k, join(set)),
            Requirement::NotIn(k, set) => write!(f, "{} notin ({})", k, join(set)),
            Requirement::Exists(k) => f.write_str(k),
            Requirement::DoesNotExist(k) => write!(f, "!{}", k),
        }
    }
}

/// Conjunction of requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn new(requirements: Vec<Requirement>) -> Self {
        Self { requirements }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn from_label_selector(sel: &LabelSelector) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for (k, v) in sel.match_labels.iter().flatten() {
            requirements.push(Requirement::Equals(k.clone(), v.clone()));
        }
        for expr in sel.match_expressions.iter().flatten() {
            let values = || expr.values.iter().flatten().cloned().collect::<BTreeSet<_>>();
            let req = match expr.operator.as_str() {
                "In" => Requirement::In(expr.key.clone(), values()),
                "NotIn" => Requirement::NotIn(expr.key.clone(), values()),
                "Exists" => Requirement::Exists(expr.key.clone()),
                "DoesNotExist" => Requirement::DoesNotExist(expr.key.clone()),
                other => return Err(SelectorError::UnknownOperator(other.to_string())),
            };
            requirements.push(req);
        }
        Ok(Self { requirements })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let requirements = split_terms(s)
            .into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(parse_term)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }
}

/// Split on commas outside parentheses.
fn split_terms(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn parse_term(term: &str) -> Result<Requirement, SelectorError> {
    let invalid = || SelectorError::InvalidTerm(term.to_string());
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(key_of(key).ok_or_else(invalid)?));
    }
    if let Some((key, set)) = term.split_once(" notin ") {
        return Ok(Requirement::NotIn(key_of(key).ok_or_else(invalid)?, set_of(set).ok_or_else(invalid)?));
    }
    if let Some((key, set)) = term.split_once(" in ") {
        return Ok(Requirement::In(key_of(key).ok_or_else(invalid)?, set_of(set).ok_or_else(invalid)?));
    }
    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(key_of(key).ok_or_else(invalid)?, value_of(value).ok_or_else(invalid)?));
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(key_of(key).ok_or_else(invalid)?, value_of(value).ok_or_else(invalid)?));
    }
    Ok(Requirement::Exists(key_of(term).ok_or_else(invalid)?))
}

fn key_of(raw: &str) -> Option<String> {
    let key = raw.trim();
    if key.is_empty() || key.contains(char::is_whitespace) || key.contains(['(', ')', '=', '!']) {
        return None;
    }
    Some(key.to_string())
}

fn value_of(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.contains(char::is_whitespace) || value.contains(['(', ')', '=', '!', ',']) {
        return None;
    }
    Some(value.to_string())
}

fn set_of(raw: &str) -> Option<BTreeSet<String>> {
    let inner = raw.trim().strip_prefix('(')?.strip_suffix(')')?;
    inner.split(',').map(value_of).collect()
}
