//! Equality-based label selectors as accepted by [`super::ObjectStore::list`]
//!
//! Supports `key=value`, `key==value`, `key!=value`, `key` and `!key`,
//! joined by commas. Set-based requirements are rejected.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse `raw`; an empty selector matches everything
    pub fn parse(raw: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            requirements.push(parse_term(raw, term)?);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let get = |key: &str| labels.and_then(|l| l.get(key));
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(key, value) => get(key) == Some(value),
            Requirement::NotEquals(key, value) => get(key) != Some(value),
            Requirement::Exists(key) => get(key).is_some(),
            Requirement::NotExists(key) => get(key).is_none(),
        })
    }
}

fn parse_term(raw: &str, term: &str) -> Result<Requirement> {
    let invalid = |message: &str| {
        Error::ValidationError(format!("invalid label selector {raw:?}: {message}"))
    };

    let (key, req) = if let Some((key, value)) = term.split_once("!=") {
        (key, Requirement::NotEquals(key.trim().to_string(), value.trim().to_string()))
    } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        (key, Requirement::Equals(key.trim().to_string(), value.trim().to_string()))
    } else if let Some(key) = term.strip_prefix('!') {
        (key, Requirement::NotExists(key.trim().to_string()))
    } else if term.contains(' ') || term.contains('(') {
        return Err(invalid("set-based requirements are not supported"));
    } else {
        (term, Requirement::Exists(term.to_string()))
    };

    if key.trim().is_empty() {
        return Err(invalid("empty key"));
    }
    Ok(req)
}
