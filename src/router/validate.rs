//! Response validators.
//!
//! A validator is a predicate over the raw text of a response. A rejection
//! counts as a failed attempt, exactly like a transport error.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::adapter::ChannelError;
use crate::error::{Error, Result};

type Check = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Named predicate over response text.
#[derive(Clone)]
pub struct Validator {
    name: String,
    check: Check,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").field("name", &self.name).finish()
    }
}

impl Validator {
    pub fn from_fn<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the predicate, turning a rejection into [`ChannelError::Validation`].
    pub fn check(&self, text: &str) -> std::result::Result<(), ChannelError> {
        if (self.check)(text) {
            return Ok(());
        }
        let preview: String = text.chars().take(50).collect();
        Err(ChannelError::Validation(format!(
            "{} rejected response: {:?}",
            self.name, preview
        )))
    }

    /// Text contains something other than whitespace.
    pub fn non_empty() -> Self {
        Self::from_fn("non_empty", |text| !text.trim().is_empty())
    }

    /// At least `min` characters.
    pub fn min_len(min: usize) -> Self {
        Self::from_fn(format!("min_len({})", min), move |text| {
            text.chars().count() >= min
        })
    }

    /// Every needle occurs in the text.
    pub fn contains_all(needles: Vec<String>) -> Self {
        Self::from_fn(format!("contains_all({})", needles.join(",")), move |text| {
            needles.iter().all(|n| text.contains(n.as_str()))
        })
    }

    /// None of `phrases` occurs, compared case-insensitively.
    ///
    /// Catches gateway error pages relayed with a 200 status.
    pub fn rejects_any(phrases: Vec<String>) -> Self {
        let lowered: Vec<String> = phrases.iter().map(|p| p.to_lowercase()).collect();
        Self::from_fn(format!("rejects_any({})", phrases.join(",")), move |text| {
            let text = text.to_lowercase();
            !lowered.iter().any(|p| text.contains(p.as_str()))
        })
    }

    pub fn pattern(regex: Regex) -> Self {
        Self::from_fn(format!("pattern({})", regex.as_str()), move |text| {
            regex.is_match(text)
        })
    }

    /// Text parses as a JSON object, optionally wrapped in a Markdown code fence.
    pub fn json_object() -> Self {
        Self::from_fn("json_object", |text| parse_json_object(text).is_some())
    }

    /// Text is a JSON object holding every one of `fields` at the top level.
    pub fn json_with_fields(fields: Vec<String>) -> Self {
        Self::from_fn(format!("json_with_fields({})", fields.join(",")), move |text| {
            parse_json_object(text)
                .map(|obj| fields.iter().all(|f| obj.contains_key(f)))
                .unwrap_or(false)
        })
    }

    /// Both predicates must accept.
    pub fn and(self, other: Validator) -> Self {
        let name = format!("{} && {}", self.name, other.name);
        let (left, right) = (self.check, other.check);
        Self {
            name,
            check: Arc::new(move |text| left(text) && right(text)),
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(strip_code_fence(text)) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Declarative validator accepted over HTTP. All set conditions must hold.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorSpec {
    #[serde(default)]
    pub non_empty: bool,
    pub min_len: Option<usize>,
    #[serde(default)]
    pub contains_all: Vec<String>,
    #[serde(default)]
    pub rejects_any: Vec<String>,
    pub pattern: Option<String>,
    #[serde(default)]
    pub json_object: bool,
    #[serde(default)]
    pub json_fields: Vec<String>,
}

impl ValidatorSpec {
    /// Compile into a [`Validator`]; `None` when no condition is set.
    pub fn build(&self) -> Result<Option<Validator>> {
        let mut parts = Vec::new();

        if self.non_empty {
            parts.push(Validator::non_empty());
        }
        if let Some(min) = self.min_len {
            parts.push(Validator::min_len(min));
        }
        if !self.contains_all.is_empty() {
            parts.push(Validator::contains_all(self.contains_all.clone()));
        }
        if !self.rejects_any.is_empty() {
            parts.push(Validator::rejects_any(self.rejects_any.clone()));
        }
        if let Some(pattern) = &self.pattern {
            let regex = Regex::new(pattern)
                .map_err(|e| Error::BadRequest(format!("invalid validator pattern: {}", e)))?;
            parts.push(Validator::pattern(regex));
        }
        if !self.json_fields.is_empty() {
            parts.push(Validator::json_with_fields(self.json_fields.clone()));
        } else if self.json_object {
            parts.push(Validator::json_object());
        }

        Ok(parts.into_iter().reduce(Validator::and))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_predicates() {
        assert!(Validator::non_empty().check("x").is_ok());
        assert!(Validator::non_empty().check("  \n").is_err());
        assert!(Validator::min_len(3).check("abc").is_ok());
        assert!(Validator::min_len(3).check("ab").is_err());
        assert!(Validator::contains_all(vec!["title".into()])
            .check("{\"title\": 1}")
            .is_ok());
    }

    #[test]
    fn rejects_gateway_pages() {
        let v = Validator::rejects_any(vec!["Bad Gateway".into(), "<html>".into()]);
        assert!(v.check("A thorough analysis").is_ok());
        assert!(v.check("502 bad gateway").is_err());
        assert!(v.check("<HTML><body>").is_err());
    }

    #[test]
    fn json_validators_accept_fenced_output() {
        let fenced = "```json\n{\"title\": \"T\", \"year\": 2020}\n```";
        assert!(Validator::json_object().check(fenced).is_ok());
        assert!(Validator::json_with_fields(vec!["title".into(), "year".into()])
            .check(fenced)
            .is_ok());
        assert!(Validator::json_with_fields(vec!["authors".into()])
            .check(fenced)
            .is_err());
        assert!(Validator::json_object().check("[1, 2]").is_err());
        assert!(Validator::json_object().check("not json").is_err());
    }

    #[test]
    fn and_requires_both() {
        let v = Validator::contains_all(vec!["title".into()]).and(Validator::min_len(20));
        assert!(v.check("title").is_err());
        assert!(v.check("title and enough trailing text").is_ok());
        assert_eq!(v.name(), "contains_all(title) && min_len(20)");
    }

    #[test]
    fn rejection_is_validation_error() {
        let err = Validator::non_empty().check("").unwrap_err();
        assert!(matches!(err, ChannelError::Validation(msg) if msg.contains("non_empty")));
    }

    #[test]
    fn spec_builds_combined_validator() {
        let spec: ValidatorSpec = serde_json::from_str(
            r#"{"min_len": 5, "pattern": "^\\{", "json_fields": ["title"]}"#,
        )
        .unwrap();
        let v = spec.build().unwrap().unwrap();
        assert!(v.check(r#"{"title": "x"}"#).is_ok());
        assert!(v.check(r#"{"name": "x"}"#).is_err());
    }

    #[test]
    fn empty_spec_builds_nothing() {
        assert!(ValidatorSpec::default().build().unwrap().is_none());
    }

    #[test]
    fn invalid_pattern_is_bad_request() {
        let spec = ValidatorSpec {
            pattern: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(spec.build(), Err(Error::BadRequest(_))));
    }
}
