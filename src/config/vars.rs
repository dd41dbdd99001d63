//! `${VAR}` interpolation for YAML configuration files.
//!
//! Recognised forms:
//! - `$NAME` and `${NAME}` require the variable to be set
//! - `${NAME:-fallback}` uses the fallback when unset or empty
//! - `${NAME-fallback}` uses the fallback only when unset
//! - `$$` produces a literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::EnvLookup;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        | \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<fallback>[^}]*) )? \}
        | \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("placeholder pattern is valid")
});

/// Substitute every placeholder in `input` using `lookup`.
///
/// Problems are collected rather than short-circuited so that one run
/// reports every unset variable.
pub(super) fn interpolate(input: &str, lookup: &dyn EnvLookup) -> Result<String, Vec<String>> {
    let mut problems = Vec::new();

    let output = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        if caps.name("escape").is_some() {
            return "$".to_string();
        }

        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return caps[0].to_string();
        };
        let name = name.as_str();
        let fallback = caps.name("fallback").map(|m| m.as_str());
        let empty_uses_fallback = caps.name("op").is_some_and(|op| op.as_str() == ":-");

        match lookup.get(name) {
            Some(value) if value.contains(['\n', '\r']) => {
                problems.push(format!("variable '{name}' contains a line break"));
                caps[0].to_string()
            }
            Some(value) if value.is_empty() && empty_uses_fallback => {
                fallback.unwrap_or_default().to_string()
            }
            Some(value) => value,
            None => match fallback {
                Some(fallback) => fallback.to_string(),
                None => {
                    problems.push(format!("variable '{name}' is not set"));
                    caps[0].to_string()
                }
            },
        }
    });

    if problems.is_empty() {
        Ok(output.into_owned())
    } else {
        Err(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bare_and_braced() {
        let vars = lookup(&[("CS_TEST_HOST", "kafka"), ("CS_TEST_PORT", "9092")]);
        let out = interpolate("brokers: $CS_TEST_HOST:${CS_TEST_PORT}", &vars).unwrap();
        assert_eq!(out, "brokers: kafka:9092");
    }

    #[test]
    fn test_every_unset_variable_reported() {
        let errors = interpolate("a: $CS_TEST_A, b: ${CS_TEST_B}", &lookup(&[])).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("CS_TEST_A"));
        assert!(errors[1].contains("CS_TEST_B"));
    }

    #[test]
    fn test_fallback_forms() {
        let vars = lookup(&[("CS_TEST_EMPTY", ""), ("CS_TEST_SET", "actual")]);

        assert_eq!(interpolate("${CS_TEST_UNSET:-x}", &vars).unwrap(), "x");
        assert_eq!(interpolate("${CS_TEST_UNSET-x}", &vars).unwrap(), "x");
        assert_eq!(interpolate("${CS_TEST_EMPTY:-x}", &vars).unwrap(), "x");
        assert_eq!(interpolate("${CS_TEST_EMPTY-x}", &vars).unwrap(), "");
        assert_eq!(interpolate("${CS_TEST_SET:-x}", &vars).unwrap(), "actual");
    }

    #[test]
    fn test_dollar_escape() {
        assert_eq!(interpolate("cost: $$5", &lookup(&[])).unwrap(), "cost: $5");
    }

    #[test]
    fn test_line_breaks_rejected() {
        let vars = lookup(&[("CS_TEST_NL", "a\nb"), ("CS_TEST_CR", "a\rb")]);
        let errors = interpolate("$CS_TEST_NL $CS_TEST_CR", &vars).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.contains("line break")));
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "sink:\n  bucket: events\n";
        assert_eq!(interpolate(text, &lookup(&[])).unwrap(), text);
    }
}
