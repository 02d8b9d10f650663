//! Environment variable interpolation for config files.
//!
//! `${VAR}` and `$VAR` must be set; `${VAR:-default}` falls back when VAR is
//! unset or empty, `${VAR-default}` only when unset. `$$` is a literal `$`.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?-)([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("placeholder pattern is valid")
});

/// Substitute environment variables in `input`.
///
/// Every unresolvable placeholder is reported, not just the first.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1).or_else(|| caps.get(4)).map(|m| m.as_str()) else {
            return "$".to_string();
        };
        let fallback_when_empty = caps.get(2).is_some_and(|m| m.as_str() == ":-");
        let fallback = caps.get(3).map(|m| m.as_str());

        match (lookup(name), fallback) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                errors.push(format!("environment variable '{name}' contains a newline"));
                String::new()
            }
            (Some(value), Some(default)) if value.is_empty() && fallback_when_empty => {
                default.to_string()
            }
            (Some(value), _) => value,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                errors.push(format!("environment variable '{name}' is not set"));
                String::new()
            }
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(errors)
    }
}
