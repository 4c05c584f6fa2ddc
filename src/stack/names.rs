//! Stack-name helpers.

use regex::Regex;

use crate::error::{ConfigError, Result};

/// Reduces a stack ARN to the stack name; other input is returned as is.
///
/// `arn:aws:cloudformation:<region>:<account>:stack/<name>/<guid>` becomes
/// `<name>`.
#[must_use]
pub fn canonical_stack_name(input: &str) -> &str {
    if !input.starts_with("arn:") {
        return input;
    }
    input.split('/').nth(1).unwrap_or(input)
}

/// Returns true if the pattern contains a `*` wildcard.
#[must_use]
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains('*')
}

/// Compiles a stack-name glob into an anchored regular expression.
///
/// `*` matches any run of characters; everything else is literal.
///
/// # Errors
///
/// Returns an error if the resulting expression cannot be compiled.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$")).map_err(|e| {
        ConfigError::validation(format!("invalid stack pattern '{pattern}': {e}"), "stack").into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_from_arn() {
        assert_eq!(
            canonical_stack_name(
                "arn:aws:cloudformation:eu-west-1:123456789012:stack/network/5f1e-11ee"
            ),
            "network"
        );
        assert_eq!(canonical_stack_name("network"), "network");
    }

    #[test]
    fn test_glob_anchored() {
        let re = glob_to_regex("app-*").unwrap();
        assert!(re.is_match("app-web"));
        assert!(re.is_match("app-"));
        assert!(!re.is_match("my-app-web"));
    }

    #[test]
    fn test_glob_escapes_literals() {
        let re = glob_to_regex("a.b*").unwrap();
        assert!(re.is_match("a.b-1"));
        assert!(!re.is_match("axb-1"));
        assert!(is_glob("a*"));
        assert!(!is_glob("plain"));
    }
}
