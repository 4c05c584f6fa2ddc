//! Console links to change-sets.

use std::sync::LazyLock;

use regex::Regex;
use url::form_urlencoded;

use crate::error::{ChangeSetError, Result};

const CONSOLE_BASE: &str = "https://console.aws.amazon.com/cloudformation/home";

static REGION_FRAGMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\?region=([^#&]*)#/stacks/changesets/changes").ok()
});

/// Stack and change-set addressed by a console link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLocation {
    /// Region, when present in the link.
    pub region: Option<String>,
    /// Stack ARN.
    pub stack_id: String,
    /// Change-set ARN.
    pub change_set_id: String,
}

/// Builds the console link to a change-set.
#[must_use]
pub fn console_url(region: &str, stack_id: &str, change_set_id: &str) -> String {
    format!(
        "{CONSOLE_BASE}?region={region}#/stacks/changesets/changes?stackId={}&changeSetId={}",
        urlencoding::encode(stack_id),
        urlencoding::encode(change_set_id)
    )
}

/// Extracts the stack and change-set ARNs from a console link.
///
/// Shell-escaped links (with backslashes) are accepted.
///
/// # Errors
///
/// Returns an error if the link cannot be decoded or lacks either id.
pub fn parse_console_url(input: &str) -> Result<ConsoleLocation> {
    let decoded = urlencoding::decode(input.trim()).map_err(|e| ChangeSetError::Malformed {
        message: format!("console URL is not valid UTF-8 after decoding: {e}"),
    })?;
    let mut link = decoded.replace('\\', "");

    let found = REGION_FRAGMENT
        .as_ref()
        .and_then(|re| re.captures(&link))
        .map(|captures| {
            let fragment = captures.get(0).map_or("", |m| m.as_str()).to_string();
            let region = captures.get(1).map(|m| m.as_str().to_string());
            (fragment, region)
        });
    let mut region = None;
    if let Some((fragment, found_region)) = found {
        link = link.replacen(&fragment, "", 1);
        region = found_region;
    }

    let query = link.split_once('?').map_or(link.as_str(), |(_, q)| q);
    let mut stack_id = None;
    let mut change_set_id = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "stackId" => stack_id = Some(value.into_owned()),
            "changeSetId" => change_set_id = Some(value.into_owned()),
            _ => {}
        }
    }

    match (stack_id, change_set_id) {
        (Some(stack_id), Some(change_set_id)) => Ok(ConsoleLocation {
            region,
            stack_id,
            change_set_id,
        }),
        _ => Err(ChangeSetError::Malformed {
            message: format!("console URL lacks stackId or changeSetId: {input}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = "arn:aws:cloudformation:us-east-1:123456789012:stack/s/abc";
    const CHANGE_SET: &str = "arn:aws:cloudformation:us-east-1:123456789012:changeSet/c/xyz";

    #[test]
    fn test_url_format() {
        let url = console_url("us-east-1", "a/b", "c:d");
        assert_eq!(
            url,
            "https://console.aws.amazon.com/cloudformation/home?region=us-east-1#/stacks/changesets/changes?stackId=a%2Fb&changeSetId=c%3Ad"
        );
    }

    #[test]
    fn test_round_trip() {
        let url = console_url("us-east-1", STACK, CHANGE_SET);
        let location = parse_console_url(&url).unwrap();
        assert_eq!(location.stack_id, STACK);
        assert_eq!(location.change_set_id, CHANGE_SET);
        assert_eq!(location.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_shell_escaped_link() {
        let url = console_url("eu-west-1", STACK, CHANGE_SET).replace('&', "\\&");
        let location = parse_console_url(&url).unwrap();
        assert_eq!(location.change_set_id, CHANGE_SET);
    }

    #[test]
    fn test_missing_ids() {
        assert!(parse_console_url("https://console.aws.amazon.com/cloudformation/home").is_err());
    }
}
