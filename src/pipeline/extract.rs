use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::core::error::PipelineError;

/// Locate the JSON payload in model output: a ```json fence, any fence
/// whose body looks like JSON, or the outermost object/array in the text.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after[body_start..].find("```") {
            let block = after[body_start..body_start + end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    let open = trimmed.find(['{', '['])?;
    let close_char = if trimmed[open..].starts_with('{') { '}' } else { ']' };
    let close = trimmed.rfind(close_char)?;
    (close > open).then(|| &trimmed[open..=close])
}

/// Parse model output into `T`, naming `what` in the error.
pub fn parse_json<T: DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    let block = extract_json_block(text)
        .ok_or_else(|| PipelineError::parse(what, "no JSON found in model output"))?;
    serde_json::from_str(block).map_err(|e| PipelineError::parse(what, e.to_string()).into())
}

/// Drop a leading `---` front-matter block a model added on its own.
pub fn strip_front_matter(body: &str) -> &str {
    let trimmed = body.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return body;
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return body;
    };
    let after = match rest.strip_prefix("---") {
        Some(after) => after,
        None => match rest.find("\n---") {
            Some(end) => &rest[end + 4..],
            None => return body,
        },
    };
    after.trim_start_matches(['\r', '\n'])
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::error_kind;
    use serde_json::Value;

    #[test]
    fn finds_fenced_and_embedded_json() {
        assert_eq!(
            extract_json_block("Here:\n```json\n{\"a\": 1}\n```\nDone"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json_block("```\n[1, 2]\n```"), Some("[1, 2]"));
        assert_eq!(
            extract_json_block("Sure! {\"a\": {\"b\": 2}} Hope that helps."),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn parse_errors_are_typed() {
        let ok: Value = parse_json("{\"x\": true}", "test").unwrap();
        assert_eq!(ok["x"], true);
        let err = parse_json::<Value>("nothing", "synthesis").unwrap_err();
        assert_eq!(error_kind(&err), "parse");
        assert!(err.to_string().contains("synthesis"));
        let err = parse_json::<Value>("{broken", "synthesis").unwrap_err();
        assert_eq!(error_kind(&err), "parse");
    }

    #[test]
    fn strips_leading_front_matter_only() {
        let body = "---\ntitle: Acme\n---\n\n# Acme\nText";
        assert_eq!(strip_front_matter(body), "# Acme\nText");
        let plain = "# Acme\n---\nmore";
        assert_eq!(strip_front_matter(plain), plain);
        let unterminated = "---\ntitle: Acme\n# Acme";
        assert_eq!(strip_front_matter(unterminated), unterminated);
        assert_eq!(strip_front_matter("---\n---\n# Acme\nBody"), "# Acme\nBody");
    }

    #[test]
    fn slugs_are_lowercase_and_dashed() {
        assert_eq!(slugify("Acme CI/CD Pro"), "acme-ci-cd-pro");
        assert_eq!(slugify("  --Hello, World!  "), "hello-world");
        assert_eq!(slugify("Notion"), "notion");
    }
}
