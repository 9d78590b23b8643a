//! Textual sanitation applied to every model response before it is stored.
//!
//! This is not parsing: it never looks at headings, only at quote markers
//! and surrounding whitespace.

/// Drop every line whose first non-blank character is `>`, then trim.
pub fn strip_quoted_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('>'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Remove a single wrapping code fence (```` ```markdown ... ``` ````) that
/// some models put around the whole answer.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the info string on the opening line.
    match body.find('\n') {
        Some(idx) => body[idx + 1..].trim(),
        None => body.trim(),
    }
}

/// Full sanitation pass used on model output.
pub fn sanitize_model_output(text: &str) -> String {
    strip_quoted_lines(strip_code_fence(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_quoted_lines() {
        let raw = "\n> As an analyst I note\nReal line\n   > indented quote\nSecond line\n\n";
        assert_eq!(strip_quoted_lines(raw), "Real line\nSecond line");
    }

    #[test]
    fn test_inline_gt_is_kept() {
        assert_eq!(strip_quoted_lines("GDP > 3%"), "GDP > 3%");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```markdown\n## China\nx\n```"), "## China\nx");
        assert_eq!(strip_code_fence("no fence"), "no fence");
        assert_eq!(strip_code_fence("```unterminated"), "```unterminated");
    }

    #[test]
    fn test_sanitize_model_output() {
        let raw = "```\n> preface\n## Global\nbody\n```";
        assert_eq!(sanitize_model_output(raw), "## Global\nbody");
    }
}
