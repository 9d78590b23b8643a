//! Small markdown/HTML building blocks shared by every report.

use std::sync::LazyLock;

use regex::Regex;

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("NON_SLUG_CHARS regex should compile"));
static SLUG_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("SLUG_SEPARATORS regex should compile"));

pub fn h1(text: &str) -> String {
    format!("# {}", text)
}

pub fn h2(text: &str) -> String {
    format!("## {}", text)
}

pub fn h3(text: &str) -> String {
    format!("### {}", text)
}

/// Collapsible `<details>` block. Blank lines around the content let the
/// renderer treat it as markdown.
pub fn dropdown(title: &str, content: &str) -> String {
    format!(
        "<details>\n<summary><b>{}</b></summary>\n\n{}\n\n</details>\n",
        title, content
    )
}

/// Strip leading quote markers left in model prose and trim.
pub fn clean_text(text: &str) -> String {
    text.lines()
        .map(|line| line.trim_start_matches(['>', ' ']))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// `West Asia (Middle East)` -> `west-asia-middle-east`.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = NON_SLUG_CHARS.replace_all(&lower, "");
    let joined = SLUG_SEPARATORS.replace_all(&stripped, "-");
    joined.trim_matches('-').to_string()
}

pub fn link(text: &str, url: &str) -> String {
    format!("[{}]({})", text, url)
}

/// In-page anchor appended to a heading.
pub fn anchor(slug: &str) -> String {
    format!("<a id='{}'></a>", slug)
}
