//! The markdown shapes excerpt notes are written in and read back from.

use super::EXCERPT_TAG;
use once_cell::sync::Lazy;
use regex::Regex;

static FRONT_MATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").unwrap());
static CALLOUT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^>\s*\[!note\]\s*(.*?)\s*·\s*section\s+(\d+)\s*·\s*(.*?)\s*$").unwrap()
});

static CITATION_FOOTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^>\s*.*?·\s*section\s+\d+\s+#{}/", regex::escape(EXCERPT_TAG))).unwrap()
});

/// `key: value` pairs from a note's YAML front matter. Only flat scalar
/// fields are understood, which is all the reader ever writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FrontMatter {
    fields: Vec<(String, String)>,
}

impl FrontMatter {
    fn parse(block: &str) -> Self {
        let fields = block
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(value);
                (key.trim().to_string(), value.to_string())
            })
            .collect();
        FrontMatter { fields }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) fn split_front_matter(content: &str) -> (Option<FrontMatter>, &str) {
    match FRONT_MATTER.captures(content) {
        Some(caps) => {
            let block = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (Some(FrontMatter::parse(block)), &content[end..])
        }
        None => (None, content),
    }
}

/// Note content without its front matter, as copied to the clipboard.
pub fn strip_front_matter(content: &str) -> &str {
    split_front_matter(content).1
}

/// The `> title · section n` line closing a per-note excerpt.
pub(crate) fn is_citation_footer(line: &str) -> bool {
    CITATION_FOOTER.is_match(line.trim_start())
}

fn is_tag_line(line: &str) -> bool {
    line.trim_start().starts_with(&format!("#{EXCERPT_TAG}/"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Callout {
    pub title: String,
    pub section: usize,
    pub lines: Vec<String>,
}

/// Callout entries in the order they appear.
pub(crate) fn parse_callouts(content: &str) -> Vec<Callout> {
    let mut callouts = Vec::new();
    let mut current: Option<Callout> = None;
    for line in content.lines() {
        if let Some(caps) = CALLOUT_HEADER.captures(line) {
            callouts.extend(current.take());
            let section = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            current = Some(Callout {
                title: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                section,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(callout) = current.as_mut() else {
            continue;
        };
        let Some(body) = line.trim_start().strip_prefix('>') else {
            callouts.extend(current.take());
            continue;
        };
        let body = body.strip_prefix(' ').unwrap_or(body);
        if body.trim().is_empty() || is_tag_line(body) {
            continue;
        }
        callout.lines.push(body.trim_end().to_string());
    }
    callouts.extend(current);
    callouts
}

pub(crate) fn callout_entry(title: &str, section: usize, time: &str, text: &str) -> String {
    let quoted = text.lines().collect::<Vec<_>>().join("\n> ");
    format!("\n\n> [!note] {title} · section {section} · {time}\n> {quoted}\n> #{EXCERPT_TAG}/{title}")
}

pub(crate) fn note_document(title: &str, section: usize, date: &str, source: &str, text: &str) -> String {
    format!(
        "---\nbook: {title}\nsection: {section}\ndate: {date}\nsource: {source}\ntags: [{EXCERPT_TAG}, {title}]\n---\n{text}\n\n> {title} · section {section} #{EXCERPT_TAG}/{title}\n"
    )
}

pub(crate) fn daily_entry(time: &str, title: &str, section: usize, text: &str) -> String {
    let indented = text.lines().collect::<Vec<_>>().join("\n    ");
    format!("\n- {time} {indented}\n    {EXCERPT_TAG} · {title} section {section} #{EXCERPT_TAG}/{title}\n")
}
