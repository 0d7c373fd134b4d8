//! Book stylesheet sanitizing and scoping.
//!
//! Book CSS is injected next to the reader's own UI, so every rule is
//! re-rooted under the render container, `@font-face` rules that point at
//! the reader's machine are dropped, and embedded font files are swapped for
//! object-URL handles minted by the caller.

use cssparser::{ParseError, Parser, ParserInput, Token};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::ops::Range;
use tracing::debug;

type CssParseError<'i> = ParseError<'i, ()>;

/// Class carried by the render container element.
pub const SCOPE_CLASS: &str = "epub-reader-content";
pub const SCOPE_SELECTOR: &str = ".epub-reader-content";

/// At-rules whose bodies hold ordinary style rules.
const GROUPING_RULES: [&str; 6] = ["media", "supports", "document", "-moz-document", "layer", "container"];

static SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap());
static DRIVE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]:[\\/]").unwrap());

/// One stylesheet and the archive path its `url()` references resolve from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssSource {
    pub text: String,
    pub base_path: String,
}

impl CssSource {
    pub fn new(text: impl Into<String>, base_path: impl Into<String>) -> Self {
        CssSource {
            text: text.into(),
            base_path: base_path.into(),
        }
    }
}

struct FontPolicy<'a> {
    base_path: &'a str,
    embed: bool,
    load_font: &'a mut dyn FnMut(&str, &str) -> Option<String>,
}

/// Sanitize and scope every source, concatenated in order.
///
/// `load_font(reference, base_path)` returns a handle for an archive font
/// file, or `None` when it cannot be found; the whole `@font-face` rule is
/// dropped in that case.
pub fn sanitize<F>(sources: &[CssSource], embed_foreign_fonts: bool, mut load_font: F) -> String
where
    F: FnMut(&str, &str) -> Option<String>,
{
    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        let mut policy = Some(FontPolicy {
            base_path: &source.base_path,
            embed: embed_foreign_fonts,
            load_font: &mut load_font,
        });
        let rewritten = rewrite_rules(&strip_comments(&source.text), &mut policy);
        if !rewritten.is_empty() {
            out.push(rewritten);
        }
    }
    out.join("\n")
}

/// Re-root selectors under the render container without touching fonts.
pub fn scope_css(css: &str) -> String {
    rewrite_rules(&strip_comments(css), &mut None)
}

fn rewrite_rules(css: &str, fonts: &mut Option<FontPolicy<'_>>) -> String {
    let mut out: Vec<String> = Vec::new();
    for item in split_items(css) {
        match item {
            CssItem::Statement(statement) => {
                let name = at_rule_name(statement);
                if name == "import" || name == "charset" {
                    debug!(%statement, "Dropping stylesheet statement");
                    continue;
                }
                out.push(statement.to_string());
            }
            CssItem::Block { prelude, body } if prelude.starts_with('@') => {
                let name = at_rule_name(prelude);
                if name == "font-face" {
                    match fonts {
                        Some(policy) => {
                            if let Some(body) = rewrite_font_face(body, policy) {
                                out.push(format!("{prelude} {{{body}}}"));
                            }
                        }
                        None => out.push(format!("{prelude} {{{body}}}")),
                    }
                } else if GROUPING_RULES.contains(&name.as_str()) {
                    let inner = rewrite_rules(body, fonts);
                    out.push(format!("{prelude} {{{inner}}}"));
                } else {
                    out.push(format!("{prelude} {{{body}}}"));
                }
            }
            CssItem::Block { prelude, body } => {
                let selectors = scope_selector_list(prelude);
                if selectors.is_empty() {
                    continue;
                }
                let body = match fonts {
                    Some(policy) if policy.embed => elevate_fonts(body),
                    _ => Cow::Borrowed(body),
                };
                out.push(format!("{selectors} {{{body}}}"));
            }
        }
    }
    out.join("\n")
}

fn at_rule_name(text: &str) -> String {
    let mut input = ParserInput::new(text);
    let mut parser = Parser::new(&mut input);
    match parser.next() {
        Ok(Token::AtKeyword(name)) => name.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Paths that reach outside the book onto the reader's machine.
fn is_local_path(url: &str) -> bool {
    let url = url.trim();
    url.to_ascii_lowercase().starts_with("file:") || DRIVE_PATH.is_match(url) || url.starts_with("\\\\")
}

fn is_loadable_as_is(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    ["data:", "http:", "https:", "blob:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
}

/// A `url()` reference and the byte range of the whole token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CssUrl {
    range: Range<usize>,
    /// The reference with CSS escapes resolved.
    url: String,
    /// The reference exactly as written, quotes removed.
    raw: String,
}

impl CssUrl {
    /// Backslashes are CSS escapes, so a Windows path is only recognizable
    /// in the written form.
    fn is_local(&self) -> bool {
        is_local_path(&self.url) || is_local_path(&self.raw)
    }
}

fn find_urls(css: &str) -> Vec<CssUrl> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut urls = Vec::new();
    collect_urls(&mut parser, &mut urls);
    urls
}

fn collect_urls(parser: &mut Parser<'_, '_>, urls: &mut Vec<CssUrl>) {
    loop {
        let before = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::UnquotedUrl(url) => {
                let written = parser.slice_from(before);
                let raw = written
                    .get(4..written.len().saturating_sub(1))
                    .unwrap_or_default()
                    .trim();
                urls.push(CssUrl {
                    range: before.byte_index()..parser.position().byte_index(),
                    url: url.to_string(),
                    raw: raw.to_string(),
                });
            }
            Token::Function(name) if name.eq_ignore_ascii_case("url") => {
                let quoted = parser.parse_nested_block(|nested| {
                    let start = nested.position();
                    let url = nested.expect_string()?.to_string();
                    let raw = nested.slice_from(start).trim().trim_matches(['"', '\'']).to_string();
                    Ok::<_, CssParseError>((url, raw))
                });
                if let Ok((url, raw)) = quoted {
                    urls.push(CssUrl {
                        range: before.byte_index()..parser.position().byte_index(),
                        url,
                        raw,
                    });
                }
            }
            Token::Function(_)
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock
            | Token::CurlyBracketBlock => {
                let _ = parser.parse_nested_block(|nested| {
                    collect_urls(nested, urls);
                    Ok::<_, CssParseError>(())
                });
            }
            _ => {}
        }
    }
}

fn rewrite_font_face(body: &str, policy: &mut FontPolicy<'_>) -> Option<String> {
    let urls = find_urls(body);

    if let Some(local) = urls.iter().find(|url| url.is_local()) {
        debug!(url = %local.raw, "Dropping @font-face with a local path");
        return None;
    }
    if !policy.embed {
        return None;
    }

    let mut rewritten = body.to_string();
    for CssUrl { range, url, .. } in urls.into_iter().rev() {
        if is_loadable_as_is(&url) {
            continue;
        }
        if SCHEME.is_match(&url) {
            debug!(%url, "Dropping @font-face with an unsupported scheme");
            return None;
        }
        let Some(handle) = (policy.load_font)(&url, policy.base_path) else {
            debug!(%url, base = %policy.base_path, "Dropping @font-face with a missing font file");
            return None;
        };
        rewritten.replace_range(range, &format!("url(\"{handle}\")"));
    }
    Some(rewritten)
}

/// Property name of a declaration and whether it is already `!important`.
fn inspect_declaration(declaration: &str) -> Option<(String, bool)> {
    let mut input = ParserInput::new(declaration);
    let mut parser = Parser::new(&mut input);
    let property = parser.expect_ident().ok()?.to_ascii_lowercase();
    parser.expect_colon().ok()?;
    let mut important = false;
    let mut bang = false;
    while let Ok(token) = parser.next() {
        important = bang && matches!(token, Token::Ident(name) if name.eq_ignore_ascii_case("important"));
        bang = matches!(token, Token::Delim('!'));
    }
    Some((property, important))
}

/// Append `!important` to font-family and font declarations.
fn elevate_fonts(body: &str) -> Cow<'_, str> {
    let mut changed = false;
    let rewritten: Vec<Cow<'_, str>> = split_top_level(body, ';')
        .into_iter()
        .map(|declaration| match inspect_declaration(declaration) {
            Some((property, false)) if property == "font-family" || property == "font" => {
                changed = true;
                Cow::Owned(format!("{} !important", declaration.trim_end()))
            }
            _ => Cow::Borrowed(declaration),
        })
        .collect();
    if !changed {
        return Cow::Borrowed(body);
    }
    Cow::Owned(rewritten.join(";"))
}

fn scope_selector_list(prelude: &str) -> String {
    split_top_level(prelude, ',')
        .into_iter()
        .map(scope_selector)
        .filter(|selector| !selector.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn scope_selector(selector: &str) -> String {
    let selector = selector.trim();
    if selector.is_empty() {
        return String::new();
    }
    if starts_with_token(selector, SCOPE_SELECTOR) {
        return selector.to_string();
    }
    for root in ["html", "body", ":root"] {
        if !starts_with_token(selector, root) {
            continue;
        }
        let rest = &selector[root.len()..];
        if root == "html" {
            let inner = rest.trim_start().trim_start_matches('>').trim_start();
            if starts_with_token(inner, "body") {
                return format!("{SCOPE_SELECTOR}{}", &inner["body".len()..]);
            }
        }
        return format!("{SCOPE_SELECTOR}{rest}");
    }
    format!("{SCOPE_SELECTOR} {selector}")
}

/// Case-insensitive prefix match that stops at an identifier boundary.
fn starts_with_token(text: &str, token: &str) -> bool {
    let Some(head) = text.get(..token.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(token)
        && !text[token.len()..]
            .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CssItem<'a> {
    Block { prelude: &'a str, body: &'a str },
    Statement(&'a str),
}

/// Copy `css` without its comments, blocks included.
fn strip_comments(css: &str) -> Cow<'_, str> {
    if !css.contains("/*") {
        return Cow::Borrowed(css);
    }
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut out = String::with_capacity(css.len());
    copy_without_comments(&mut parser, &mut out);
    Cow::Owned(out)
}

fn copy_without_comments(parser: &mut Parser<'_, '_>, out: &mut String) {
    let mut start = parser.position();
    loop {
        let before = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        let close = match token {
            Token::Comment(_) => {
                out.push_str(parser.slice(start..before));
                start = parser.position();
                continue;
            }
            Token::Function(_) | Token::ParenthesisBlock => ')',
            Token::SquareBracketBlock => ']',
            Token::CurlyBracketBlock => '}',
            _ => continue,
        };
        out.push_str(parser.slice_from(start));
        let _ = parser.parse_nested_block(|nested| {
            copy_without_comments(nested, out);
            Ok::<_, CssParseError>(())
        });
        out.push(close);
        start = parser.position();
    }
    out.push_str(parser.slice_from(start));
}

/// Split a stylesheet into top-level rules and statements.
fn split_items(css: &str) -> Vec<CssItem<'_>> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut items = Vec::new();
    let mut start = parser.position();
    loop {
        let before = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::Semicolon => {
                let statement = parser.slice_from(start).trim();
                if statement.len() > 1 {
                    items.push(CssItem::Statement(statement));
                }
                start = parser.position();
            }
            // A stray closing brace ends whatever came before it.
            Token::CloseCurlyBracket => start = parser.position(),
            Token::CurlyBracketBlock => {
                let prelude = parser.slice(start..before).trim();
                let body_start = parser.position();
                let body = parser
                    .parse_nested_block(|nested| {
                        while nested.next_including_whitespace_and_comments().is_ok() {}
                        Ok::<_, CssParseError>(nested.slice_from(body_start))
                    })
                    .unwrap_or_default();
                items.push(CssItem::Block { prelude, body });
                start = parser.position();
            }
            _ => {}
        }
    }
    items
}

/// Split on `separator` outside strings and nested blocks.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut input = ParserInput::new(text);
    let mut parser = Parser::new(&mut input);
    let mut parts = Vec::new();
    let mut start = parser.position();
    loop {
        let before = parser.position();
        let is_separator = match parser.next_including_whitespace_and_comments() {
            Ok(Token::Comma) => separator == ',',
            Ok(Token::Semicolon) => separator == ';',
            Ok(_) => false,
            Err(_) => break,
        };
        if is_separator {
            parts.push(parser.slice(start..before));
            start = parser.position();
        }
    }
    parts.push(parser.slice_from(start));
    parts
}
