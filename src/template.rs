//! Segment URL template expansion.
//!
//! Fills the `$RepresentationID$`, `$Bandwidth$`, `$Number$` and `$Time$`
//! identifiers of a media or initialization template, including the
//! `%0<width>d` padding form (`$Number%05d$`) and the `$$` escape. The
//! template string itself is addressing metadata and opaque to timeline
//! arithmetic; expansion only happens when concrete segments are emitted.

use serde::Serialize;
use tracing::debug;
use url::Url;

/// Values substituted into a template for one concrete segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateValues<'a> {
    pub representation_id: &'a str,
    pub bandwidth: Option<u64>,
    pub number: Option<u64>,
    /// Media time of the segment, in index-timescale ticks.
    pub time: Option<i64>,
}

/// A raw URL template as declared by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentUrlTemplate {
    raw: String,
}

impl SegmentUrlTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The template text exactly as declared.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Expand all identifiers against the given values.
    ///
    /// Identifiers with no corresponding value, and identifiers this engine
    /// does not know, are left verbatim so the failure is visible in the
    /// resulting URL rather than silently mangled.
    pub fn fill(&self, values: &TemplateValues) -> String {
        let mut out = String::with_capacity(self.raw.len());
        let mut rest = self.raw.as_str();

        while let Some(open) = rest.find('$') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('$') {
                Some(close) => {
                    let token = &after[..close];
                    match expand_token(token, values) {
                        Some(expansion) => out.push_str(&expansion),
                        None => {
                            debug!("Unexpanded template identifier: ${}$", token);
                            out.push('$');
                            out.push_str(token);
                            out.push('$');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    // Unterminated identifier, keep verbatim
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Expand and resolve against a base URL when one is known.
    pub fn resolve(&self, values: &TemplateValues, base: Option<&Url>) -> Option<Url> {
        let filled = self.fill(values);
        match base {
            Some(base) => base.join(&filled).ok(),
            None => Url::parse(&filled).ok(),
        }
    }
}

/// Expand a single identifier (the text between two `$`).
///
/// Returns `None` when the identifier is unknown or its value is absent.
fn expand_token(token: &str, values: &TemplateValues) -> Option<String> {
    if token.is_empty() {
        // "$$" escapes a literal dollar sign
        return Some("$".to_string());
    }

    let (name, width) = match token.find('%') {
        Some(at) => (&token[..at], parse_width(&token[at..])?),
        None => (token, 0),
    };

    let value = match name {
        "RepresentationID" => return Some(values.representation_id.to_string()),
        "Bandwidth" => values.bandwidth? as i64,
        "Number" => values.number? as i64,
        "Time" => values.time?,
        _ => return None,
    };

    Some(format!("{value:0width$}"))
}

/// Parse a `%0<width>d` format tag; anything else is rejected.
fn parse_width(tag: &str) -> Option<usize> {
    let digits = tag.strip_prefix("%0")?.strip_suffix('d')?;
    digits.parse().ok()
}
