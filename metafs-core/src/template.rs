//! Path template grammar (spec §4.2): parses and renders `{path}`-style
//! templates into virtual paths.
//!
//! Supported tokens:
//! - `{path}` — required; if the property is absent the whole template
//!   fails to render (the caller falls back to the next rule / default).
//! - `{path?}` — optional; renders as an empty string when absent.
//! - `{path?(inner)}` — optional with a literal sub-template rendered only
//!   when `path` is present (`inner` may itself contain more tokens).
//! - `{path|fallback}` — when `path` is absent, `fallback` is tried as a
//!   second field lookup if it matches the field-name grammar; otherwise
//!   it is substituted as a literal default. If `fallback` looks like a
//!   field reference but that field is also absent, the whole template
//!   fails rather than emitting the fallback text verbatim.
//! - `{path:format}` — applies a format function (`upper`, `lower`, `padN`)
//!   to the resolved value.

use crate::metadata::PropertyLookup;

/// Whether `candidate` has the shape of a property path rather than an
/// arbitrary literal string: letters/digits/underscore, dot- or
/// slash-separated, each segment starting with a letter or underscore.
/// Per spec §4.2, a `{path|fallback}` fallback is tried as a second field
/// lookup whenever it matches this grammar — even a plain English word like
/// `unknown` qualifies, so a literal default that should never resolve as a
/// field needs a shape the grammar rejects (leading digit, punctuation,
/// whitespace).
pub fn looks_like_field_path(candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    candidate.split(['.', '/']).all(|segment| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// A parsed template: an ordered sequence of literal and token segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Required(String),
    Optional(String),
    OptionalInner(String, Box<Template>),
    Fallback(String, String),
    Formatted(String, Format),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Format {
    Upper,
    Lower,
    Pad(usize),
}

/// A template string that could not be parsed (unbalanced braces).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid template syntax near byte {position}: {reason}")]
pub struct TemplateParseError {
    pub position: usize,
    pub reason: String,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateParseError> {
        let (segments, rest) = parse_segments(source, 0)?;
        if !rest.is_empty() {
            return Err(TemplateParseError {
                position: source.len() - rest.len(),
                reason: "unmatched closing brace".to_string(),
            });
        }
        Ok(Template { segments })
    }

    /// Collects every property path this template reads, including those
    /// nested inside `{path?(inner)}` sub-templates. Used by the property
    /// extractor to compute which store properties a rule set actually
    /// depends on.
    pub fn referenced_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(_) => {}
                Segment::Required(path) | Segment::Optional(path) | Segment::Formatted(path, _) => {
                    paths.push(path.clone())
                }
                Segment::Fallback(path, fallback) => {
                    paths.push(path.clone());
                    if looks_like_field_path(fallback) {
                        paths.push(fallback.clone());
                    }
                }
                Segment::OptionalInner(path, inner) => {
                    paths.push(path.clone());
                    paths.extend(inner.referenced_paths());
                }
            }
        }
        paths
    }

    /// Renders the template against a property source. Returns `None` if any
    /// `{path}` required token is unresolved — the caller should treat this
    /// as "this rule produced no path" and move on to the next candidate.
    pub fn render(&self, props: &dyn PropertyLookup) -> Option<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Required(path) => out.push_str(&props.lookup(path)?),
                Segment::Optional(path) => {
                    if let Some(value) = props.lookup(path) {
                        out.push_str(&value);
                    }
                }
                Segment::OptionalInner(path, inner) => {
                    if props.lookup(path).is_some() {
                        out.push_str(&inner.render(props)?);
                    }
                }
                Segment::Fallback(path, fallback) => match props.lookup(path) {
                    Some(value) => out.push_str(&value),
                    None if looks_like_field_path(fallback) => {
                        // The fallback itself names a field; if that field is
                        // also absent, the whole render fails rather than
                        // emitting `fallback` as literal text (spec §8).
                        out.push_str(&props.lookup(fallback)?);
                    }
                    None => out.push_str(fallback),
                },
                Segment::Formatted(path, format) => {
                    let value = props.lookup(path)?;
                    out.push_str(&apply_format(&value, *format));
                }
            }
        }
        Some(out)
    }
}

fn apply_format(value: &str, format: Format) -> String {
    match format {
        Format::Upper => value.to_uppercase(),
        Format::Lower => value.to_lowercase(),
        Format::Pad(width) => {
            if value.len() >= width {
                value.to_string()
            } else {
                format!("{:0>width$}", value, width = width)
            }
        }
    }
}

fn parse_format(name: &str) -> Format {
    match name {
        "upper" => Format::Upper,
        "lower" => Format::Lower,
        other if other.starts_with("pad") => {
            let width = other[3..].parse::<usize>().unwrap_or(0);
            Format::Pad(width)
        }
        _ => Format::Pad(0),
    }
}

/// Parses segments until end of input or an unescaped `}` that doesn't
/// belong to this call's own token (used for recursive `inner` parsing).
/// Returns the parsed segments and whatever of `source` was left unconsumed.
fn parse_segments(source: &str, depth: usize) -> Result<(Vec<Segment>, &str), TemplateParseError> {
    if depth > 8 {
        return Err(TemplateParseError {
            position: 0,
            reason: "template nesting too deep".to_string(),
        });
    }
    let mut segments = Vec::new();
    let mut rest = source;
    let mut literal = String::new();

    while let Some(ch) = rest.chars().next() {
        if ch == '{' {
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            let after_brace = &rest[1..];
            let (segment, tail) = parse_token(after_brace)?;
            segments.push(segment);
            rest = tail;
        } else if ch == '}' {
            break;
        } else {
            let len = ch.len_utf8();
            literal.push(ch);
            rest = &rest[len..];
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok((segments, rest))
}

/// Parses one `{...}` token's contents, given the slice starting just after
/// the opening `{`. Returns the constructed segment and the remainder after
/// the token's closing `}`.
fn parse_token(source: &str) -> Result<(Segment, &str), TemplateParseError> {
    let path_end = source
        .find(['?', '|', ':', '}'])
        .ok_or_else(|| TemplateParseError {
            position: 0,
            reason: "unterminated token".to_string(),
        })?;
    let path = source[..path_end].to_string();
    let rest = &source[path_end..];

    match rest.chars().next() {
        Some('}') => Ok((Segment::Required(path), &rest[1..])),
        Some('|') => {
            let close = rest.find('}').ok_or_else(|| TemplateParseError {
                position: 0,
                reason: "unterminated fallback token".to_string(),
            })?;
            let fallback = rest[1..close].to_string();
            Ok((Segment::Fallback(path, fallback), &rest[close + 1..]))
        }
        Some(':') => {
            let close = rest.find('}').ok_or_else(|| TemplateParseError {
                position: 0,
                reason: "unterminated format token".to_string(),
            })?;
            let format = parse_format(&rest[1..close]);
            Ok((Segment::Formatted(path, format), &rest[close + 1..]))
        }
        Some('?') => {
            let after_q = &rest[1..];
            match after_q.chars().next() {
                Some('}') => Ok((Segment::Optional(path), &after_q[1..])),
                Some('(') => {
                    let (inner_segments, tail) = parse_segments(&after_q[1..], 1)?;
                    let tail = tail.strip_prefix(')').ok_or_else(|| TemplateParseError {
                        position: 0,
                        reason: "unterminated optional-inner parenthesis".to_string(),
                    })?;
                    let tail = tail.strip_prefix('}').ok_or_else(|| TemplateParseError {
                        position: 0,
                        reason: "optional-inner token missing closing brace".to_string(),
                    })?;
                    Ok((
                        Segment::OptionalInner(path, Box::new(Template { segments: inner_segments })),
                        tail,
                    ))
                }
                _ => Err(TemplateParseError {
                    position: 0,
                    reason: "expected '}' or '(' after '?'".to_string(),
                }),
            }
        }
        _ => unreachable!("find() guarantees one of ?|:} at this position"),
    }
}

/// Replaces filesystem-hostile characters in a single path segment (not a
/// full path: callers split on `/` first) so rendered templates always
/// produce safe virtual paths (spec §4.2 path sanitizer).
pub fn sanitize_path_segment(segment: &str) -> String {
    const FORBIDDEN: &[char] = &['\0', '\\', ':', '*', '?', '"', '<', '>', '|'];
    let cleaned: String = segment.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether `segment` is a leading drive prefix (`C:`, `D:`, ...) that
/// sanitization must preserve verbatim rather than stripping the colon from
/// (spec §4.5/§6: "preserve a leading drive prefix (`X:`) if present").
fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Sanitizes a full `/`-delimited path: every segment is cleaned through
/// [`sanitize_path_segment`], except a leading drive-letter segment, which
/// passes through untouched.
pub fn sanitize_full_path(path: &str) -> String {
    path.split('/')
        .enumerate()
        .map(|(i, segment)| {
            if i == 0 && is_drive_prefix(segment) {
                segment.to_string()
            } else {
                sanitize_path_segment(segment)
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Renders a template, then sanitizes every `/`-delimited segment of the
/// result so the returned virtual path is always safe to store verbatim.
pub fn render_sanitized(template: &Template, props: &dyn PropertyLookup) -> Option<String> {
    let rendered = template.render(props)?;
    Some(sanitize_full_path(&rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyMap;

    fn props(pairs: &[(&str, &str)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_required_literal_mix() {
        let t = Template::parse("{title}/{title}.{extension}").unwrap();
        let p = props(&[("title", "Inception"), ("extension", "mkv")]);
        assert_eq!(t.render(&p).as_deref(), Some("Inception/Inception.mkv"));
    }

    #[test]
    fn required_missing_fails_whole_render() {
        let t = Template::parse("{title}/{extension}").unwrap();
        let p = props(&[("title", "Inception")]);
        assert_eq!(t.render(&p), None);
    }

    #[test]
    fn optional_renders_empty_when_absent() {
        let t = Template::parse("{title}{subtitle?}").unwrap();
        let p = props(&[("title", "Inception")]);
        assert_eq!(t.render(&p).as_deref(), Some("Inception"));
    }

    #[test]
    fn optional_inner_only_renders_when_present() {
        let t = Template::parse("{title}{movieYear?( ({movieYear}))}").unwrap();
        let with_year = props(&[("title", "Inception"), ("movieYear", "2010")]);
        assert_eq!(t.render(&with_year).as_deref(), Some("Inception (2010)"));

        let without_year = props(&[("title", "Inception")]);
        assert_eq!(t.render(&without_year).as_deref(), Some("Inception"));
    }

    #[test]
    fn literal_fallback_used_when_shape_is_not_a_field_path() {
        // A leading digit fails the field-path grammar, so "0000" is always
        // a literal default, never a second field lookup.
        let t = Template::parse("{movieYear|0000}").unwrap();
        let p = props(&[]);
        assert_eq!(t.render(&p).as_deref(), Some("0000"));
    }

    #[test]
    fn fallback_field_resolves_when_primary_absent() {
        let t = Template::parse("{titles.eng|originalTitle}").unwrap();
        let p = props(&[("originalTitle", "Kimitachi wa Dou Ikiru ka")]);
        assert_eq!(
            t.render(&p).as_deref(),
            Some("Kimitachi wa Dou Ikiru ka")
        );
    }

    #[test]
    fn fallback_field_absent_too_fails_whole_render() {
        let t = Template::parse("{titles.eng|originalTitle}").unwrap();
        let p = props(&[]);
        assert_eq!(t.render(&p), None);
    }

    #[test]
    fn pad_format_zero_pads_numeric_values() {
        let t = Template::parse("S{season:pad2}E{episode:pad2}").unwrap();
        let p = props(&[("season", "1"), ("episode", "23")]);
        assert_eq!(t.render(&p).as_deref(), Some("S01E23"));
    }

    #[test]
    fn upper_and_lower_formats() {
        let t = Template::parse("{title:upper}/{title:lower}").unwrap();
        let p = props(&[("title", "Inception")]);
        assert_eq!(t.render(&p).as_deref(), Some("INCEPTION/inception"));
    }

    #[test]
    fn sanitizes_forbidden_characters_per_segment() {
        let sanitized = sanitize_path_segment("Question: Mark?");
        assert_eq!(sanitized, "Question Mark");
    }

    #[test]
    fn render_sanitized_preserves_directory_separators() {
        let t = Template::parse("{title}/{extension}").unwrap();
        let p = props(&[("title", "A: B"), ("extension", "mkv")]);
        assert_eq!(render_sanitized(&t, &p).as_deref(), Some("A B/mkv"));
    }

    #[test]
    fn render_sanitized_preserves_leading_drive_prefix() {
        let t = Template::parse("{root}/{title}.{extension}").unwrap();
        let p = props(&[("root", "C:"), ("title", "Inception"), ("extension", "mkv")]);
        assert_eq!(
            render_sanitized(&t, &p).as_deref(),
            Some("C:/Inception.mkv")
        );
    }

    #[test]
    fn sanitize_full_path_strips_colon_outside_drive_position() {
        assert_eq!(sanitize_full_path("Movies/A: B"), "Movies/A B");
    }
}
