//! Payload composition: Bot-API HTML rendering of formatting spans and the
//! `{Label}:https://url` button syntax used by operators.
use crate::model::Button;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const BUTTONS_PER_ROW: usize = 2;

static BUTTON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}:([^\s<]+)").expect("valid button regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("button '{label}' has an invalid url: {url}")]
    InvalidUrl { label: String, url: String },
    #[error("unknown tag <{0}>")]
    UnknownTag(String),
    #[error("unbalanced tag </{0}>")]
    UnbalancedTag(String),
    #[error("malformed markup near '{0}'")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpanKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Pre,
    Blockquote,
}

impl SpanKind {
    fn tag(&self) -> &'static str {
        match self {
            SpanKind::Bold => "b",
            SpanKind::Italic => "i",
            SpanKind::Underline => "u",
            SpanKind::Strikethrough => "s",
            SpanKind::Spoiler => "tg-spoiler",
            SpanKind::Code => "code",
            SpanKind::Pre => "pre",
            SpanKind::Blockquote => "blockquote",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "b" => SpanKind::Bold,
            "i" => SpanKind::Italic,
            "u" => SpanKind::Underline,
            "s" => SpanKind::Strikethrough,
            "tg-spoiler" => SpanKind::Spoiler,
            "code" => SpanKind::Code,
            "pre" => SpanKind::Pre,
            "blockquote" => SpanKind::Blockquote,
            _ => return None,
        })
    }
}

/// A formatted range. Offsets and lengths count UTF-16 code units, as the
/// Bot API reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub kind: SpanKind,
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(kind: SpanKind, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
        }
    }

    fn end(&self) -> usize {
        self.offset + self.length
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Renders `text` with `spans` into well-nested Bot-API HTML. Overlapping
/// spans are closed and reopened at the boundary; spans outside the text are
/// clamped.
pub fn render_html(text: &str, spans: &[Span]) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    let n = units.len();
    let spans: Vec<Span> = spans
        .iter()
        .filter_map(|s| {
            let start = s.offset.min(n);
            let end = s.end().min(n);
            (end > start).then(|| Span::new(s.kind, start, end - start))
        })
        .collect();

    let mut bounds: Vec<usize> = vec![0, n];
    for s in &spans {
        bounds.push(s.offset);
        bounds.push(s.end());
    }
    bounds.sort_unstable();
    bounds.dedup();

    let mut out = String::with_capacity(text.len() + spans.len() * 8);
    let mut stack: Vec<usize> = Vec::new();
    for (i, &pos) in bounds.iter().enumerate() {
        let mut to_open: Vec<usize> = Vec::new();
        if let Some(lowest) = stack.iter().position(|&idx| spans[idx].end() == pos) {
            while stack.len() > lowest {
                let Some(idx) = stack.pop() else { break };
                out.push_str(&format!("</{}>", spans[idx].kind.tag()));
                if spans[idx].end() != pos {
                    to_open.push(idx);
                }
            }
        }
        to_open.extend((0..spans.len()).filter(|&idx| spans[idx].offset == pos));
        // outermost first: the span that ends last
        to_open.sort_by(|&a, &b| {
            spans[b]
                .end()
                .cmp(&spans[a].end())
                .then(spans[a].kind.cmp(&spans[b].kind))
        });
        for idx in to_open {
            out.push_str(&format!("<{}>", spans[idx].kind.tag()));
            stack.push(idx);
        }

        if let Some(&next) = bounds.get(i + 1) {
            out.push_str(&escape(&String::from_utf16_lossy(&units[pos..next])));
        }
    }
    out
}

/// Parses HTML produced by [`render_html`] back into plain text and merged
/// spans.
pub fn parse_html(html: &str) -> Result<(String, Vec<Span>), FormatError> {
    let mut text = String::new();
    let mut spans = Vec::new();
    let mut open: Vec<(SpanKind, usize)> = Vec::new();
    let mut pos = 0usize;
    let mut rest = html;

    while let Some(c) = rest.chars().next() {
        match c {
            '<' => {
                let end = rest
                    .find('>')
                    .ok_or_else(|| FormatError::Malformed(rest.chars().take(16).collect()))?;
                let tag = &rest[1..end];
                if let Some(name) = tag.strip_prefix('/') {
                    let kind = SpanKind::from_tag(name)
                        .ok_or_else(|| FormatError::UnknownTag(name.to_string()))?;
                    match open.pop() {
                        Some((k, start)) if k == kind => {
                            if pos > start {
                                spans.push(Span::new(kind, start, pos - start));
                            }
                        }
                        _ => return Err(FormatError::UnbalancedTag(name.to_string())),
                    }
                } else {
                    let kind = SpanKind::from_tag(tag)
                        .ok_or_else(|| FormatError::UnknownTag(tag.to_string()))?;
                    open.push((kind, pos));
                }
                rest = &rest[end + 1..];
            }
            '&' => {
                let end = rest
                    .find(';')
                    .ok_or_else(|| FormatError::Malformed(rest.chars().take(16).collect()))?;
                let decoded = unescape(&rest[..=end]);
                if decoded.chars().count() != 1 {
                    return Err(FormatError::Malformed(rest[..=end].to_string()));
                }
                pos += decoded.encode_utf16().count();
                text.push_str(&decoded);
                rest = &rest[end + 1..];
            }
            _ => {
                pos += c.len_utf16();
                text.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    if let Some((kind, _)) = open.pop() {
        return Err(FormatError::UnbalancedTag(kind.tag().to_string()));
    }
    Ok((text, normalize_spans(&spans)))
}

/// Sorts spans and merges touching or overlapping ranges of the same kind.
pub fn normalize_spans(spans: &[Span]) -> Vec<Span> {
    let mut sorted: Vec<Span> = spans.iter().copied().filter(|s| s.length > 0).collect();
    sorted.sort_by_key(|s| (s.kind, s.offset));
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for s in sorted {
        match merged.last_mut() {
            Some(last) if last.kind == s.kind && s.offset <= last.end() => {
                let end = last.end().max(s.end());
                last.length = end - last.offset;
            }
            _ => merged.push(s),
        }
    }
    merged
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn parse_button(label: String, raw_url: String) -> Result<Button, FormatError> {
    let url = reqwest::Url::parse(&raw_url).map_err(|_| FormatError::InvalidUrl {
        label: label.clone(),
        url: raw_url,
    })?;
    Ok(Button::url(label, url))
}

fn layout(buttons: Vec<Button>) -> Vec<Vec<Button>> {
    buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|row| row.to_vec())
        .collect()
}

/// Removes `{Label}:url` declarations from plain `text` and moves `spans`
/// so they still cover the same characters. Surrounding whitespace left
/// behind is trimmed. Render the result with [`render_html`].
pub fn strip_buttons(
    text: &str,
    spans: &[Span],
) -> Result<(String, Vec<Span>, Vec<Vec<Button>>), FormatError> {
    let mut buttons = Vec::new();
    let mut kept = String::with_capacity(text.len());
    // removed ranges, in UTF-16 units of `text`
    let mut removed: Vec<(usize, usize)> = Vec::new();
    let mut last = 0;
    for cap in BUTTON_RE.captures_iter(text) {
        let Some(m) = cap.get(0) else { continue };
        buttons.push(parse_button(
            cap[1].trim().to_string(),
            cap[2].trim().to_string(),
        )?);
        kept.push_str(&text[last..m.start()]);
        let start = utf16_len(&text[..m.start()]);
        removed.push((start, start + utf16_len(m.as_str())));
        last = m.end();
    }
    kept.push_str(&text[last..]);

    let lead = utf16_len(&kept[..kept.len() - kept.trim_start().len()]);
    let body = kept.trim();
    let body_len = utf16_len(body);
    let shift = |pos: usize| -> usize {
        let mut out = pos;
        for &(start, end) in &removed {
            if pos >= end {
                out -= end - start;
            } else if pos > start {
                out -= pos - start;
            }
        }
        out.saturating_sub(lead).min(body_len)
    };
    let spans = spans
        .iter()
        .filter_map(|s| {
            let start = shift(s.offset);
            let end = shift(s.end());
            (end > start).then(|| Span::new(s.kind, start, end - start))
        })
        .collect();
    Ok((body.to_string(), spans, layout(buttons)))
}

/// Pulls `{Label}:url` button declarations out of Bot-API HTML written by
/// hand. Returns the remaining text and the buttons laid out two per row.
pub fn extract_buttons(html: &str) -> Result<(String, Vec<Vec<Button>>), FormatError> {
    let mut buttons = Vec::new();
    for cap in BUTTON_RE.captures_iter(html) {
        buttons.push(parse_button(
            unescape(cap[1].trim()),
            unescape(cap[2].trim()),
        )?);
    }
    let text = BUTTON_RE.replace_all(html, "").trim().to_string();
    Ok((text, layout(buttons)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_escaped() {
        assert_eq!(render_html("a < b & c", &[]), "a &lt; b &amp; c");
    }

    #[test]
    fn nested_spans_render_and_parse_back() {
        let text = "hello bold world";
        let spans = vec![
            Span::new(SpanKind::Bold, 6, 10),
            Span::new(SpanKind::Italic, 11, 5),
        ];
        let html = render_html(text, &spans);
        assert_eq!(html, "hello <b>bold <i>world</i></b>");
        let (plain, parsed) = parse_html(&html).unwrap();
        assert_eq!(plain, text);
        assert_eq!(parsed, normalize_spans(&spans));
    }

    #[test]
    fn overlapping_spans_stay_well_nested() {
        let text = "abcdefgh";
        let spans = vec![
            Span::new(SpanKind::Bold, 0, 5),
            Span::new(SpanKind::Italic, 3, 5),
        ];
        let html = render_html(text, &spans);
        assert_eq!(html, "<b>abc<i>de</i></b><i>fgh</i>");
        let (plain, parsed) = parse_html(&html).unwrap();
        assert_eq!(plain, text);
        assert_eq!(parsed, normalize_spans(&spans));
    }

    #[test]
    fn offsets_count_utf16_units() {
        // the emoji takes two UTF-16 units
        let text = "😀 hi <x>";
        let spans = vec![Span::new(SpanKind::Code, 3, 6)];
        let html = render_html(text, &spans);
        assert_eq!(html, "😀 <code>hi &lt;x&gt;</code>");
        let (plain, parsed) = parse_html(&html).unwrap();
        assert_eq!(plain, text);
        assert_eq!(parsed, spans);
    }

    #[test]
    fn spans_past_the_end_are_clamped() {
        let html = render_html("abc", &[Span::new(SpanKind::Spoiler, 1, 50)]);
        assert_eq!(html, "a<tg-spoiler>bc</tg-spoiler>");
    }

    #[test]
    fn parse_rejects_unknown_and_unbalanced_tags() {
        assert_eq!(
            parse_html("<blink>x</blink>"),
            Err(FormatError::UnknownTag("blink".into()))
        );
        assert_eq!(
            parse_html("<b>x</i>"),
            Err(FormatError::UnbalancedTag("i".into()))
        );
    }

    #[test]
    fn buttons_are_extracted_two_per_row() {
        let html = "Join us!\n{Channel}:https://t.me/a {Chat}:https://t.me/b\n{Site}:https://example.com/?a=1&amp;b=2";
        let (text, rows) = extract_buttons(html).unwrap();
        assert_eq!(text, "Join us!");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[0][0].text, "Channel");
        assert_eq!(
            rows[1][0],
            Button::url(
                "Site",
                reqwest::Url::parse("https://example.com/?a=1&b=2").unwrap()
            )
        );
    }

    #[test]
    fn invalid_button_url_is_rejected() {
        let err = extract_buttons("{Bad}:not-a-url").unwrap_err();
        assert!(matches!(err, FormatError::InvalidUrl { .. }));
    }

    #[test]
    fn stripped_buttons_keep_spans_on_their_text() {
        let text = "Hi {Go}:https://t.me/a there";
        // bold covers "Hi " and the declaration; italic covers "there"
        let spans = vec![
            Span::new(SpanKind::Bold, 0, 22),
            Span::new(SpanKind::Italic, 23, 5),
        ];
        let (plain, moved, rows) = strip_buttons(text, &spans).unwrap();
        assert_eq!(plain, "Hi  there");
        assert_eq!(
            moved,
            vec![
                Span::new(SpanKind::Bold, 0, 3),
                Span::new(SpanKind::Italic, 4, 5)
            ]
        );
        assert_eq!(rows[0][0].text, "Go");
        assert_eq!(render_html(&plain, &moved), "<b>Hi </b> <i>there</i>");
    }

    #[test]
    fn button_url_stops_at_markup() {
        let html = "<b>News {Read}:https://example.com/post</b>";
        let (text, rows) = extract_buttons(html).unwrap();
        assert_eq!(text, "<b>News </b>");
        assert_eq!(
            rows[0][0].action,
            crate::model::ButtonAction::Url(reqwest::Url::parse("https://example.com/post").unwrap())
        );
    }
}
