//! Section parser and merger for generated lesson documents.
//!
//! A lesson is a markdown document with one `#` title followed by `##`
//! sections. Parsing walks the pulldown-cmark event stream and uses only
//! top-level heading nodes as boundaries, so `##` lines inside code fences,
//! block quotes or lists never split a section.
//!
//! The parse is lossless: `preamble + Σ(heading + content)` is the original
//! text byte for byte. Merging swaps one section's content and copies every
//! other byte through unchanged.

use std::ops::Range;

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use crate::error::DocumentError;

/// Characters per token used for budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

pub const INTRODUCTION_ID: &str = "introduction";
pub const SUMMARY_ID: &str = "summary";

/// One addressable `##` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Positional id: `introduction`, `section_N` or `summary`.
    pub id: String,
    /// Heading text without markup.
    pub title: String,
    /// Raw heading line(s), including the line terminator.
    pub heading: String,
    /// Everything after the heading up to the next section.
    pub content: String,
    /// Zero-based line of the heading.
    pub start_line: usize,
    /// Zero-based line one past the section's last line.
    pub end_line: usize,
}

/// A lesson document split into sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub lesson_title: String,
    /// Raw text before the first section (title line included).
    pub preamble: String,
    pub sections: Vec<Section>,
}

struct HeadingSpan {
    level: HeadingLevel,
    /// Offset of the first byte of the heading's first line.
    start: usize,
    /// Offset just past the heading's last line terminator.
    body_start: usize,
    title: String,
}

/// Parses `text` into a title, preamble and ordered sections.
///
/// Documents without `##` headings yield no sections. A single section is
/// `introduction`; with two or more the first is `introduction`, the last
/// `summary` and the rest `section_1..k` in order.
pub fn parse_document(text: &str) -> ParsedDocument {
    let headings = top_level_headings(text);

    let boundaries: Vec<&HeadingSpan> = headings
        .iter()
        .filter(|h| h.level == HeadingLevel::H2)
        .collect();
    let preamble_end = boundaries.first().map(|h| h.start).unwrap_or(text.len());

    let lesson_title = headings
        .iter()
        .take_while(|h| h.start < preamble_end)
        .find(|h| h.level == HeadingLevel::H1)
        .map(|h| h.title.clone())
        .unwrap_or_default();

    let ids = section_ids(boundaries.len());
    let sections = boundaries
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let end = boundaries.get(i + 1).map(|n| n.start).unwrap_or(text.len());
            Section {
                id: ids[i].clone(),
                title: h.title.clone(),
                heading: text[h.start..h.body_start].to_string(),
                content: text[h.body_start..end].to_string(),
                start_line: line_index(text, h.start),
                end_line: end_line_index(text, end),
            }
        })
        .collect();

    ParsedDocument {
        lesson_title,
        preamble: text[..preamble_end].to_string(),
        sections,
    }
}

/// Ids for `count` sections in document order.
pub fn section_ids(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            if i == 0 {
                INTRODUCTION_ID.to_string()
            } else if i == count - 1 {
                SUMMARY_ID.to_string()
            } else {
                format!("section_{}", i)
            }
        })
        .collect()
}

/// Rough token count for budget checks.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// A whole-lesson rewrite replaces every byte, so the model has to see all
/// of it. Lessons over `max_tokens` are refused rather than cut.
pub fn check_lesson_size(lesson_id: &str, content: &str, max_tokens: u32) -> Result<(), DocumentError> {
    let tokens = estimate_tokens(content);
    let limit = max_tokens as usize;
    if tokens > limit {
        return Err(DocumentError::LessonTooLarge {
            lesson_id: lesson_id.to_string(),
            tokens,
            limit,
        });
    }
    Ok(())
}

impl ParsedDocument {
    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    pub fn section_ids(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.id.as_str()).collect()
    }

    fn index_of(&self, section_id: &str) -> Result<usize, DocumentError> {
        self.sections
            .iter()
            .position(|s| s.id == section_id)
            .ok_or_else(|| DocumentError::SectionNotFound {
                section_id: section_id.to_string(),
            })
    }

    /// Reassembles the document.
    pub fn to_markdown(&self) -> String {
        let mut out = self.preamble.clone();
        for section in &self.sections {
            out.push_str(&section.heading);
            out.push_str(&section.content);
        }
        out
    }

    /// Title plus everything preceding the target section.
    pub fn context_for(&self, section_id: &str) -> Result<String, DocumentError> {
        let idx = self.index_of(section_id)?;
        let mut context = self.preamble.clone();
        for section in &self.sections[..idx] {
            context.push_str(&section.heading);
            context.push_str(&section.content);
        }
        Ok(context)
    }

    /// Like [`context_for`](Self::context_for) but cut to `max_tokens`.
    ///
    /// The title line is always kept; the rest is trimmed from the front so
    /// the text nearest the target survives.
    pub fn context_within(&self, section_id: &str, max_tokens: u32) -> Result<String, DocumentError> {
        let full = self.context_for(section_id)?;
        let max_chars = max_tokens as usize * CHARS_PER_TOKEN;
        if full.chars().count() <= max_chars {
            return Ok(full);
        }

        let head = if self.lesson_title.is_empty() {
            String::new()
        } else {
            format!("# {}\n\n", self.lesson_title)
        };
        let remaining = max_chars.saturating_sub(head.chars().count());
        let tail = tail_chars(&full, remaining);

        // Start on a line boundary when one is available.
        let tail = match tail.find('\n') {
            Some(nl) if nl + 1 < tail.len() => &tail[nl + 1..],
            _ => tail,
        };

        Ok(format!("{}{}", head, tail))
    }

    /// Replaces one section's content and returns the full new document.
    ///
    /// The original heading is kept. A leading line in `new_content` that
    /// repeats the heading is dropped, the original blank-line spacing around
    /// the section is kept, `##` headings inside the replacement are demoted
    /// to `###` and an unterminated code fence is closed, so the result
    /// re-parses into the same set of sections.
    pub fn merge(&self, section_id: &str, new_content: &str) -> Result<String, DocumentError> {
        let idx = self.index_of(section_id)?;
        let target = &self.sections[idx];
        let is_last = idx + 1 == self.sections.len();
        let replacement = self.replacement_content(target, is_last, new_content);

        let mut out = self.preamble.clone();
        for (i, section) in self.sections.iter().enumerate() {
            out.push_str(&section.heading);
            if i == idx {
                out.push_str(&replacement);
            } else {
                out.push_str(&section.content);
            }
        }
        Ok(out)
    }

    fn replacement_content(&self, target: &Section, is_last: bool, new_content: &str) -> String {
        let (lead, rest) = split_blank_prefix(&target.content);
        let core = rest.trim_end();
        let trailing = &rest[core.len()..];

        let body = strip_repeated_heading(new_content, &target.title);
        let (_, body) = split_blank_prefix(body);
        let body = demote_section_headings(body.trim_end());
        let body = close_open_fence(body.trim_end());

        if body == core {
            return target.content.clone();
        }
        if body.is_empty() {
            return format!("{}{}", lead, trailing);
        }

        let mut out = String::new();
        if !target.heading.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(lead);
        out.push_str(&body);
        if is_last {
            out.push_str(trailing);
        } else if trailing.matches('\n').count() >= 2 {
            out.push_str(trailing);
        } else {
            // A paragraph directly above a setext heading would swallow it.
            out.push_str("\n\n");
        }
        out
    }
}

/// Collects headings that are direct children of the document root.
fn top_level_headings(text: &str) -> Vec<HeadingSpan> {
    let mut headings = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<(HeadingLevel, Range<usize>, String)> = None;

    for (event, range) in Parser::new_ext(text, Options::empty()).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) if depth == 0 => {
                current = Some((level, range, String::new()));
                depth += 1;
            }
            Event::Start(_) => depth += 1,
            Event::End(TagEnd::Heading(_)) if depth == 1 => {
                depth -= 1;
                if let Some((level, range, title)) = current.take() {
                    headings.push(HeadingSpan {
                        level,
                        start: line_start(text, range.start),
                        body_start: heading_end(text, range.end),
                        title: title.trim().to_string(),
                    });
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, _, ref mut title)) = current {
                    title.push_str(&t);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some((_, _, ref mut title)) = current {
                    title.push(' ');
                }
            }
            _ => {}
        }
    }

    headings
}

fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Offset just past the line terminator of the line a heading range ends on.
fn heading_end(text: &str, range_end: usize) -> usize {
    if range_end >= text.len() {
        return text.len();
    }
    if text[..range_end].ends_with('\n') {
        return range_end;
    }
    match text[range_end..].find('\n') {
        Some(i) => range_end + i + 1,
        None => text.len(),
    }
}

fn line_index(text: &str, pos: usize) -> usize {
    text[..pos].matches('\n').count()
}

fn end_line_index(text: &str, end: usize) -> usize {
    let newlines = line_index(text, end);
    if end == text.len() && !text.is_empty() && !text.ends_with('\n') {
        newlines + 1
    } else {
        newlines
    }
}

fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let idx = s
        .char_indices()
        .nth(count - n)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[idx..]
}

/// Splits off leading blank lines, keeping indentation of the first
/// non-blank line with the remainder.
fn split_blank_prefix(s: &str) -> (&str, &str) {
    let ws_len = s.len() - s.trim_start().len();
    match s[..ws_len].rfind('\n') {
        Some(nl) => s.split_at(nl + 1),
        None => ("", s),
    }
}

fn strip_repeated_heading<'a>(content: &'a str, title: &str) -> &'a str {
    let (_, rest) = split_blank_prefix(content);
    let (first_line, remainder) = match rest.find('\n') {
        Some(nl) => (&rest[..nl], &rest[nl + 1..]),
        None => (rest, ""),
    };
    let line = first_line.trim();
    if !line.starts_with('#') {
        return content;
    }
    let text = line.trim_start_matches('#').trim_end_matches('#').trim();
    if !title.is_empty() && text == title {
        remainder
    } else {
        content
    }
}

/// Rewrites top-level `##` headings in a replacement body as `###`.
fn demote_section_headings(body: &str) -> String {
    let spans: Vec<HeadingSpan> = top_level_headings(body)
        .into_iter()
        .filter(|h| h.level == HeadingLevel::H2)
        .collect();
    if spans.is_empty() {
        return body.to_string();
    }

    let mut out = String::with_capacity(body.len() + spans.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&body[cursor..span.start]);
        out.push_str("### ");
        out.push_str(&span.title);
        out.push('\n');
        cursor = span.body_start;
    }
    out.push_str(&body[cursor..]);
    out
}

/// Appends a closing fence when `body` ends inside a fenced code block.
fn close_open_fence(body: &str) -> String {
    let mut open: Option<(char, usize)> = None;
    for line in body.lines() {
        let trimmed = line.trim_start();
        if line.len() - trimmed.len() > 3 {
            continue;
        }
        let marker = match trimmed.chars().next() {
            Some(c @ ('`' | '~')) => c,
            _ => continue,
        };
        let run = trimmed.chars().take_while(|&c| c == marker).count();
        if run < 3 {
            continue;
        }
        match open {
            None => open = Some((marker, run)),
            Some((m, len)) if m == marker && run >= len && trimmed[run..].trim().is_empty() => {
                open = None
            }
            Some(_) => {}
        }
    }

    match open {
        Some((marker, len)) => {
            let fence: String = std::iter::repeat(marker).take(len).collect();
            format!("{}\n{}", body, fence)
        }
        None => body.to_string(),
    }
}
