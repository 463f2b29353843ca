//! PDF output.
//!
//! The rendered HTML is reduced to text and laid out by a [`PdfBackend`].
//! The built-in [`TextPdf`] writes a plain PDF 1.4 file: Helvetica, A4,
//! word wrapping and pagination. Given the same document it produces the
//! same bytes; only `/CreationDate` tracks `created`.
use chrono::{DateTime, Utc};
use reportgen_core::{ReportError, Result};
use std::fmt::Write as _;

/// Input for a PDF backend.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub title: String,
    pub html: String,
    pub text: String,
    pub created: DateTime<Utc>,
}

pub trait PdfBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Backend failures should be `ReportError::Render`; the engine retries them.
    fn render(&self, doc: &PdfDocument) -> Result<Vec<u8>>;
}

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const TITLE_SIZE: f32 = 16.0;

#[derive(Debug, Clone)]
pub struct TextPdf {
    pub font_size: f32,
}

impl Default for TextPdf {
    fn default() -> Self {
        Self { font_size: 10.0 }
    }
}

impl TextPdf {
    fn leading(&self) -> f32 {
        self.font_size * 1.4
    }

    /// Helvetica averages about half an em per glyph.
    fn chars_per_line(&self) -> usize {
        ((PAGE_WIDTH - 2.0 * MARGIN) / (self.font_size * 0.5)).floor().max(10.0) as usize
    }

    fn lines_per_page(&self) -> usize {
        ((PAGE_HEIGHT - 2.0 * MARGIN) / self.leading()).floor().max(1.0) as usize
    }

    fn paginate(&self, title: &str, text: &str) -> Vec<Vec<String>> {
        let width = self.chars_per_line();
        let mut lines = Vec::new();
        for line in text.lines() {
            lines.extend(wrap(line, width));
        }

        // The title takes two body lines on the first page.
        let per_page = self.lines_per_page();
        let first = if title.is_empty() {
            per_page
        } else {
            per_page.saturating_sub(2).max(1)
        };

        let mut pages = Vec::new();
        let mut rest = lines.as_slice();
        let mut capacity = first;
        loop {
            let take = rest.len().min(capacity);
            pages.push(rest[..take].to_vec());
            rest = &rest[take..];
            if rest.is_empty() {
                break;
            }
            capacity = per_page;
        }
        pages
    }

    fn content_stream(&self, title: Option<&str>, lines: &[String]) -> Vec<u8> {
        let mut out = Vec::new();
        let top = PAGE_HEIGHT - MARGIN;
        out.extend_from_slice(b"BT\n");
        let mut y = top;
        if let Some(title) = title {
            out.extend_from_slice(format!("/F2 {} Tf\n", TITLE_SIZE).as_bytes());
            out.extend_from_slice(format!("1 0 0 1 {} {} Tm\n", MARGIN, y - TITLE_SIZE).as_bytes());
            write_string(&mut out, title);
            out.extend_from_slice(b" Tj\n");
            y -= 2.0 * self.leading();
        }
        out.extend_from_slice(
            format!("/F1 {} Tf\n{} TL\n", self.font_size, self.leading()).as_bytes(),
        );
        out.extend_from_slice(
            format!("1 0 0 1 {} {} Tm\n", MARGIN, y - self.font_size).as_bytes(),
        );
        for line in lines {
            write_string(&mut out, line);
            out.extend_from_slice(b" Tj T*\n");
        }
        out.extend_from_slice(b"ET\n");
        out
    }
}

impl PdfBackend for TextPdf {
    fn name(&self) -> &str {
        "text-pdf"
    }

    fn render(&self, doc: &PdfDocument) -> Result<Vec<u8>> {
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(ReportError::render("pdf", "font size must be positive"));
        }
        let pages = self.paginate(&doc.title, &doc.text);

        let mut writer = ObjectWriter::new();
        let page_ids: Vec<usize> = (0..pages.len()).map(|i| 6 + 2 * i).collect();

        writer.object(1, b"<< /Type /Catalog /Pages 2 0 R >>");
        let kids = page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect::<Vec<_>>()
            .join(" ");
        writer.object(
            2,
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids, pages.len()).as_bytes(),
        );
        writer.object(
            3,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
        );
        writer.object(
            4,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>",
        );

        let mut info = b"<< /Producer (reportgen) /Title ".to_vec();
        write_string(&mut info, &doc.title);
        info.extend_from_slice(
            format!(" /CreationDate (D:{}Z) >>", doc.created.format("%Y%m%d%H%M%S")).as_bytes(),
        );
        writer.object(5, &info);

        for (idx, lines) in pages.iter().enumerate() {
            let page_id = page_ids[idx];
            let title = (idx == 0 && !doc.title.is_empty()).then_some(doc.title.as_str());
            let content = self.content_stream(title, lines);
            writer.object(
                page_id,
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                     /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                    PAGE_WIDTH,
                    PAGE_HEIGHT,
                    page_id + 1
                )
                .as_bytes(),
            );
            writer.stream(page_id + 1, &content);
        }

        Ok(writer.finish(1, 5))
    }
}

/// Byte buffer that records object offsets for the xref table.
struct ObjectWriter {
    buf: Vec<u8>,
    offsets: Vec<(usize, usize)>,
}

impl ObjectWriter {
    fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            offsets: Vec::new(),
        }
    }

    fn object(&mut self, id: usize, body: &[u8]) {
        self.offsets.push((id, self.buf.len()));
        self.buf.extend_from_slice(format!("{} 0 obj\n", id).as_bytes());
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, id: usize, data: &[u8]) {
        let mut body = format!("<< /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object(id, &body);
    }

    fn finish(mut self, root: usize, info: usize) -> Vec<u8> {
        self.offsets.sort_unstable();
        let size = self.offsets.last().map(|(id, _)| id + 1).unwrap_or(1);
        let xref_at = self.buf.len();

        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", size);
        let mut next = 1;
        for (id, offset) in &self.offsets {
            // Unused ids are free entries.
            while next < *id {
                xref.push_str("0000000000 65535 f \n");
                next += 1;
            }
            let _ = writeln!(xref, "{:010} 00000 n ", offset);
            next = id + 1;
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            size, root, info, xref_at
        );
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }
}

/// Write a PDF literal string in WinAnsi, octal-escaping non-ASCII bytes.
fn write_string(out: &mut Vec<u8>, text: &str) {
    out.push(b'(');
    for ch in text.chars() {
        match win_ansi(ch) {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(win_ansi(ch));
            }
            byte @ 0x20..=0x7e => out.push(byte),
            byte => out.extend_from_slice(format!("\\{:03o}", byte).as_bytes()),
        }
    }
    out.push(b')');
}

fn win_ansi(ch: char) -> u8 {
    match ch {
        '\t' => b' ',
        ' '..='~' => ch as u8,
        '\u{a0}'..='\u{ff}' => ch as u32 as u8,
        '€' => 0x80,
        '‚' => 0x82,
        '…' => 0x85,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '™' => 0x99,
        _ => b'?',
    }
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    let line = line.trim_end();
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in line.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        // Hard-break words longer than a line.
        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Reduce rendered HTML to plain text for the PDF body.
///
/// Block elements start new lines, table cells are separated by ` | `,
/// `head`/`script`/`style` content is dropped and entities are decoded.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut skipping: Option<String> = None;
    let mut rest = html;

    while let Some(pos) = rest.find('<') {
        let (text, after) = rest.split_at(pos);
        if skipping.is_none() {
            push_text(&mut out, text);
        }

        if let Some(comment) = after.strip_prefix("<!--") {
            rest = comment.find("-->").map(|end| &comment[end + 3..]).unwrap_or("");
            continue;
        }
        let Some(end) = after.find('>') else {
            if skipping.is_none() {
                push_text(&mut out, after);
            }
            rest = "";
            break;
        };
        let (closing, name) = tag_name(&after[1..end]);
        rest = &after[end + 1..];

        if let Some(target) = &skipping {
            if closing && &name == target {
                skipping = None;
            }
            continue;
        }

        match name.as_str() {
            "head" | "script" | "style" | "title" if !closing => skipping = Some(name.clone()),
            "td" | "th" if !closing => {
                trim_trailing_spaces(&mut out);
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push_str(" | ");
                }
            }
            "br" | "p" | "div" | "tr" | "li" | "table" | "thead" | "tbody" | "ul" | "ol"
            | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "hr" | "section" | "header"
            | "footer" | "article" | "pre" | "blockquote" => {
                trim_trailing_spaces(&mut out);
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    if skipping.is_none() {
        push_text(&mut out, rest);
    }

    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn tag_name(tag: &str) -> (bool, String) {
    let tag = tag.trim();
    let (closing, body) = match tag.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, tag),
    };
    let name = body
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    (closing, name)
}

fn trim_trailing_spaces(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
}

fn push_text(out: &mut String, text: &str) {
    for ch in decode_entities(text).chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !out.ends_with(' ') && !out.ends_with('\n') {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos..];
        let decoded = after
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| entity(&after[1..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
