//! Word (.docx) template engine.
//!
//! Tags live in the text of `<w:t>` elements:
//! - `{name}` text, line breaks become `<w:br/>`
//! - `{#name}...{/name}` section (list loop, flag or non-empty text)
//! - `{^name}...{/name}` inverted section
//! - `{%name}` inline image from a data URL
//!
//! Word often splits a tag across several runs, so each part is first coalesced:
//! the whole tag is moved into the `<w:t>` holding its opening brace. Sections
//! then expand to whole XML elements (run, table row or paragraph) so every
//! repetition stays well-formed.

use std::collections::{BTreeSet, HashSet};
use std::io::{Cursor, Read, Write};
use std::ops::Range;
use std::str::FromStr;

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use regex::Regex;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::models::profile::{DecodedImage, ImagePayload};
use crate::render::bindings::{Bindings, TemplateValue};
use crate::render::{DocumentRenderer, RenderError, TemplateDocument};

const DOCUMENT_PART: &str = "word/document.xml";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const EMU_PER_PIXEL: u64 = 9525;
const DOC_PR_ID_BASE: usize = 5000;

const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const IMAGE_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const EMPTY_RELATIONSHIPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;

static RE_TEMPLATE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^word/(document|header\d*|footer\d*)\.xml$").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]*)\}").unwrap());

/// What happens to a tag that has no binding in any scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingTagPolicy {
    /// Leave the tag text in the output.
    #[default]
    Keep,
    /// Render the tag as empty text.
    Blank,
    /// Fail with `RenderError::UnresolvedTokens`.
    Fail,
}

impl FromStr for MissingTagPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(MissingTagPolicy::Keep),
            "blank" => Ok(MissingTagPolicy::Blank),
            "fail" => Ok(MissingTagPolicy::Fail),
            other => Err(format!("unknown missing tag policy '{other}' (expected keep, blank or fail)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Drop paragraphs that contain nothing but a section tag.
    pub paragraph_loop: bool,
    /// Turn `\n` in values into Word line breaks.
    pub linebreaks: bool,
    /// Display size applied to every embedded image, in pixels.
    pub image_size_px: (u32, u32),
    pub missing_tags: MissingTagPolicy,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            paragraph_loop: true,
            linebreaks: true,
            image_size_px: (230, 250),
            missing_tags: MissingTagPolicy::Keep,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocxRenderer {
    options: RenderOptions,
}

impl DocxRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }
}

impl DocumentRenderer for DocxRenderer {
    fn render(&self, template: &TemplateDocument, bindings: &Bindings) -> Result<Vec<u8>, RenderError> {
        let mut entries = read_entries(template.as_bytes())?;
        if !entries.iter().any(|entry| entry.name == DOCUMENT_PART) {
            return Err(RenderError::TemplateLoad(format!(
                "'{DOCUMENT_PART}' is missing; is this a .docx file?"
            )));
        }

        let mut media = MediaRegistry::new(entries.iter().map(|entry| entry.name.clone()));
        let mut unresolved = BTreeSet::new();

        for entry in entries.iter_mut().filter(|entry| RE_TEMPLATE_PART.is_match(&entry.name)) {
            let xml = std::str::from_utf8(&entry.data)
                .map_err(|e| RenderError::TemplateLoad(format!("{} is not UTF-8: {e}", entry.name)))?;
            let template = PartTemplate::parse(xml, self.options.paragraph_loop)?;
            let mut context = RenderContext {
                options: &self.options,
                part: &entry.name,
                media: &mut media,
                unresolved: &mut unresolved,
                placed_images: 0,
            };
            let mut rendered = context.render(&template, bindings)?;
            if context.placed_images > 0 {
                rendered = ensure_namespaces(&rendered, &[("wp", NS_WP), ("r", NS_R)])?;
            }
            debug!("Rendered template part {}", entry.name);
            entry.data = rendered.into_bytes();
        }

        if !unresolved.is_empty() {
            return Err(RenderError::UnresolvedTokens(unresolved.into_iter().collect()));
        }

        media.apply(&mut entries)?;
        write_entries(&entries)
    }
}

// ── Container I/O ────────────────────────────────────────────────────────────

struct ZipEntry {
    name: String,
    data: Vec<u8>,
}

fn read_entries(bytes: &[u8]) -> Result<Vec<ZipEntry>, RenderError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| RenderError::TemplateLoad(e.to_string()))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| RenderError::TemplateLoad(e.to_string()))?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| RenderError::TemplateLoad(e.to_string()))?;
        entries.push(ZipEntry {
            name: file.name().to_string(),
            data,
        });
    }
    Ok(entries)
}

fn write_entries(entries: &[ZipEntry]) -> Result<Vec<u8>, RenderError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for entry in entries {
        writer
            .start_file(entry.name.as_str(), options)
            .map_err(|e| RenderError::Output(e.to_string()))?;
        writer
            .write_all(&entry.data)
            .map_err(|e| RenderError::Output(e.to_string()))?;
    }
    let cursor = writer.finish().map_err(|e| RenderError::Output(e.to_string()))?;
    Ok(cursor.into_inner())
}

// ── Part parsing ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum TagKind {
    Placeholder,
    Image,
    Open { inverted: bool },
    Close,
}

#[derive(Debug, Clone)]
struct Tag {
    range: Range<usize>,
    kind: TagKind,
    name: String,
    /// Index of the `<w:t>` element holding the tag.
    text_element: usize,
    /// Innermost enclosing section.
    parent: Option<usize>,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    inverted: bool,
    outer: Range<usize>,
    inner: Vec<Range<usize>>,
    parent: Option<usize>,
}

/// An XML element located by byte offsets into its part.
#[derive(Debug, Clone)]
struct Element {
    name: String,
    range: Range<usize>,
    /// End of the opening tag (start of content).
    content_start: usize,
    /// Start of the closing tag (end of content). Equal to `content_start` for
    /// self-closing elements.
    content_end: usize,
    parent: Option<usize>,
}

impl Element {
    fn content(&self) -> Range<usize> {
        self.content_start..self.content_end
    }
}

/// One XML part after coalescing, with its tags, sections and element index.
struct PartTemplate {
    xml: String,
    tags: Vec<Tag>,
    sections: Vec<Section>,
}

impl PartTemplate {
    fn parse(xml: &str, paragraph_loop: bool) -> Result<Self, RenderError> {
        let xml = coalesce_tags(xml)?;
        let elements = index_elements(&xml)?;
        let text_elements = text_element_ranges(&elements);
        let mut tags = scan_tags(&xml, &text_elements)?;

        let mut sections: Vec<Section> = Vec::new();
        let mut stack: Vec<(usize, usize)> = Vec::new(); // (tag index, section index)

        for index in 0..tags.len() {
            tags[index].parent = stack.last().map(|&(_, section)| section);
            match tags[index].kind {
                TagKind::Open { inverted } => {
                    sections.push(Section {
                        name: tags[index].name.clone(),
                        inverted,
                        outer: 0..0,
                        inner: Vec::new(),
                        parent: tags[index].parent,
                    });
                    stack.push((index, sections.len() - 1));
                }
                TagKind::Close => {
                    let (open_index, section_index) = stack.pop().ok_or_else(|| {
                        RenderError::Template(format!("closing tag {{/{}}} has no opening tag", tags[index].name))
                    })?;
                    let open = &tags[open_index];
                    let close = &tags[index];
                    if open.name != close.name {
                        return Err(RenderError::Template(format!(
                            "section {{#{}}} is closed by {{/{}}}",
                            open.name, close.name
                        )));
                    }
                    let (outer, inner) =
                        section_span(&xml, &elements, &text_elements, open, close, paragraph_loop)?;
                    sections[section_index].outer = outer;
                    sections[section_index].inner = inner;
                }
                TagKind::Placeholder | TagKind::Image => {}
            }
        }

        if let Some(&(open_index, _)) = stack.last() {
            return Err(RenderError::Template(format!(
                "section {{#{}}} is never closed",
                tags[open_index].name
            )));
        }

        // Expanded sections swallow whatever shares their run, row or paragraph.
        for tag in tags.iter_mut().filter(|tag| is_leaf(tag)) {
            tag.parent = innermost_section(&sections, &tag.range, None).or(tag.parent);
        }
        for index in 0..sections.len() {
            let outer = sections[index].outer.clone();
            sections[index].parent = innermost_section(&sections, &outer, Some(index)).or(sections[index].parent);
        }

        Ok(Self { xml, tags, sections })
    }
}

/// Innermost section whose outer range covers `range`. Of two sections with the
/// same outer range, the one opened first is the outer one.
fn innermost_section(sections: &[Section], range: &Range<usize>, this: Option<usize>) -> Option<usize> {
    sections
        .iter()
        .enumerate()
        .filter(|&(index, section)| {
            Some(index) != this
                && section.outer.start <= range.start
                && range.end <= section.outer.end
                && (section.outer != *range || this.is_some_and(|this| index < this))
        })
        .max_by_key(|&(index, section)| (section.outer.start, std::cmp::Reverse(section.outer.end), index))
        .map(|(index, _)| index)
}

/// Moves every tag split across `<w:t>` elements into the element holding its `{`.
fn coalesce_tags(xml: &str) -> Result<String, RenderError> {
    let elements: Vec<_> = index_elements(xml)?
        .into_iter()
        .filter(|element| element.name == "w:t")
        .collect();

    let mut texts = vec![String::new(); elements.len()];
    let mut open: Option<usize> = None;
    for (index, element) in elements.iter().enumerate() {
        for ch in xml[element.content()].chars() {
            texts[open.unwrap_or(index)].push(ch);
            match ch {
                '{' if open.is_none() => open = Some(index),
                '}' => open = None,
                _ => {}
            }
        }
    }
    if let Some(index) = open {
        return Err(RenderError::Template(format!(
            "unclosed tag starting at '{}'",
            texts[index].rsplit('{').next().unwrap_or_default()
        )));
    }

    let mut out = String::with_capacity(xml.len());
    let mut last = 0;
    for (element, text) in elements.iter().zip(texts) {
        out.push_str(&xml[last..element.range.start]);
        out.push_str("<w:t xml:space=\"preserve\">");
        out.push_str(&text);
        out.push_str("</w:t>");
        last = element.range.end;
    }
    out.push_str(&xml[last..]);
    Ok(out)
}

/// Content ranges of the `<w:t>` elements, in document order.
fn text_element_ranges(elements: &[Element]) -> Vec<Range<usize>> {
    elements
        .iter()
        .filter(|element| element.name == "w:t")
        .map(Element::content)
        .collect()
}

fn scan_tags(xml: &str, text_elements: &[Range<usize>]) -> Result<Vec<Tag>, RenderError> {
    let mut tags = Vec::new();
    for (element, content) in text_elements.iter().enumerate() {
        for caps in RE_TAG.captures_iter(&xml[content.clone()]) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let raw = inner.as_str().trim();
            let (kind, name) = match raw.chars().next() {
                Some('#') => (TagKind::Open { inverted: false }, &raw[1..]),
                Some('^') => (TagKind::Open { inverted: true }, &raw[1..]),
                Some('/') => (TagKind::Close, &raw[1..]),
                Some('%') => (TagKind::Image, &raw[1..]),
                _ => (TagKind::Placeholder, raw),
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(RenderError::Template(format!("empty tag '{}'", whole.as_str())));
            }
            tags.push(Tag {
                range: content.start + whole.start()..content.start + whole.end(),
                kind,
                name: name.to_string(),
                text_element: element,
                parent: None,
            });
        }
    }
    Ok(tags)
}

fn xml_error(e: quick_xml::Error) -> RenderError {
    RenderError::TemplateLoad(format!("malformed XML: {e}"))
}

/// Start offset of the markup that ends at `end`.
fn markup_start(xml: &str, end: usize) -> usize {
    xml[..end].rfind('<').unwrap_or(end)
}

fn element_name(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Every element of `xml` with its byte range and parent, in document order.
fn index_elements(xml: &str) -> Result<Vec<Element>, RenderError> {
    let mut reader = Reader::from_str(xml);
    let mut elements: Vec<Element> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        let end = reader.buffer_position();
        match event {
            XmlEvent::Start(start) => {
                elements.push(Element {
                    name: element_name(&start),
                    range: markup_start(xml, end)..end,
                    content_start: end,
                    content_end: end,
                    parent: stack.last().copied(),
                });
                stack.push(elements.len() - 1);
            }
            XmlEvent::Empty(start) => elements.push(Element {
                name: element_name(&start),
                range: markup_start(xml, end)..end,
                content_start: end,
                content_end: end,
                parent: stack.last().copied(),
            }),
            XmlEvent::End(close) => {
                let index = stack.pop().ok_or_else(|| {
                    RenderError::TemplateLoad(format!(
                        "unexpected closing element </{}>",
                        String::from_utf8_lossy(close.name().as_ref())
                    ))
                })?;
                elements[index].content_end = markup_start(xml, end);
                elements[index].range.end = end;
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    if let Some(&index) = stack.last() {
        return Err(RenderError::TemplateLoad(format!(
            "element <{}> is never closed",
            elements[index].name
        )));
    }
    Ok(elements)
}

/// Innermost element named `name` containing `position`.
fn enclosing<'a>(elements: &'a [Element], name: &str, position: usize) -> Option<&'a Element> {
    elements
        .iter()
        .filter(|element| element.name == name && element.range.contains(&position))
        .max_by_key(|element| element.range.start)
}

fn same_element(a: &Element, b: &Element) -> bool {
    a.range == b.range
}

fn siblings(a: &Element, b: &Element) -> bool {
    a.parent == b.parent
}

/// Whether the only text inside `paragraph` is the tag itself.
fn tag_alone_in(xml: &str, text_elements: &[Range<usize>], paragraph: &Element, tag: &Tag) -> bool {
    let text: String = text_elements
        .iter()
        .filter(|content| paragraph.range.contains(&content.start))
        .map(|content| &xml[content.clone()])
        .collect();
    text.trim() == &xml[tag.range.clone()]
}

/// Resolves the outer range a section replaces and the inner ranges it repeats.
fn section_span(
    xml: &str,
    elements: &[Element],
    text_elements: &[Range<usize>],
    open: &Tag,
    close: &Tag,
    paragraph_loop: bool,
) -> Result<(Range<usize>, Vec<Range<usize>>), RenderError> {
    let around = |a: &Element, b: &Element| {
        (
            a.range.start..b.range.end,
            vec![
                a.range.start..open.range.start,
                open.range.end..close.range.start,
                close.range.end..b.range.end,
            ],
        )
    };

    if open.text_element == close.text_element {
        return Ok((
            open.range.start..close.range.end,
            vec![open.range.end..close.range.start],
        ));
    }

    let (Some(p_open), Some(p_close)) = (
        enclosing(elements, "w:p", open.range.start),
        enclosing(elements, "w:p", close.range.start),
    ) else {
        return Err(RenderError::Template(format!(
            "section {{#{}}} is not inside a paragraph",
            open.name
        )));
    };

    if same_element(p_open, p_close) {
        let runs = (
            enclosing(elements, "w:r", open.range.start),
            enclosing(elements, "w:r", close.range.start),
        );
        return Ok(match runs {
            (Some(r_open), Some(r_close)) if siblings(r_open, r_close) => around(r_open, r_close),
            _ => around(p_open, p_close),
        });
    }

    if paragraph_loop
        && siblings(p_open, p_close)
        && tag_alone_in(xml, text_elements, p_open, open)
        && tag_alone_in(xml, text_elements, p_close, close)
    {
        return Ok((
            p_open.range.start..p_close.range.end,
            vec![p_open.range.end..p_close.range.start],
        ));
    }

    if let (Some(tr_open), Some(tr_close)) = (
        enclosing(elements, "w:tr", open.range.start),
        enclosing(elements, "w:tr", close.range.start),
    ) {
        if siblings(tr_open, tr_close) {
            return Ok(around(tr_open, tr_close));
        }
    }

    if siblings(p_open, p_close) {
        return Ok(around(p_open, p_close));
    }

    Err(RenderError::Template(format!(
        "section {{#{}}} opens and closes in unrelated parts of the document",
        open.name
    )))
}

// ── Rendering ────────────────────────────────────────────────────────────────

/// A child of a section (or of the part) handled while walking a range.
#[derive(Debug, Clone, Copy)]
enum Event {
    Tag(usize),
    Section(usize),
}

struct RenderContext<'a> {
    options: &'a RenderOptions,
    part: &'a str,
    media: &'a mut MediaRegistry,
    unresolved: &'a mut BTreeSet<String>,
    placed_images: usize,
}

impl RenderContext<'_> {
    fn render(&mut self, template: &PartTemplate, bindings: &Bindings) -> Result<String, RenderError> {
        let mut out = String::with_capacity(template.xml.len());
        let mut scopes = vec![bindings];
        let handled = self.render_range(template, 0..template.xml.len(), None, &mut scopes, &mut out)?;
        let expected = template.tags.iter().filter(|t| is_leaf(t) && t.parent.is_none()).count()
            + template.sections.iter().filter(|s| s.parent.is_none()).count();
        if handled != expected {
            return Err(RenderError::Template("overlapping sections".to_string()));
        }
        Ok(out)
    }

    /// Renders `range`, handling the direct children of `parent` that start inside it.
    /// Returns how many children were handled.
    fn render_range<'b>(
        &mut self,
        template: &PartTemplate,
        range: Range<usize>,
        parent: Option<usize>,
        scopes: &mut Vec<&'b Bindings>,
        out: &mut String,
    ) -> Result<usize, RenderError> {
        let mut events: Vec<(Range<usize>, Event)> = template
            .tags
            .iter()
            .enumerate()
            .filter(|(_, tag)| is_leaf(tag) && tag.parent == parent)
            .map(|(index, tag)| (tag.range.clone(), Event::Tag(index)))
            .chain(
                template
                    .sections
                    .iter()
                    .enumerate()
                    .filter(|(_, section)| section.parent == parent)
                    .map(|(index, section)| (section.outer.clone(), Event::Section(index))),
            )
            .filter(|(span, _)| range.contains(&span.start))
            .collect();
        events.sort_by_key(|(span, _)| span.start);

        let mut position = range.start;
        for (span, event) in &events {
            if span.start < position || span.end > range.end {
                return Err(RenderError::Template(format!(
                    "overlapping sections near '{}'",
                    event_name(template, *event)
                )));
            }
            out.push_str(&template.xml[position..span.start]);
            match *event {
                Event::Tag(index) => self.render_tag(template, &template.tags[index], scopes, out)?,
                Event::Section(index) => self.render_section(template, index, scopes, out)?,
            }
            position = span.end;
        }
        out.push_str(&template.xml[position..range.end]);
        Ok(events.len())
    }

    fn render_section<'b>(
        &mut self,
        template: &PartTemplate,
        index: usize,
        scopes: &mut Vec<&'b Bindings>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        let section = &template.sections[index];
        let value = lookup(scopes, &section.name);

        match (value, section.inverted) {
            (Some(TemplateValue::List(items)), false) => {
                for item in items {
                    scopes.push(item);
                    let result = self.render_inner(template, index, scopes, out);
                    scopes.pop();
                    result?;
                }
            }
            (Some(value), false) if value.is_truthy() => {
                self.render_inner(template, index, scopes, out)?;
            }
            (value, true) if !value.is_some_and(TemplateValue::is_truthy) => {
                self.render_inner(template, index, scopes, out)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn render_inner<'b>(
        &mut self,
        template: &PartTemplate,
        index: usize,
        scopes: &mut Vec<&'b Bindings>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        let section = &template.sections[index];
        let mut handled = 0;
        for range in &section.inner {
            handled += self.render_range(template, range.clone(), Some(index), scopes, out)?;
        }
        let expected = template.tags.iter().filter(|t| is_leaf(t) && t.parent == Some(index)).count()
            + template.sections.iter().filter(|s| s.parent == Some(index)).count();
        if handled != expected {
            return Err(RenderError::Template(format!(
                "section {{#{}}} overlaps another section",
                section.name
            )));
        }
        Ok(())
    }

    fn render_tag(
        &mut self,
        template: &PartTemplate,
        tag: &Tag,
        scopes: &[&Bindings],
        out: &mut String,
    ) -> Result<(), RenderError> {
        let value = lookup(scopes, &tag.name);
        match (&tag.kind, value) {
            (_, None) => self.missing(template, tag, out),
            (TagKind::Image, Some(TemplateValue::Image(payload))) => self.place_image(tag, payload, out)?,
            (TagKind::Image, Some(TemplateValue::Text(text))) if text.trim().is_empty() => {}
            (TagKind::Image, Some(TemplateValue::Text(text))) => {
                self.place_image(tag, &ImagePayload::new(text.as_str()), out)?
            }
            (_, Some(TemplateValue::Text(text))) => out.push_str(&self.text_xml(text)),
            (_, Some(TemplateValue::Image(payload))) => out.push_str(&self.text_xml(payload.as_str())),
            (TagKind::Placeholder, Some(TemplateValue::Flag(flag))) => out.push_str(&flag.to_string()),
            (_, Some(TemplateValue::Flag(_))) => {
                return Err(RenderError::TypeMismatch {
                    tag: tag.name.clone(),
                    kind: "boolean",
                })
            }
            (_, Some(TemplateValue::List(_))) => {
                return Err(RenderError::TypeMismatch {
                    tag: tag.name.clone(),
                    kind: "list",
                })
            }
        }
        Ok(())
    }

    fn missing(&mut self, template: &PartTemplate, tag: &Tag, out: &mut String) {
        match self.options.missing_tags {
            MissingTagPolicy::Keep => out.push_str(&template.xml[tag.range.clone()]),
            MissingTagPolicy::Blank => {}
            MissingTagPolicy::Fail => {
                self.unresolved.insert(tag.name.clone());
            }
        }
    }

    fn text_xml(&self, text: &str) -> String {
        let escaped = quick_xml::escape::escape(text);
        if !self.options.linebreaks {
            return escaped.into_owned();
        }
        escaped
            .replace("\r\n", "\n")
            .split('\n')
            .collect::<Vec<_>>()
            .join("</w:t><w:br/><w:t xml:space=\"preserve\">")
    }

    fn place_image(&mut self, tag: &Tag, payload: &ImagePayload, out: &mut String) -> Result<(), RenderError> {
        let image = payload.decode().map_err(|e| RenderError::InvalidImage {
            tag: tag.name.clone(),
            reason: e.to_string(),
        })?;
        if image.bytes.is_empty() {
            return Err(RenderError::InvalidImage {
                tag: tag.name.clone(),
                reason: "image data is empty".to_string(),
            });
        }
        let placed = self.media.place(self.part, image);
        self.placed_images += 1;
        let (width, height) = self.options.image_size_px;
        out.push_str("</w:t>");
        out.push_str(&drawing_xml(
            &placed.relationship_id,
            placed.doc_pr_id,
            &placed.file_name,
            u64::from(width) * EMU_PER_PIXEL,
            u64::from(height) * EMU_PER_PIXEL,
        ));
        out.push_str("<w:t xml:space=\"preserve\">");
        Ok(())
    }
}

fn is_leaf(tag: &Tag) -> bool {
    matches!(tag.kind, TagKind::Placeholder | TagKind::Image)
}

fn event_name(template: &PartTemplate, event: Event) -> &str {
    match event {
        Event::Tag(index) => &template.tags[index].name,
        Event::Section(index) => &template.sections[index].name,
    }
}

/// Innermost scope wins; outer scopes stay visible inside loops.
fn lookup<'b>(scopes: &[&'b Bindings], name: &str) -> Option<&'b TemplateValue> {
    scopes.iter().rev().find_map(|scope| scope.get(name))
}


fn drawing_xml(relationship_id: &str, doc_pr_id: usize, file_name: &str, cx: u64, cy: u64) -> String {
    format!(
        concat!(
            r#"<w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0">"#,
            r#"<wp:extent cx="{cx}" cy="{cy}"/><wp:effectExtent l="0" t="0" r="0" b="0"/>"#,
            r#"<wp:docPr id="{id}" name="Picture {id}"/>"#,
            r#"<wp:cNvGraphicFramePr><a:graphicFrameLocks xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" noChangeAspect="1"/></wp:cNvGraphicFramePr>"#,
            r#"<a:graphic xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">"#,
            r#"<a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
            r#"<pic:pic xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
            r#"<pic:nvPicPr><pic:cNvPr id="0" name="{file}"/><pic:cNvPicPr/></pic:nvPicPr>"#,
            r#"<pic:blipFill><a:blip r:embed="{rid}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
            r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr>"#,
            r#"</pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing>"#,
        ),
        cx = cx,
        cy = cy,
        id = doc_pr_id,
        file = file_name,
        rid = relationship_id,
    )
}

/// Adds missing `xmlns:<prefix>` declarations to the root element.
fn ensure_namespaces(xml: &str, namespaces: &[(&str, &str)]) -> Result<String, RenderError> {
    let mut reader = Reader::from_str(xml);
    let (declared, insert_at) = loop {
        let event = reader.read_event().map_err(xml_error)?;
        let end = reader.buffer_position();
        match event {
            XmlEvent::Start(root) => break (declared_prefixes(&root), end - 1),
            XmlEvent::Empty(root) => break (declared_prefixes(&root), end - 2),
            XmlEvent::Eof => return Ok(xml.to_string()),
            _ => {}
        }
    };

    let declarations: String = namespaces
        .iter()
        .filter(|(prefix, _)| !declared.iter().any(|known| known == prefix))
        .map(|(prefix, uri)| format!(" xmlns:{prefix}=\"{uri}\""))
        .collect();

    let mut out = String::with_capacity(xml.len() + declarations.len());
    out.push_str(&xml[..insert_at]);
    out.push_str(&declarations);
    out.push_str(&xml[insert_at..]);
    Ok(out)
}

fn declared_prefixes(root: &BytesStart) -> Vec<String> {
    root.attributes()
        .flatten()
        .filter_map(|attribute| {
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            key.strip_prefix("xmlns:").map(str::to_string)
        })
        .collect()
}

/// Lower-cased `Extension` values of the `<Default>` entries in `[Content_Types].xml`.
fn default_extensions(xml: &str) -> Result<HashSet<String>, RenderError> {
    let mut reader = Reader::from_str(xml);
    let mut extensions = HashSet::new();
    loop {
        match reader.read_event().map_err(xml_error)? {
            XmlEvent::Start(entry) | XmlEvent::Empty(entry) if entry.name().as_ref() == b"Default" => {
                let extension = entry
                    .attributes()
                    .flatten()
                    .find(|attribute| attribute.key.as_ref() == b"Extension");
                if let Some(attribute) = extension {
                    let value = attribute.unescape_value().map_err(xml_error)?;
                    extensions.insert(value.to_ascii_lowercase());
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(extensions)
}

// ── Media ────────────────────────────────────────────────────────────────────

struct PlacedImage {
    part: String,
    relationship_id: String,
    doc_pr_id: usize,
    file_name: String,
    image: DecodedImage,
}

/// Images placed during a render, written into the container afterwards.
struct MediaRegistry {
    taken: HashSet<String>,
    placed: Vec<PlacedImage>,
}

impl MediaRegistry {
    fn new(existing: impl Iterator<Item = String>) -> Self {
        Self {
            taken: existing.collect(),
            placed: Vec::new(),
        }
    }

    fn place(&mut self, part: &str, image: DecodedImage) -> &PlacedImage {
        let mut counter = self.placed.len() + 1;
        let file_name = loop {
            let candidate = format!("cv_image{counter}.{}", image.extension);
            if self.taken.insert(format!("word/media/{candidate}")) {
                break candidate;
            }
            counter += 1;
        };
        let number = self.placed.len() + 1;
        self.placed.push(PlacedImage {
            part: part.to_string(),
            relationship_id: format!("rIdCvImage{number}"),
            doc_pr_id: DOC_PR_ID_BASE + number,
            file_name,
            image,
        });
        &self.placed[self.placed.len() - 1]
    }

    /// Adds media files, relationships and content types to the container.
    fn apply(self, entries: &mut Vec<ZipEntry>) -> Result<(), RenderError> {
        if self.placed.is_empty() {
            return Ok(());
        }
        info!("Embedding {} image(s) into document", self.placed.len());

        for placed in &self.placed {
            let rels_name = relationships_part(&placed.part);
            let relationship = format!(
                r#"<Relationship Id="{}" Type="{IMAGE_RELATIONSHIP}" Target="media/{}"/>"#,
                placed.relationship_id, placed.file_name
            );
            match entries.iter_mut().find(|entry| entry.name == rels_name) {
                Some(entry) => {
                    let xml = insert_before_close(&entry.data, "</Relationships>", &relationship)?;
                    entry.data = xml.into_bytes();
                }
                None => {
                    let xml = insert_before_close(EMPTY_RELATIONSHIPS.as_bytes(), "</Relationships>", &relationship)?;
                    entries.push(ZipEntry {
                        name: rels_name,
                        data: xml.into_bytes(),
                    });
                }
            }
        }

        let content_types = entries
            .iter_mut()
            .find(|entry| entry.name == CONTENT_TYPES_PART)
            .ok_or_else(|| RenderError::TemplateLoad(format!("'{CONTENT_TYPES_PART}' is missing")))?;
        let mut declared = default_extensions(&String::from_utf8_lossy(&content_types.data))?;
        for placed in &self.placed {
            let extension = placed.image.extension;
            if !declared.insert(extension.to_string()) {
                continue;
            }
            let default = format!(
                r#"<Default Extension="{extension}" ContentType="{}"/>"#,
                placed.image.content_type
            );
            content_types.data = insert_before_close(&content_types.data, "</Types>", &default)?.into_bytes();
        }

        for placed in self.placed {
            entries.push(ZipEntry {
                name: format!("word/media/{}", placed.file_name),
                data: placed.image.bytes,
            });
        }
        Ok(())
    }
}

/// `word/document.xml` → `word/_rels/document.xml.rels`
fn relationships_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn insert_before_close(data: &[u8], closing: &str, insert: &str) -> Result<String, RenderError> {
    let xml = std::str::from_utf8(data).map_err(|e| RenderError::TemplateLoad(e.to_string()))?;
    let position = xml
        .rfind(closing)
        .ok_or_else(|| RenderError::TemplateLoad(format!("'{closing}' not found")))?;
    Ok(format!("{}{insert}{}", &xml[..position], &xml[position..]))
}
