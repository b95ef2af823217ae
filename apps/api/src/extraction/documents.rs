//! Upload decoding: turns an uploaded resume file into plain text for the pipeline.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Could not read PDF: {0}")]
    Pdf(String),

    #[error("Could not read Word document: {0}")]
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Pdf,
    Word,
    PlainText,
}

fn detect_kind(file_name: &str, content_type: Option<&str>, bytes: &[u8]) -> UploadKind {
    let name = file_name.to_ascii_lowercase();
    let content_type = content_type.unwrap_or_default();
    if content_type == "application/pdf" || name.ends_with(".pdf") || bytes.starts_with(b"%PDF") {
        UploadKind::Pdf
    } else if content_type.contains("wordprocessingml")
        || content_type == "application/msword"
        || name.ends_with(".docx")
        || name.ends_with(".doc")
    {
        UploadKind::Word
    } else {
        UploadKind::PlainText
    }
}

/// Extracts plain text from an uploaded resume.
pub fn extract_text(
    file_name: &str,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<String, DocumentError> {
    let kind = detect_kind(file_name, content_type, bytes);
    info!("Processing upload '{file_name}' as {kind:?}");

    let text = match kind {
        UploadKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| DocumentError::Pdf(e.to_string()))?
        }
        UploadKind::Word => word_text(bytes)?,
        UploadKind::PlainText => String::from_utf8_lossy(bytes).into_owned(),
    };

    info!("Extracted {} characters from '{file_name}'", text.chars().count());
    Ok(text)
}

fn word_text(bytes: &[u8]) -> Result<String, DocumentError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| DocumentError::Word(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| DocumentError::Word(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| DocumentError::Word(e.to_string()))?;
    document_xml_text(&xml).map_err(|e| DocumentError::Word(e.to_string()))
}

/// Paragraph text of a WordprocessingML body, one paragraph per line.
///
/// Entity and character references are resolved; `<w:tab/>` becomes a tab and
/// `<w:br/>` / `<w:cr/>` a newline. Paragraphs nested in text boxes come out as
/// their own lines.
pub fn document_xml_text(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => open.push(String::new()),
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if let Some(line) = open.last_mut() {
                    match e.name().as_ref() {
                        b"w:tab" => line.push('\t'),
                        b"w:br" | b"w:cr" => line.push('\n'),
                        _ => {}
                    }
                }
            }
            Event::Text(t) if in_text => {
                if let Some(line) = open.last_mut() {
                    line.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.extend(open.pop()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs.join("\n"))
}
