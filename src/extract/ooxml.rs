//! DOCX and PPTX extraction by walking the OOXML container.
//!
//! Both formats are ZIP archives of XML parts. Text lives in `w:t` (Word)
//! and `a:t` (PowerPoint) nodes; paragraph ends and explicit break markers
//! become line breaks so the chunker sees real structure.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{tidy_text, ExtractionError, ExtractionOutcome, Result};
use crate::models::ExtractionMethod;

pub fn extract_docx(bytes: &[u8]) -> Result<ExtractionOutcome> {
    let xml = read_zip_part(bytes, "word/document.xml")?;
    let text = walk_part(&xml, b"w:t", b"w:p", &[b"w:br", b"w:cr", b"w:tab"])?;
    Ok(ExtractionOutcome {
        text: tidy_text(&text),
        method: ExtractionMethod::DocxXml,
        page_count: None,
    })
}

pub fn extract_pptx(bytes: &[u8]) -> Result<ExtractionOutcome> {
    let slides = slide_parts(bytes)?;
    if slides.is_empty() {
        return Err(ExtractionError::Failed(
            "presentation contains no slides".to_string(),
        ));
    }

    let slide_count = slides.len();
    let mut texts: Vec<String> = Vec::with_capacity(slide_count);
    for name in &slides {
        let xml = read_zip_part(bytes, name)?;
        // Slide text nodes use the DrawingML namespace
        let text = walk_part(&xml, b"a:t", b"a:p", &[b"a:br"])?;
        texts.push(text.trim().to_string());
    }

    Ok(ExtractionOutcome {
        text: tidy_text(&texts.join("\n\n")),
        method: ExtractionMethod::PptxXml,
        page_count: Some(slide_count as u32),
    })
}

/// Read one named part out of the ZIP container.
fn read_zip_part(bytes: &[u8], name: &str) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::Failed(format!("not a valid OOXML container: {e}")))?;
    let mut part = archive
        .by_name(name)
        .map_err(|e| ExtractionError::Failed(format!("missing part {name}: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Slide part names in presentation order (slide1.xml, slide2.xml, ...).
fn slide_parts(bytes: &[u8]) -> Result<Vec<String>> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::Failed(format!("not a valid OOXML container: {e}")))?;

    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();

    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered.into_iter().map(|(_, name)| name).collect())
}

/// Concatenate text-bearing nodes in document order, inserting breaks at
/// structural boundaries.
fn walk_part(
    xml: &str,
    text_tag: &[u8],
    paragraph_tag: &[u8],
    break_tags: &[&[u8]],
) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                if name.as_ref() == text_tag {
                    in_text = true;
                } else if break_tags.contains(&name.as_ref()) {
                    push_break(&mut out, &e);
                }
            }
            Ok(Event::Empty(e)) => {
                if break_tags.contains(&e.name().as_ref()) {
                    push_break(&mut out, &e);
                }
            }
            Ok(Event::Text(e)) => {
                if in_text {
                    let value = e
                        .unescape()
                        .map_err(|err| ExtractionError::Failed(format!("bad XML text: {err}")))?;
                    out.push_str(&value);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                if name.as_ref() == text_tag {
                    in_text = false;
                } else if name.as_ref() == paragraph_tag {
                    out.push_str("\n\n");
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractionError::Failed(format!("XML parse error: {e}")));
            }
        }
    }

    Ok(out)
}

/// Line break for `w:br`/`a:br`, a tab for `w:tab`; an explicit page break
/// gets a paragraph break instead.
fn push_break(out: &mut String, element: &quick_xml::events::BytesStart<'_>) {
    if element.name().as_ref() == b"w:tab" {
        out.push('\t');
        return;
    }
    let is_page_break = element
        .try_get_attribute("w:type")
        .ok()
        .flatten()
        .map(|attr| attr.value.as_ref() == b"page")
        .unwrap_or(false);
    out.push_str(if is_page_break { "\n\n" } else { "\n" });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_container(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in parts {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn docx_paragraphs_become_blank_lines() {
        let xml = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second</w:t></w:r><w:r><w:t> paragraph.</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let bytes = build_container(&[("word/document.xml", xml)]);
        let outcome = extract_docx(&bytes).unwrap();
        assert_eq!(outcome.method, ExtractionMethod::DocxXml);
        assert_eq!(outcome.text, "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn docx_line_break_markers() {
        let xml = r#"<w:document xmlns:w="ns">
            <w:p><w:r><w:t>line one</w:t><w:br/><w:t>line two</w:t></w:r></w:p>
            </w:document>"#;
        let bytes = build_container(&[("word/document.xml", xml)]);
        let outcome = extract_docx(&bytes).unwrap();
        assert_eq!(outcome.text, "line one\nline two");
    }

    #[test]
    fn docx_tab_separated_runs_keep_the_tab() {
        let xml = r#"<w:document xmlns:w="ns">
            <w:p><w:r><w:t>Osmosis</w:t><w:tab/><w:t>diffusion of water</w:t></w:r></w:p>
            </w:document>"#;
        let bytes = build_container(&[("word/document.xml", xml)]);
        let outcome = extract_docx(&bytes).unwrap();
        assert_eq!(outcome.text, "Osmosis\tdiffusion of water");
    }

    #[test]
    fn docx_entities_are_unescaped() {
        let xml = r#"<w:document xmlns:w="ns">
            <w:p><w:r><w:t>A &amp; B &lt;= C</w:t></w:r></w:p>
            </w:document>"#;
        let bytes = build_container(&[("word/document.xml", xml)]);
        let outcome = extract_docx(&bytes).unwrap();
        assert_eq!(outcome.text, "A & B <= C");
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let slide = |body: &str| {
            format!(
                r#"<p:sld xmlns:a="ns"><p:txBody><a:p><a:r><a:t>{body}</a:t></a:r></a:p></p:txBody></p:sld>"#
            )
        };
        // slide10 must sort after slide2, not lexicographically before it
        let bytes = build_container(&[
            ("ppt/slides/slide10.xml", &slide("tenth")),
            ("ppt/slides/slide1.xml", &slide("first")),
            ("ppt/slides/slide2.xml", &slide("second")),
        ]);
        let outcome = extract_pptx(&bytes).unwrap();
        assert_eq!(outcome.method, ExtractionMethod::PptxXml);
        assert_eq!(outcome.page_count, Some(3));
        assert_eq!(outcome.text, "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn pptx_without_slides_fails() {
        let bytes = build_container(&[("ppt/presentation.xml", "<p/>")]);
        assert!(matches!(
            extract_pptx(&bytes),
            Err(ExtractionError::Failed(_))
        ));
    }

    #[test]
    fn truncated_zip_is_failed_not_panic() {
        assert!(matches!(
            extract_docx(b"PK\x03\x04 garbage"),
            Err(ExtractionError::Failed(_))
        ));
    }
}
