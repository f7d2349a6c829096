//! 从各类文档中提取纯文本
use std::io::{Cursor, Read};

use calamine::{Reader, Xlsx};
use quick_xml::events::Event;

use super::{DocumentType, Error};

/// 提取文档文本。输出统一使用LF换行，并去除行尾空白。
pub fn parse(bytes: &[u8], doc_type: DocumentType) -> Result<String, Error> {
    let text = match doc_type {
        DocumentType::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::Pdf(e.to_string()))?
        }
        DocumentType::Word => parse_docx(bytes)?,
        DocumentType::PowerPoint => parse_pptx(bytes)?,
        DocumentType::Excel => parse_xlsx(bytes)?,
        DocumentType::Text => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(normalize(&text))
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<Cursor<&[u8]>>, Error> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::Office(e.to_string()))
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<String, Error> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| Error::Office(format!("{name}: {e}")))?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|e| Error::Office(format!("{name}: {e}")))?;
    Ok(xml)
}

// 提取Office XML中文本节点的内容，每个段落结束时换行。
// Word使用w:t与w:p，PowerPoint使用a:t与a:p。
fn xml_text(xml: &str, text_tag: &[u8], para_tag: &[u8]) -> Result<String, Error> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == text_tag => in_text = true,
            Ok(Event::End(e)) => {
                let name = e.name();
                if name.as_ref() == text_tag {
                    in_text = false;
                } else if name.as_ref() == para_tag {
                    out.push('\n');
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == para_tag => out.push('\n'),
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| Error::Office(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Office(format!(
                    "XML error at position {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => (),
        }
    }
    Ok(out)
}

fn parse_docx(bytes: &[u8]) -> Result<String, Error> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    xml_text(&xml, b"w:t", b"w:p")
}

fn parse_pptx(bytes: &[u8]) -> Result<String, Error> {
    let mut archive = open_archive(bytes)?;

    // 幻灯片按编号排序，而不是压缩包内的顺序
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    let mut out = String::new();
    for (_, name) in slides {
        let xml = read_entry(&mut archive, &name)?;
        out.push_str(&xml_text(&xml, b"a:t", b"a:p")?);
        out.push('\n');
    }
    Ok(out)
}

fn parse_xlsx(bytes: &[u8]) -> Result<String, Error> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| Error::Office(e.to_string()))?;
    let mut out = String::new();
    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| Error::Office(format!("{sheet}: {e}")))?;
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| match cell {
                    calamine::Data::Empty => String::new(),
                    other => other.to_string(),
                })
                .collect();
            let line = cells.join("\t");
            if !line.trim().is_empty() {
                out.push_str(&line);
                out.push('\n');
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn office_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_plain_text() {
        let text = parse(b"first line   \r\nsecond line\r\n\r\n", DocumentType::Text).unwrap();
        assert_eq!(text, "first line\nsecond line");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let text = parse(&[b'o', b'k', 0xff], DocumentType::Text).unwrap();
        assert!(text.starts_with("ok"));
    }

    #[test]
    fn test_docx() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
<w:p><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p>
</w:body>
</w:document>"#;
        let bytes = office_archive(&[("word/document.xml", xml)]);
        let text = parse(&bytes, DocumentType::Word).unwrap();
        assert_eq!(text, "Hello world\nFish & chips");
    }

    #[test]
    fn test_pptx_slide_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{t}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
            )
        };
        let s10 = slide("tenth");
        let s2 = slide("second");
        let bytes = office_archive(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
        ]);
        let text = parse(&bytes, DocumentType::PowerPoint).unwrap();
        assert_eq!(text, "second\n\ntenth");
    }

    #[test]
    fn test_broken_archive() {
        assert!(matches!(
            parse(b"not a zip", DocumentType::Word),
            Err(Error::Office(_))
        ));
    }
}
