//! Minimal WordprocessingML scanner
//!
//! Only what the filler needs: every `w:p` with its own `w:t` fragments (byte
//! ranges into the part), legacy form checkboxes, and the section each
//! paragraph belongs to. Everything else in the part is opaque and is never
//! rewritten.

use std::ops::Range;

use crate::error::TemplateFormatError;

/// One `<w:t>` element.
#[derive(Debug, Clone)]
pub struct TextRun {
    /// `<w:t ...>` start tag
    pub open_tag: Range<usize>,
    /// Escaped content between the start and end tags
    pub content: Range<usize>,
    /// Decoded content
    pub text: String,
}

/// A legacy `FORMCHECKBOX` field's `<w:checkBox>` element.
#[derive(Debug, Clone)]
pub struct FormCheckBox {
    pub span: Range<usize>,
    pub checked: bool,
    /// Byte offset into the paragraph text where the box sits
    pub text_offset: usize,
}

#[derive(Debug, Clone)]
pub struct Paragraph {
    pub start: usize,
    pub runs: Vec<TextRun>,
    pub checkboxes: Vec<FormCheckBox>,
    /// Top-level table, or standalone body paragraph, this paragraph lives in
    pub section: usize,
    text_len: usize,
}

impl Paragraph {
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

fn err(part: &str, msg: String) -> TemplateFormatError {
    TemplateFormatError::new(part, msg)
}

fn checkbox_is_checked(element: &str) -> bool {
    match element.find("<w:checked") {
        Some(pos) => {
            let tag_end = element[pos..].find('>').map(|e| pos + e).unwrap_or(element.len());
            let tag = &element[pos..tag_end];
            !(tag.contains("w:val=\"0\"") || tag.contains("w:val=\"false\""))
        }
        None => false,
    }
}

/// Scan one XML part. Paragraphs are returned in document order (by start
/// offset), nested ones (text boxes) included.
pub fn scan(part: &str, xml: &str) -> Result<Vec<Paragraph>, TemplateFormatError> {
    let mut out: Vec<Paragraph> = Vec::new();
    let mut open: Vec<Paragraph> = Vec::new();
    let mut table_depth = 0usize;
    let mut table_section = 0usize;
    let mut next_section = 0usize;
    let mut i = 0usize;

    while let Some(off) = xml[i..].find('<') {
        let lt = i + off;
        let rest = &xml[lt..];

        if rest.starts_with("<!--") {
            let end = rest
                .find("-->")
                .ok_or_else(|| err(part, format!("unterminated comment at byte {}", lt)))?;
            i = lt + end + 3;
            continue;
        }
        if rest.starts_with("<![CDATA[") {
            let end = rest
                .find("]]>")
                .ok_or_else(|| err(part, format!("unterminated CDATA at byte {}", lt)))?;
            i = lt + end + 3;
            continue;
        }

        let gt = rest
            .find('>')
            .map(|e| lt + e)
            .ok_or_else(|| err(part, format!("unterminated tag at byte {}", lt)))?;
        let tag = &xml[lt + 1..gt];
        if tag.starts_with('?') || tag.starts_with('!') {
            i = gt + 1;
            continue;
        }

        let closing = tag.starts_with('/');
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");

        match name {
            "w:p" if closing => {
                let para = open
                    .pop()
                    .ok_or_else(|| err(part, format!("unbalanced </w:p> at byte {}", lt)))?;
                out.push(para);
            }
            "w:p" if !self_closing => {
                let section = if table_depth > 0 {
                    table_section
                } else if let Some(parent) = open.last() {
                    parent.section
                } else {
                    next_section += 1;
                    next_section
                };
                open.push(Paragraph {
                    start: lt,
                    runs: Vec::new(),
                    checkboxes: Vec::new(),
                    section,
                    text_len: 0,
                });
            }
            "w:tbl" if closing => {
                table_depth = table_depth.saturating_sub(1);
            }
            "w:tbl" if !self_closing => {
                if table_depth == 0 {
                    next_section += 1;
                    table_section = next_section;
                }
                table_depth += 1;
            }
            "w:t" if !closing && !self_closing => {
                let content_start = gt + 1;
                let content_end = xml[content_start..]
                    .find("</w:t>")
                    .map(|e| content_start + e)
                    .ok_or_else(|| err(part, format!("unterminated w:t at byte {}", lt)))?;
                let raw = &xml[content_start..content_end];
                if raw.contains('<') {
                    return Err(err(part, format!("markup inside w:t at byte {}", lt)));
                }
                if let Some(para) = open.last_mut() {
                    let text = html_escape::decode_html_entities(raw).into_owned();
                    para.text_len += text.len();
                    para.runs.push(TextRun {
                        open_tag: lt..gt + 1,
                        content: content_start..content_end,
                        text,
                    });
                }
                i = content_end + "</w:t>".len();
                continue;
            }
            "w:checkBox" if !closing => {
                let end = if self_closing {
                    gt + 1
                } else {
                    xml[gt..]
                        .find("</w:checkBox>")
                        .map(|e| gt + e + "</w:checkBox>".len())
                        .ok_or_else(|| err(part, format!("unterminated w:checkBox at byte {}", lt)))?
                };
                if let Some(para) = open.last_mut() {
                    para.checkboxes.push(FormCheckBox {
                        span: lt..end,
                        checked: checkbox_is_checked(&xml[lt..end]),
                        text_offset: para.text_len,
                    });
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i = gt + 1;
    }

    if !open.is_empty() {
        return Err(err(part, format!("{} unterminated w:p element(s)", open.len())));
    }

    out.sort_by_key(|p| p.start);
    Ok(out)
}

/// Re-render a `<w:t>` element's start tag and content for new text.
/// Newlines become line breaks inside the run.
pub fn render_run(open_tag: &str, text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let needs_preserve = text.starts_with(char::is_whitespace)
        || text.ends_with(char::is_whitespace)
        || text.contains("  ")
        || text.contains('\n');

    let mut out = String::with_capacity(open_tag.len() + text.len() + 32);
    if needs_preserve && !open_tag.contains("xml:space") {
        let insert_at = open_tag.len() - 1;
        out.push_str(&open_tag[..insert_at]);
        out.push_str(" xml:space=\"preserve\">");
    } else {
        out.push_str(open_tag);
    }

    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(&html_escape::encode_text(first));
    }
    for line in lines {
        out.push_str("</w:t><w:br/><w:t xml:space=\"preserve\">");
        out.push_str(&html_escape::encode_text(line));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_and_decoding() {
        let xml = r#"<w:body><w:p><w:r><w:t>{{a</w:t></w:r><w:r><w:t xml:space="preserve">b}} &amp; c</w:t></w:r><w:r><w:tab/></w:r></w:p></w:body>"#;
        let paras = scan("word/document.xml", xml).unwrap();
        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].runs.len(), 2);
        assert_eq!(paras[0].text(), "{{ab}} & c");
        assert_eq!(&xml[paras[0].runs[1].content.clone()], "b}} &amp; c");
    }

    #[test]
    fn test_sections_follow_tables_and_body_paragraphs() {
        let xml = concat!(
            "<w:p><w:r><w:t>one</w:t></w:r></w:p>",
            "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>a</w:t></w:r></w:p></w:tc>",
            "<w:tc><w:tbl><w:tr><w:tc><w:p><w:r><w:t>nested</w:t></w:r></w:p></w:tc></w:tr></w:tbl></w:tc></w:tr></w:tbl>",
            "<w:p><w:r><w:t>two</w:t></w:r></w:p>",
        );
        let paras = scan("p", xml).unwrap();
        let sections: Vec<usize> = paras.iter().map(|p| p.section).collect();
        assert_eq!(sections, vec![1, 2, 2, 3]);
    }

    #[test]
    fn test_text_box_paragraph_kept_separate() {
        let xml = "<w:p><w:r><w:t>outer</w:t></w:r><w:r><w:txbxContent><w:p><w:r><w:t>inner</w:t></w:r></w:p></w:txbxContent></w:r></w:p>";
        let paras = scan("p", xml).unwrap();
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0].text(), "outer");
        assert_eq!(paras[1].text(), "inner");
        assert_eq!(paras[0].section, paras[1].section);
    }

    #[test]
    fn test_checkbox_offset_and_state() {
        let xml = r#"<w:p><w:r><w:t>x</w:t></w:r><w:r><w:fldChar><w:ffData><w:checkBox><w:sizeAuto/><w:checked/></w:checkBox></w:ffData></w:fldChar></w:r><w:r><w:t>Class I</w:t></w:r></w:p>"#;
        let paras = scan("p", xml).unwrap();
        let cb = &paras[0].checkboxes[0];
        assert!(cb.checked);
        assert_eq!(cb.text_offset, 1);
        assert!(xml[cb.span.clone()].ends_with("</w:checkBox>"));
    }

    #[test]
    fn test_unterminated_text_is_error() {
        let e = scan("word/document.xml", "<w:p><w:r><w:t>abc</w:r></w:p>").unwrap_err();
        assert_eq!(e.part, "word/document.xml");
        assert!(scan("p", "<w:p><w:r").is_err());
        assert!(scan("p", "<w:p><w:r><w:t>a</w:t></w:r>").is_err());
    }

    #[test]
    fn test_render_run_preserve_and_breaks() {
        assert_eq!(render_run("<w:t>", "a & b"), "<w:t>a &amp; b");
        assert_eq!(render_run("<w:t>", " x"), "<w:t xml:space=\"preserve\"> x");
        assert_eq!(
            render_run("<w:t xml:space=\"preserve\">", "1\n2"),
            "<w:t xml:space=\"preserve\">1</w:t><w:br/><w:t xml:space=\"preserve\">2"
        );
    }
}
