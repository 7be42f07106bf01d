//! Template filler
//!
//! A `Template` is a `.docx` loaded once and shared behind an `Arc`. Filling
//! never mutates it: each call produces a fresh archive in which only the
//! changed `w:t` elements (and toggled checkboxes) differ from the template.
//!
//! Filling is a pure function of (template, data, context): identical inputs
//! give byte-identical output.

mod glyph;
mod placeholders;
mod runs;
mod xml;

pub use placeholders::{FillContext, PlaceholderMap};

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::TemplateFormatError;
use crate::schema::ReportSchema;
use xml::Paragraph;

pub const DOCUMENT_PART: &str = "word/document.xml";

/// Parts that may carry placeholders: the body, headers and footers.
fn is_text_part(name: &str) -> bool {
    if name == DOCUMENT_PART {
        return true;
    }
    let Some(file) = name.strip_prefix("word/") else { return false };
    let Some(stem) = file.strip_suffix(".xml") else { return false };
    ["header", "footer"].iter().any(|kind| {
        stem.strip_prefix(kind)
            .map(|n| n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    })
}

/// Body first, then headers and footers by name.
fn part_order(name: &str) -> (u8, String) {
    (if name == DOCUMENT_PART { 0 } else { 1 }, name.to_string())
}

#[derive(Debug)]
struct Part {
    name: String,
    xml: String,
    paragraphs: Vec<Paragraph>,
}

/// Read and scan the text parts of a `.docx` archive.
fn read_parts(bytes: &[u8]) -> Result<Vec<Part>, TemplateFormatError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let names: Vec<String> = archive
        .file_names()
        .filter(|n| is_text_part(n))
        .map(String::from)
        .collect();

    if !names.iter().any(|n| n == DOCUMENT_PART) {
        return Err(TemplateFormatError::new(DOCUMENT_PART, "missing from archive"));
    }

    let mut parts = Vec::with_capacity(names.len());
    for name in names {
        let mut raw = Vec::new();
        archive
            .by_name(&name)?
            .read_to_end(&mut raw)
            .map_err(|e| TemplateFormatError::new(name.as_str(), e.to_string()))?;
        let xml = String::from_utf8(raw)
            .map_err(|_| TemplateFormatError::new(name.as_str(), "part is not valid UTF-8"))?;
        let paragraphs = xml::scan(&name, &xml)?;
        parts.push(Part { name, xml, paragraphs });
    }
    parts.sort_by_key(|p| part_order(&p.name));
    Ok(parts)
}

/// Immutable, pre-scanned Word template.
#[derive(Debug)]
pub struct Template {
    name: String,
    bytes: Vec<u8>,
    parts: Vec<Part>,
    fingerprint: String,
}

impl Template {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, TemplateFormatError> {
        let parts = read_parts(&bytes)?;
        let fingerprint = hex::encode(Sha256::digest(&bytes));
        Ok(Template { name: name.into(), bytes, parts, fingerprint })
    }

    pub fn open(path: &Path) -> Result<Self, TemplateFormatError> {
        let bytes = std::fs::read(path)
            .map_err(|e| TemplateFormatError::new(path.display().to_string(), e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// SHA-256 of the template bytes, hex encoded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    /// Placeholder names present in the template, in document order.
    pub fn placeholders(&self) -> Unresolved {
        Unresolved::new(paragraph_texts(&self.parts))
    }
}

fn paragraph_texts(parts: &[Part]) -> Vec<String> {
    parts
        .iter()
        .flat_map(|p| p.paragraphs.iter().map(Paragraph::text))
        .collect()
}

/// Counters reported after a fill.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FillStats {
    /// Tokens replaced by a non-empty value
    pub resolved: usize,
    /// Tokens replaced by "" (unknown name or empty value)
    pub blanked: usize,
    pub glyphs_checked: usize,
    pub form_checkboxes_changed: usize,
    pub parts_modified: usize,
}

/// A filled `.docx`.
#[derive(Debug, Clone)]
pub struct FilledDocument {
    pub bytes: Vec<u8>,
    pub stats: FillStats,
}

struct Edit {
    range: std::ops::Range<usize>,
    replacement: String,
}

/// Process one paragraph: placeholders, then glyphs on the result, then
/// form checkboxes against the template's labels.
fn paragraph_edits(
    xml: &str,
    para: &Paragraph,
    values: &PlaceholderMap,
    choices: &[glyph::Choice],
    glyphs_done: &mut HashSet<(usize, &'static str)>,
    stats: &mut FillStats,
    edits: &mut Vec<Edit>,
) {
    let original = para.text();
    let fragments: Vec<&str> = para.runs.iter().map(|r| r.text.as_str()).collect();

    let found = runs::tokens(&original);
    let mut replacements = Vec::with_capacity(found.len());
    for token in &found {
        let value = values.lookup(&token.name).unwrap_or("");
        if value.is_empty() {
            stats.blanked += 1;
            tracing::debug!(name = %token.name, "placeholder blanked");
        } else {
            stats.resolved += 1;
            tracing::debug!(name = %token.name, value = %crate::utils::safe_truncate(value, 60), "placeholder resolved");
        }
        replacements.push((token.span.clone(), value));
    }

    let mut new_texts = if replacements.is_empty() {
        fragments.iter().map(|s| s.to_string()).collect()
    } else {
        runs::project(&fragments, &replacements)
    };

    if original.contains(glyph::UNCHECKED) {
        let joined: String = new_texts.concat();
        let hits = glyph::glyphs_to_check(&joined, para.section, choices, glyphs_done);
        for hit in hits {
            // Locate the fragment holding this byte
            let mut start = 0usize;
            for text in new_texts.iter_mut() {
                let end = start + text.len();
                if hit >= start && hit < end {
                    let local = hit - start;
                    let glyph_len = glyph::UNCHECKED.len_utf8();
                    text.replace_range(local..local + glyph_len, &glyph::CHECKED.to_string());
                    stats.glyphs_checked += 1;
                    break;
                }
                start = end;
            }
        }
    }

    for (run, new_text) in para.runs.iter().zip(&new_texts) {
        if *new_text != run.text {
            let open_tag = &xml[run.open_tag.clone()];
            edits.push(Edit {
                range: run.open_tag.start..run.content.end,
                replacement: xml::render_run(open_tag, new_text),
            });
        }
    }

    for cb in &para.checkboxes {
        let label_text = original[cb.text_offset..].trim_start();
        let Some(choice) = glyph::choice_at(choices, label_text) else { continue };
        let Some(wanted) = choice.state else { continue };
        if let Some(markup) = glyph::toggle_checkbox(&xml[cb.span.clone()], cb.checked, wanted) {
            tracing::debug!(option = choice.key, checked = wanted, "form checkbox updated");
            stats.form_checkboxes_changed += 1;
            edits.push(Edit { range: cb.span.clone(), replacement: markup });
        }
    }
}

fn apply_edits(xml: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| e.range.start);
    let mut out = String::with_capacity(xml.len() + edits.len() * 16);
    let mut pos = 0usize;
    for edit in edits {
        out.push_str(&xml[pos..edit.range.start]);
        out.push_str(&edit.replacement);
        pos = edit.range.end;
    }
    out.push_str(&xml[pos..]);
    out
}

/// Fill `template` with `data` using default lab/report values.
pub fn fill(template: &Template, data: &ReportSchema) -> Result<FilledDocument, TemplateFormatError> {
    fill_with(template, data, &FillContext::default())
}

/// Fill `template` with `data`. Missing values render as blanks; the only
/// failure is an archive that cannot be rewritten.
pub fn fill_with(
    template: &Template,
    data: &ReportSchema,
    ctx: &FillContext,
) -> Result<FilledDocument, TemplateFormatError> {
    let values = PlaceholderMap::build(data, ctx);
    let choices = glyph::choices(data);
    let mut stats = FillStats::default();
    let mut rewritten: HashMap<&str, String> = HashMap::new();

    for part in &template.parts {
        let mut edits = Vec::new();
        let mut glyphs_done = HashSet::new();
        for para in &part.paragraphs {
            paragraph_edits(&part.xml, para, &values, &choices, &mut glyphs_done, &mut stats, &mut edits);
        }
        if !edits.is_empty() {
            rewritten.insert(part.name.as_str(), apply_edits(&part.xml, edits));
        }
    }
    stats.parts_modified = rewritten.len();

    let bytes = write_archive(&template.bytes, &rewritten)?;
    tracing::info!(
        template = %template.name,
        resolved = stats.resolved,
        blanked = stats.blanked,
        glyphs = stats.glyphs_checked,
        form_checkboxes = stats.form_checkboxes_changed,
        "template filled"
    );
    Ok(FilledDocument { bytes, stats })
}

/// Copy the archive, replacing the given parts. Untouched entries are copied
/// raw; replaced ones get a fixed timestamp.
fn write_archive(
    source: &[u8],
    rewritten: &HashMap<&str, String>,
) -> Result<Vec<u8>, TemplateFormatError> {
    let mut archive = ZipArchive::new(Cursor::new(source))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(source.len())));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();
        match rewritten.get(name.as_str()) {
            Some(xml) => {
                drop(entry);
                writer.start_file(name.as_str(), options)?;
                writer
                    .write_all(xml.as_bytes())
                    .map_err(|e| TemplateFormatError::new(name.as_str(), e.to_string()))?;
            }
            None => writer.raw_copy_file(entry)?,
        }
    }

    Ok(writer.finish()?.into_inner())
}

/// Lazy sequence of placeholder names still present in a document. Each
/// distinct name is yielded once, in document order. Not restartable.
pub struct Unresolved {
    paragraphs: std::vec::IntoIter<String>,
    pending: std::vec::IntoIter<String>,
    seen: HashSet<String>,
}

impl Unresolved {
    fn new(paragraphs: Vec<String>) -> Self {
        Unresolved {
            paragraphs: paragraphs.into_iter(),
            pending: Vec::new().into_iter(),
            seen: HashSet::new(),
        }
    }
}

impl Iterator for Unresolved {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            for name in self.pending.by_ref() {
                if self.seen.insert(name.clone()) {
                    return Some(name);
                }
            }
            let text = self.paragraphs.next()?;
            self.pending = runs::token_names(&text)
                .map(String::from)
                .collect::<Vec<_>>()
                .into_iter();
        }
    }
}

/// Placeholder names left in a filled (or any) `.docx`.
pub fn find_unresolved(docx: &[u8]) -> Result<Unresolved, TemplateFormatError> {
    let parts = read_parts(docx)?;
    Ok(Unresolved::new(paragraph_texts(&parts)))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::schema::{mock_schema, SeriesModel};

    fn body_text(docx: &[u8]) -> String {
        let xml = read_entry(docx, DOCUMENT_PART);
        xml::scan(DOCUMENT_PART, &xml)
            .unwrap()
            .iter()
            .map(|p| p.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_fragmented_placeholder_resolves() {
        let body = para(&["Model: {{mo", "del_", "main}} end"]);
        let t = template_with_body(&body);
        let out = fill(&t, &mock_schema()).unwrap();

        assert_eq!(body_text(&out.bytes), "Model: SPS-120W end");
        assert_eq!(out.stats.resolved, 1);
        assert_eq!(find_unresolved(&out.bytes).unwrap().count(), 0);
    }

    #[test]
    fn test_formatting_outside_text_preserved() {
        let body = para(&["{{report_", "no}}"]);
        let t = template_with_body(&body);
        let out = fill(&t, &mock_schema()).unwrap();
        let xml = read_entry(&out.bytes, DOCUMENT_PART);

        assert_eq!(xml.matches("<w:rPr><w:b/></w:rPr>").count(), 2);
        assert!(xml.contains(">TW-12345-UL</w:t>"));
    }

    #[test]
    fn test_missing_values_blank_without_error() {
        let body = para(&["[{{brand}}][{{no_such_field}}][{{series_model_7_vout}}]"]);
        let t = template_with_body(&body);
        let out = fill(&t, &mock_schema()).unwrap();

        assert_eq!(body_text(&out.bytes), "[][][]");
        assert_eq!(out.stats.blanked, 3);
        assert_eq!(find_unresolved(&out.bytes).unwrap().count(), 0);
    }

    #[test]
    fn test_fill_is_idempotent() {
        let body = format!(
            "{}{}",
            para(&["{{cb_report_no}} / {{applicant_en}}"]),
            para(&["□ Class I □ Class II"])
        );
        let t = template_with_body(&body);
        let data = mock_schema();
        let a = fill(&t, &data).unwrap();
        let b = fill(&t, &data).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_untouched_entries_copied_and_template_unchanged() {
        let t = template_with_body(&para(&["{{report_no}}"]));
        let before = t.fingerprint().to_string();
        let out = fill(&t, &mock_schema()).unwrap();

        assert_eq!(read_entry(&out.bytes, "word/styles.xml"), "<w:styles/>");
        assert_eq!(t.fingerprint(), before);
        assert_eq!(t.placeholders().collect::<Vec<_>>(), vec!["report_no"]);
    }

    #[test]
    fn test_sixty_series_rows_and_no_more() {
        let mut data = mock_schema();
        data.series_models = (1..=60)
            .map(|i| SeriesModel { model: format!("M-{}", i), ..SeriesModel::default() })
            .collect();
        let body = format!(
            "{}{}{}",
            para(&["{{series_model_1}}"]),
            para(&["{{series_model_60}}"]),
            para(&["{{series_model_61}}"])
        );
        let t = template_with_body(&body);
        let out = fill(&t, &data).unwrap();
        assert_eq!(body_text(&out.bytes), "M-1\nM-60\n");
    }

    #[test]
    fn test_glyph_toggles_only_selected_option() {
        let body = format!(
            "{}{}",
            table(&[para(&["□ Class I □ Class II □ Class III"])]),
            table(&[para(&["□ Ordinary"]), para(&["□ Ordinary"])])
        );
        let t = template_with_body(&body);
        let out = fill(&t, &mock_schema()).unwrap();

        assert_eq!(body_text(&out.bytes), "■ Class I □ Class II □ Class III\n■ Ordinary\n□ Ordinary");
        assert_eq!(out.stats.glyphs_checked, 2);
    }

    #[test]
    fn test_conflicting_class_flags_check_one_glyph() {
        let mut data = mock_schema();
        let mut update = ReportSchema::default();
        update.checkbox_flags.is_class_ii = true;
        data.merge(update);
        data.checkbox_flags.is_class_iii = true;

        let t = template_with_body(&table(&[para(&["□ Class I □ Class II □ Class III"])]));
        let out = fill(&t, &data).unwrap();

        assert_eq!(body_text(&out.bytes), "■ Class I □ Class II □ Class III");
        assert_eq!(out.stats.glyphs_checked, 1);
    }

    #[test]
    fn test_glyph_split_from_label_across_runs() {
        let body = table(&[para(&["□", " ", "Class", " I"])]);
        let t = template_with_body(&body);
        let out = fill(&t, &mock_schema()).unwrap();
        assert_eq!(body_text(&out.bytes), "■ Class I");
    }

    #[test]
    fn test_multiline_value_becomes_breaks() {
        let mut data = mock_schema();
        data.basic_info.rated_output_lines = Some(vec!["5V 3A".into(), "12V 1A".into()]);
        let t = template_with_body(&para(&["{{rated_output_block}}"]));
        let out = fill(&t, &data).unwrap();
        let xml = read_entry(&out.bytes, DOCUMENT_PART);
        assert!(xml.contains("5V 3A</w:t><w:br/><w:t xml:space=\"preserve\">12V 1A</w:t>"));
    }

    #[test]
    fn test_values_are_escaped() {
        let mut data = mock_schema();
        data.basic_info.applicant_en = "A & B <Ltd>".into();
        let t = template_with_body(&para(&["{{applicant_en}}"]));
        let out = fill(&t, &data).unwrap();
        let xml = read_entry(&out.bytes, DOCUMENT_PART);
        assert!(xml.contains("A &amp; B &lt;Ltd&gt;"));
        assert_eq!(body_text(&out.bytes), "A & B <Ltd>");
    }

    #[test]
    fn test_headers_and_footers_filled() {
        let doc = document_xml(&para(&["body"]));
        let header = format!("<w:hdr {}>{}</w:hdr>", WORD_NS, para(&["{{header_report_no}}"]));
        let bytes = docx(&[(DOCUMENT_PART, doc.as_str()), ("word/header1.xml", header.as_str())]);
        let t = Template::from_bytes("t.docx", bytes).unwrap();
        let out = fill(&t, &mock_schema()).unwrap();

        assert!(read_entry(&out.bytes, "word/header1.xml").contains(">TW-12345-UL<"));
        assert_eq!(out.stats.parts_modified, 1);
    }

    #[test]
    fn test_form_checkbox_follows_label() {
        let cb = |checked: bool| {
            format!(
                "<w:r><w:fldChar w:fldCharType=\"begin\"><w:ffData><w:checkBox><w:sizeAuto/>{}</w:checkBox></w:ffData></w:fldChar></w:r>",
                if checked { "<w:checked/>" } else { "" }
            )
        };
        let body = table(&[
            format!("<w:p>{}<w:r><w:t>普通</w:t></w:r></w:p>", cb(false)),
            format!("<w:p>{}<w:r><w:t>技術人員</w:t></w:r></w:p>", cb(true)),
        ]);
        let t = template_with_body(&body);
        let out = fill(&t, &mock_schema()).unwrap();
        let xml = read_entry(&out.bytes, DOCUMENT_PART);

        let ordinary = xml.find("普通").unwrap();
        let skilled = xml.find("技術人員").unwrap();
        assert!(xml[..ordinary].contains("<w:checked/>"));
        assert!(!xml[ordinary..skilled].contains("<w:checked/>"));
        assert_eq!(out.stats.form_checkboxes_changed, 2);
    }

    #[test]
    fn test_unresolved_is_distinct_and_ordered() {
        let body = format!(
            "{}{}{}",
            para(&["{{b}} {{a}}"]),
            para(&["{{", "b}}"]),
            para(&["{{c}}"])
        );
        let bytes = docx(&[(DOCUMENT_PART, document_xml(&body).as_str())]);
        let names: Vec<String> = find_unresolved(&bytes).unwrap().collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let mut lazy = find_unresolved(&bytes).unwrap();
        assert_eq!(lazy.next().as_deref(), Some("b"));
        assert_eq!(lazy.count(), 2);
    }

    #[test]
    fn test_block_tokens_filled_and_reported() {
        let body = format!(
            "{}{}{}",
            para(&["{{#BLOCK:", "MAX_OUTPUT_POWER_BLOCK}}"]),
            table(&[para(&["{{#BLOCK:ATTACHMENT_LIST_BLOCK}}"])]),
            para(&["{{#BLOCK:TABLE_B2_5_INPUT_TEST}}"])
        );
        let bytes = docx(&[(DOCUMENT_PART, document_xml(&body).as_str())]);
        let names: Vec<String> = find_unresolved(&bytes).unwrap().collect();
        assert_eq!(
            names,
            vec!["#BLOCK:MAX_OUTPUT_POWER_BLOCK", "#BLOCK:ATTACHMENT_LIST_BLOCK", "#BLOCK:TABLE_B2_5_INPUT_TEST"]
        );

        let mut data = mock_schema();
        data.basic_info.max_output_w = Some("120".into());
        data.attachments = Some(vec!["Photos".into(), "Schematics".into()]);
        let t = Template::from_bytes("blocks.docx", bytes).unwrap();
        let out = fill(&t, &data).unwrap();

        assert_eq!(find_unresolved(&out.bytes).unwrap().count(), 0);
        assert_eq!(out.stats.resolved, 2);
        assert_eq!(out.stats.blanked, 1);
        let xml = read_entry(&out.bytes, DOCUMENT_PART);
        assert!(xml.contains("最大連續輸出功率為 120W"));
        assert!(xml.contains("• Photos</w:t><w:br/><w:t xml:space=\"preserve\">• Schematics"));
    }

    #[test]
    fn test_format_errors() {
        assert!(Template::from_bytes("x", b"not a zip".to_vec()).is_err());

        let no_doc = docx(&[("word/styles.xml", "<w:styles/>")]);
        let err = Template::from_bytes("x", no_doc).unwrap_err();
        assert_eq!(err.part, DOCUMENT_PART);

        let broken = docx(&[(DOCUMENT_PART, "<w:document><w:body><w:p><w:r><w:t>oops")]);
        assert!(Template::from_bytes("x", broken).is_err());
    }

    #[test]
    fn test_text_part_names() {
        assert!(is_text_part("word/document.xml"));
        assert!(is_text_part("word/header1.xml"));
        assert!(is_text_part("word/footer.xml"));
        assert!(!is_text_part("word/footnotes.xml"));
        assert!(!is_text_part("word/_rels/header1.xml.rels"));
    }
}
