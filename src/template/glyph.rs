//! Boolean option rendering
//!
//! Two template conventions carry enumerated fields: a literal `□` before the
//! option label (turned into `■` when selected), and legacy FORMCHECKBOX
//! fields whose `<w:checkBox>` state is flipped by the label that follows.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::schema::ReportSchema;

pub const UNCHECKED: char = '□';
pub const CHECKED: char = '■';

static CHECKED_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:checked(\s[^>]*)?/>").unwrap());

/// One option of an enumerated field, with every label it appears under.
#[derive(Debug, Clone)]
pub struct Choice {
    pub key: &'static str,
    pub labels: &'static [&'static str],
    /// `Some(true)` selected, `Some(false)` explicitly not selected, `None`
    /// unknown (left as the template has it)
    pub state: Option<bool>,
}

fn choice(key: &'static str, labels: &'static [&'static str], state: Option<bool>) -> Choice {
    Choice { key, labels, state }
}

/// Every option the filler knows, with its state for this record.
pub fn choices(schema: &ReportSchema) -> Vec<Choice> {
    let f = &schema.checkbox_flags.settled();
    let tip = &schema.test_item_particulars;

    let group = tip.product_group.as_deref().unwrap_or("").to_uppercase();
    let (end_product, component) = if group.contains("AV") || group.contains("ICT") || group.contains("終端") {
        (Some(true), Some(false))
    } else if group.contains("COMPONENT") || group.contains("元件") {
        (Some(false), Some(true))
    } else {
        (None, None)
    };

    let mains = tip.mains_supply.as_deref().unwrap_or("").to_uppercase();
    let mains_known = !mains.trim().is_empty();
    let mains_state = |hit: bool| if mains_known { Some(hit) } else { None };

    let pd = tip
        .pollution_degree
        .as_deref()
        .and_then(|p| p.chars().find(|c| c.is_ascii_digit()));
    let pd_state = |n: char| pd.map(|d| d == n);

    vec![
        choice("is_av", &["AV"], Some(f.is_av)),
        choice("is_ict", &["ICT"], Some(f.is_ict)),
        choice("is_av_ict", &["Audio/Video & ICT", "AV & ICT", "AV/ICT"], Some(f.is_av_ict)),
        choice("is_telecom", &["Telecom"], Some(f.is_telecom)),
        choice("is_ordinary", &["Ordinary", "普通"], Some(f.is_ordinary)),
        choice("is_skilled", &["Skilled", "技術人員"], Some(f.is_skilled)),
        choice("is_instructed", &["Instructed", "受指導人員"], Some(f.is_instructed)),
        choice("is_class_i", &["Class I"], Some(f.is_class_i)),
        choice("is_class_ii", &["Class II"], Some(f.is_class_ii)),
        choice("is_class_iii", &["Class III"], Some(f.is_class_iii)),
        choice("is_direct_plugin", &["Direct plug-in", "直插式設備"], Some(f.is_direct_plugin)),
        choice("is_stationary", &["Stationary", "放置式設備"], Some(f.is_stationary)),
        choice("is_building_in", &["For building-in", "Building-in", "崁入式設備"], Some(f.is_building_in)),
        choice("is_wall_ceiling", &["Wall/ceiling-mounted", "壁面/天花板安裝式"], Some(f.is_wall_ceiling)),
        choice("is_rack_mounted", &["SRME/rack-mounted", "SRME/機架安裝"], Some(f.is_rack_mounted)),
        choice(
            "is_portable",
            &["Portable", "Movable", "Hand-held", "移動式設備", "手持式設備", "可攜式設備"],
            Some(f.is_portable),
        ),
        choice("is_fixed", &["Fixed"], Some(f.is_fixed)),
        choice("is_pluggable_a", &["Pluggable Type A", "Pluggable equipment type A"], Some(f.is_pluggable_a)),
        choice("is_pluggable_b", &["Pluggable Type B", "Pluggable equipment type B"], Some(f.is_pluggable_b)),
        choice(
            "is_permanently_connected",
            &["Permanently Connected", "Permanent connection"],
            Some(f.is_permanently_connected),
        ),
        choice("end_product", &["終端產品"], end_product),
        choice("component", &["內建元件"], component),
        choice("ac_mains", &["AC mains"], mains_state(mains.contains("AC"))),
        choice("dc_mains", &["DC mains"], mains_state(mains.contains("DC"))),
        choice("not_mains", &["Not mains connected:"], mains_state(mains.contains("NOT"))),
        choice("pd_1", &["PD 1"], pd_state('1')),
        choice("pd_2", &["PD 2"], pd_state('2')),
        choice("pd_3", &["PD 3"], pd_state('3')),
    ]
}

/// Length of `label` if `text` starts with it (ASCII case-insensitive) and
/// the label is not immediately followed by another ASCII letter or digit.
fn label_len_at(text: &str, label: &str) -> Option<usize> {
    let head = text.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    match text[label.len()..].chars().next() {
        Some(c) if c.is_ascii_alphanumeric() => None,
        _ => Some(label.len()),
    }
}

/// The option whose label starts `text`, longest label winning so that
/// `AV & ICT` is not read as `AV`.
pub fn choice_at<'c>(choices: &'c [Choice], text: &str) -> Option<&'c Choice> {
    let mut best: Option<(&Choice, usize)> = None;
    for c in choices {
        for label in c.labels {
            if let Some(len) = label_len_at(text, label) {
                if best.map_or(true, |(_, l)| len > l) {
                    best = Some((c, len));
                }
            }
        }
    }
    best.map(|(c, _)| c)
}

/// Byte offsets of `□` glyphs in `text` to turn into `■`.
///
/// Only the first box of a selected option in each section is toggled;
/// `done` carries that state across the paragraphs of a section.
pub fn glyphs_to_check(
    text: &str,
    section: usize,
    choices: &[Choice],
    done: &mut HashSet<(usize, &'static str)>,
) -> Vec<usize> {
    let mut hits = Vec::new();
    for (pos, _) in text.match_indices(UNCHECKED) {
        let after = text[pos + UNCHECKED.len_utf8()..].trim_start();
        let Some(choice) = choice_at(choices, after) else { continue };
        if choice.state == Some(true) && done.insert((section, choice.key)) {
            hits.push(pos);
        }
    }
    hits
}

/// New `<w:checkBox>` markup when the state must change, `None` otherwise.
pub fn toggle_checkbox(element: &str, currently: bool, wanted: bool) -> Option<String> {
    if currently == wanted {
        return None;
    }
    let cleared = CHECKED_TAG_RE.replace_all(element, "").into_owned();
    if !wanted {
        return Some(cleared);
    }
    if let Some(inner) = cleared.strip_suffix("/>").filter(|_| !cleared.contains("</w:checkBox>")) {
        return Some(format!("{}><w:checked/></w:checkBox>", inner.trim_end()));
    }
    let close = cleared.rfind("</w:checkBox>")?;
    Some(format!("{}<w:checked/>{}", &cleared[..close], &cleared[close..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::mock_schema;

    #[test]
    fn test_longest_label_wins() {
        let schema = mock_schema();
        let all = choices(&schema);
        assert_eq!(choice_at(&all, "AV & ICT").map(|c| c.key), Some("is_av_ict"));
        assert_eq!(choice_at(&all, "AV ").map(|c| c.key), Some("is_av"));
        assert_eq!(choice_at(&all, "Class III").map(|c| c.key), Some("is_class_iii"));
        assert_eq!(choice_at(&all, "Class II,").map(|c| c.key), Some("is_class_ii"));
        assert_eq!(choice_at(&all, "Classic").map(|c| c.key), None);
    }

    #[test]
    fn test_only_selected_option_toggled_once_per_section() {
        let schema = mock_schema(); // Class I selected
        let all = choices(&schema);
        let mut done = HashSet::new();

        let text = "□ Class I □ Class II □ Class III";
        let hits = glyphs_to_check(text, 1, &all, &mut done);
        assert_eq!(hits, vec![0]);

        // Same section again: already toggled
        assert!(glyphs_to_check("□Class I", 1, &all, &mut done).is_empty());
        // New section
        assert_eq!(glyphs_to_check("□Class I", 2, &all, &mut done), vec![0]);
    }

    #[test]
    fn test_toggle_checkbox_markup() {
        let el = "<w:checkBox><w:sizeAuto/><w:default w:val=\"0\"/></w:checkBox>";
        assert_eq!(
            toggle_checkbox(el, false, true).unwrap(),
            "<w:checkBox><w:sizeAuto/><w:default w:val=\"0\"/><w:checked/></w:checkBox>"
        );
        let checked = "<w:checkBox><w:sizeAuto/><w:checked w:val=\"1\"/></w:checkBox>";
        assert_eq!(
            toggle_checkbox(checked, true, false).unwrap(),
            "<w:checkBox><w:sizeAuto/></w:checkBox>"
        );
        assert_eq!(toggle_checkbox("<w:checkBox/>", false, true).unwrap(), "<w:checkBox><w:checked/></w:checkBox>");
        assert!(toggle_checkbox(el, false, false).is_none());
    }

    #[test]
    fn test_mains_and_pollution_degree_states() {
        let mut schema = mock_schema();
        schema.test_item_particulars.mains_supply = Some("AC mains".into());
        let all = choices(&schema);
        let state = |k: &str| all.iter().find(|c| c.key == k).and_then(|c| c.state);
        assert_eq!(state("ac_mains"), Some(true));
        assert_eq!(state("dc_mains"), Some(false));
        assert_eq!(state("pd_2"), Some(true));
        assert_eq!(state("pd_1"), Some(false));
        assert_eq!(state("end_product"), Some(true));
    }
}
