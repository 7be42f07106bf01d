//! Prompt text for the structuring and translation calls

use serde_json::Value;

use super::Chunk;

pub const STRUCTURE_SYSTEM: &str = r#"You are a product-safety test engineer who reads IEC 62368-1 CB Test Reports.

From the extracted PDF content you are given, pull out the fields below and answer with one JSON object. Use the exact keys shown.

1. "basic_info" (strings):
   cb_report_no, ast_report_no, standard (e.g. "IEC 62368-1:2018"), standard_version,
   national_differences, test_lab, test_lab_country, cb_scheme_member,
   applicant_en, applicant_address_en, manufacturer_en, manufacturer_address_en,
   factory_name_en, factory_address_en, product_name_en, model_main, brand, trademark,
   ratings_input (e.g. "100-240Vac, 50/60Hz, 2A"), ratings_output (e.g. "12Vdc, 5A"),
   ratings_power, rated_output_lines (array of strings, one per output line),
   max_output_v, max_output_a, max_output_w,
   issue_date, receive_date, test_date_from, test_date_to (all YYYY-MM-DD),
   cb_test_lab, cb_certificate_no, cb_standard, equipment_mass (e.g. "0.5 kg"),
   protection_rating (e.g. "10A"), overall_result, sample_conforms, sample_not_conforms,
   not_applicable_items, special_installation, national_differences_summary,
   model_differences, cb_report_note, temperature_requirements_text

2. "test_item_particulars":
   product_group ("AV", "ICT", "AV & ICT" or "Telecom"),
   classification_of_use (array: "Ordinary", "Skilled", "Instructed"),
   supply_connection (array: "Class I", "Class II", "Class III"),
   mobility (e.g. "Portable", "Stationary", "Fixed", "Direct plug-in", "For building-in"),
   ovc (e.g. "OVC II"), pollution_degree (e.g. "2"), ip_code (e.g. "IP20"), tma (e.g. "40°C"),
   altitude_limit_m (number, metres, no unit), installation_type, operating_conditions,
   mains_supply ("AC mains", "DC mains" or "Not mains connected"),
   rated_voltage, rated_frequency, rated_current, protection_class, insulation_type, additional_info

3. "series_models": array of {model, vout, iout, pout, vin, iin, case_type, connector_type, differences, remarks}

4. "revision_records": array of {item, date, report_no, description}

5. "clause_verdicts": array of {clause (e.g. "4.1.1"), clause_title, verdict ("P", "N/A", "F"), comment_en}

6. "key_tables":
   input_tests: array of {test_condition, voltage, current, power, frequency, power_factor, remarks}
   temperature_rise: array of {location, component, measured_temp, ambient_temp, temp_rise, limit, verdict, remarks}
   energy_sources: array of {energy_source, class_level (ES1/ES2/ES3), voltage, current, power, location, safeguard, remarks}

7. "factories": array of {name, address}

8. "checkbox_flags" (booleans): is_av, is_ict, is_av_ict, is_telecom, is_ordinary, is_skilled,
   is_instructed, is_class_i, is_class_ii, is_class_iii, is_direct_plugin, is_stationary,
   is_building_in, is_wall_ceiling, is_rack_mounted, is_portable, is_fixed,
   is_pluggable_a, is_pluggable_b, is_permanently_connected

Rules:
- Output plain JSON only, no markdown and no commentary.
- Use null or "" for anything the content does not show; use [] for empty arrays.
- Keep English values in their original case and wording.
- Basic information is usually on the first pages; the Test Item Particulars table is near the start;
  series model tables may span pages; clause verdicts make up the body of the report;
  temperature-rise tables are usually in clause 5 or an annex."#;

pub const TRANSLATE_SYSTEM: &str =
    "You translate electronic product safety test reports into Traditional Chinese. Output JSON only.";

pub const CLAUSE_SYSTEM: &str = r#"Translate the CB report clause comments below into concise Traditional Chinese using CNS terminology. Each line is "[clause] English comment". Keep numbers and units. Answer as JSON: {"translations": [{"clause": "<clause>", "comment_zh": "<translation>"}]}"#;

/// User message for one chunk of pages.
pub fn chunk_message(chunk: &Chunk) -> String {
    let pages = match (chunk.pages.first(), chunk.pages.last()) {
        (Some(first), Some(last)) if first != last => format!("pages {}-{}", first, last),
        (Some(only), _) => format!("page {}", only),
        _ => "the document".to_string(),
    };
    let tables = serde_json::to_string_pretty(&chunk.tables).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Content of CB Test Report {}:\n\n=== TEXT ===\n{}\n\n=== TABLES ===\n{}\n\nExtract every field you can find and answer with JSON.",
        pages, chunk.text, tables
    )
}

/// User message asking for `*_zh` translations of the given English fields.
pub fn translation_message(fields: &Value) -> String {
    let content = serde_json::to_string_pretty(fields).unwrap_or_default();
    format!(
        r#"Translate the following English values into Traditional Chinese:

{}

Guidelines:
1. Company names: use the official Chinese name of well-known companies; otherwise keep the English name or transliterate.
2. Product names: use common industry terms (Power Adapter → 電源供應器, Switching Power Supply → 交換式電源供應器).
3. Addresses: keep the original format and translate country names only (Taiwan → 台灣, China → 中國).
4. Technical terms: use official CNS terminology (Touch Current → 觸及電流).

Answer with JSON using the same keys with "_en" replaced by "_zh", for example {{"applicant_zh": "...", "product_name_zh": "..."}}."#,
        content
    )
}

/// User message for a batch of clause comments.
pub fn clause_message(batch: &[(String, String)]) -> String {
    batch
        .iter()
        .map(|(clause, comment)| format!("[{}] {}", clause, comment))
        .collect::<Vec<_>>()
        .join("\n")
}
