//! Placeholder name → value map built from a `ReportSchema`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::schema::{ReportSchema, SeriesModel, MAX_REVISIONS, MAX_SERIES_MODELS};
use crate::settings::{LabProfile, ReportDefaults, Settings};

/// Per-deployment values that are not part of the extracted record.
#[derive(Debug, Clone, Default)]
pub struct FillContext {
    pub lab: LabProfile,
    pub defaults: ReportDefaults,
}

impl FillContext {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { lab: settings.lab.clone(), defaults: settings.defaults.clone() }
    }
}

static WATTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)\s*W").unwrap());

pub struct PlaceholderMap {
    values: HashMap<String, String>,
}

fn or_empty(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates.iter().find(|s| !s.is_empty()).map(|s| s.to_string()).unwrap_or_default()
}

/// Highest `NNN W` figure across the rated output lines.
fn max_watts(lines: &[String]) -> Option<String> {
    let max = lines
        .iter()
        .flat_map(|line| WATTS_RE.captures_iter(line))
        .filter_map(|c| c[1].parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |a| a.max(w))))?;
    Some(if max.fract() == 0.0 { format!("{}", max as i64) } else { format!("{}", max) })
}

/// `value` with `unit` appended unless it already ends with it.
fn with_unit(value: &str, unit: &str) -> String {
    let v = value.trim();
    if v.to_ascii_uppercase().ends_with(unit) {
        v.to_string()
    } else {
        format!("{}{}", v, unit)
    }
}

/// "最大連續輸出功率為 120W / 12V, 10A", falling back to the highest wattage
/// in the rated output lines.
fn max_output_block(schema: &ReportSchema) -> String {
    let bi = &schema.basic_info;
    let field = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let (w, v, a) = (field(&bi.max_output_w), field(&bi.max_output_v), field(&bi.max_output_a));

    let mut parts = Vec::new();
    if let Some(w) = &w {
        parts.push(with_unit(w, "W"));
    }
    match (&v, &a) {
        (Some(v), Some(a)) => parts.push(format!("{}, {}", with_unit(v, "V"), with_unit(a, "A"))),
        (Some(v), None) => parts.push(with_unit(v, "V")),
        (None, Some(a)) => parts.push(with_unit(a, "A")),
        (None, None) => {}
    }
    if parts.is_empty() {
        if let Some(w) = max_watts(bi.rated_output_lines.as_deref().unwrap_or_default()) {
            parts.push(format!("{}W", w));
        }
    }
    if parts.is_empty() {
        return String::new();
    }
    format!("最大連續輸出功率為 {}", parts.join(" / "))
}

/// Temperature requirements text, else a summary of the first five
/// temperature rise rows.
fn temperature_block(schema: &ReportSchema) -> String {
    if let Some(text) = schema.basic_info.temperature_requirements_text.as_deref().filter(|t| !t.trim().is_empty()) {
        return text.to_string();
    }
    let parts: Vec<String> = schema
        .key_tables
        .temperature_rise
        .iter()
        .take(5)
        .map(|row| {
            let mut seg = Vec::new();
            if let Some(loc) = row.location.as_deref().filter(|s| !s.is_empty()) {
                seg.push(loc.to_string());
            }
            if let Some(t) = row.measured_temp.as_deref().filter(|s| !s.is_empty()) {
                seg.push(format!("{}C", t));
            }
            if let Some(r) = row.temp_rise.as_deref().filter(|s| !s.is_empty()) {
                seg.push(format!("rise {}K", r));
            }
            seg.join(" / ")
        })
        .filter(|seg| !seg.is_empty())
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    format!("Temperature rise summary: {}", parts.join("; "))
}

impl PlaceholderMap {
    pub fn build(schema: &ReportSchema, ctx: &FillContext) -> Self {
        let mut m: HashMap<String, String> = HashMap::new();
        let mut put = |k: &str, v: String| {
            m.insert(k.to_string(), v);
        };

        let bi = &schema.basic_info;
        let ast = first_non_empty(&[bi.ast_report_no.as_deref().unwrap_or(""), &bi.cb_report_no]);
        put("report_no", bi.cb_report_no.clone());
        put("cb_report_no", bi.cb_report_no.clone());
        put("ast_report_no", ast.clone());
        put("header_report_no", ast);
        put("cns_report_no", or_empty(&bi.cns_report_no));
        put("bsmi_designated_report_no", or_empty(&bi.bsmi_designated_report_no));
        put("standard", bi.standard.clone());
        put("standard_version", or_empty(&bi.standard_version));
        put("national_differences", or_empty(&bi.national_differences));
        put("test_lab", or_empty(&bi.test_lab));
        put("test_lab_country", or_empty(&bi.test_lab_country));
        put("cb_scheme_member", or_empty(&bi.cb_scheme_member));

        put("applicant_en", bi.applicant_en.clone());
        put("applicant_address_en", bi.applicant_address_en.clone());
        put("manufacturer_en", bi.manufacturer_en.clone());
        put("manufacturer_address_en", bi.manufacturer_address_en.clone());
        put("factory_name_en", or_empty(&bi.factory_name_en));
        put("factory_address_en", or_empty(&bi.factory_address_en));

        put("product_name_en", bi.product_name_en.clone());
        put("model_main", bi.model_main.clone());
        put("main_model", bi.model_main.clone());
        put("brand", or_empty(&bi.brand));
        put("trademark", or_empty(&bi.trademark));

        put("ratings_input", bi.ratings_input.clone());
        put("rated_input", bi.ratings_input.clone());
        put("ratings_output", bi.ratings_output.clone());
        put("rated_output", bi.ratings_output.clone());
        put("ratings_power", or_empty(&bi.ratings_power));
        let output_lines = bi.rated_output_lines.clone().unwrap_or_default();
        put(
            "rated_output_block",
            if output_lines.is_empty() { bi.ratings_output.clone() } else { output_lines.join("\n") },
        );
        put("max_output_v", or_empty(&bi.max_output_v));
        put("max_output_a", or_empty(&bi.max_output_a));
        put(
            "max_output_w",
            bi.max_output_w
                .clone()
                .filter(|w| !w.is_empty())
                .or_else(|| max_watts(&output_lines))
                .unwrap_or_default(),
        );

        put("issue_date", or_empty(&bi.issue_date));
        put("issue_date_short", or_empty(&bi.issue_date_short));
        put("receive_date", or_empty(&bi.receive_date));
        put("sample_received_date", or_empty(&bi.receive_date));
        put("test_date_from", or_empty(&bi.test_date_from));
        put("test_date", or_empty(&bi.test_date_from));
        put("test_date_to", or_empty(&bi.test_date_to));

        put("cb_test_lab", or_empty(&bi.cb_test_lab));
        put("cb_certificate_no", or_empty(&bi.cb_certificate_no));
        put("cb_standard", or_empty(&bi.cb_standard));

        put("equipment_mass", or_empty(&bi.equipment_mass));
        put("eut_mass_kg", or_empty(&bi.equipment_mass));
        put("protection_rating", or_empty(&bi.protection_rating));
        put("protective_device_rated_current", or_empty(&bi.protection_rating));

        put("overall_result", or_empty(&bi.overall_result));
        put("sample_conforms", or_empty(&bi.sample_conforms));
        put("sample_not_conforms", or_empty(&bi.sample_not_conforms));
        put("not_applicable_items", or_empty(&bi.not_applicable_items));
        put("special_installation", or_empty(&bi.special_installation));
        put("national_differences_summary", or_empty(&bi.national_differences_summary));
        put("model_differences", or_empty(&bi.model_differences));
        put("model_differences_block", or_empty(&bi.model_differences));
        put("cb_report_note", or_empty(&bi.cb_report_note));
        put("temperature_requirements_text", or_empty(&bi.temperature_requirements_text));

        let d = &ctx.defaults;
        put("test_type", first_non_empty(&[bi.test_type.as_deref().unwrap_or(""), &d.test_type]));
        put(
            "cns_standard",
            first_non_empty(&[bi.cns_standard.as_deref().unwrap_or(""), &d.cns_standard]),
        );
        put(
            "cns_standard_version",
            first_non_empty(&[
                bi.cns_standard_version.as_deref().unwrap_or(""),
                &d.cns_standard_version,
            ]),
        );

        let tr = &schema.translations;
        put("applicant_zh", or_empty(&tr.applicant_zh));
        put("applicant_name", or_empty(&tr.applicant_zh));
        put("applicant_address_zh", or_empty(&tr.applicant_address_zh));
        put("applicant_address", or_empty(&tr.applicant_address_zh));
        put("manufacturer_zh", or_empty(&tr.manufacturer_zh));
        put("manufacturer_address_zh", or_empty(&tr.manufacturer_address_zh));
        put("product_name_zh", or_empty(&tr.product_name_zh));
        put("factory_name_zh", or_empty(&tr.factory_name_zh));
        put("factory_address_zh", or_empty(&tr.factory_address_zh));
        put("factory_name_1", or_empty(&tr.factory_name_1));
        put("factory_address_1", or_empty(&tr.factory_address_1));
        put("factory_name_2", or_empty(&tr.factory_name_2));
        put("factory_address_2", or_empty(&tr.factory_address_2));

        let factory_list: Vec<String> = schema
            .factories
            .iter()
            .map(|f| {
                [f.name.as_str(), f.address.as_str()]
                    .into_iter()
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
                    .join(" / ")
            })
            .filter(|line| !line.is_empty())
            .collect();
        put("factory_list", factory_list.join("; "));
        put("#BLOCK:FACTORY_TABLE_BLOCK", factory_list.join("\n"));
        put("FACTORY_TABLE_BLOCK", factory_list.join("\n"));

        let tip = &schema.test_item_particulars;
        let altitude = tip.altitude_limit_m.map(|a| a.to_string()).unwrap_or_default();
        put("product_group", or_empty(&tip.product_group));
        put("ovc", or_empty(&tip.ovc));
        put("pollution_degree", or_empty(&tip.pollution_degree));
        put("ip_code", or_empty(&tip.ip_code));
        put("ip_rating", or_empty(&tip.ip_code));
        put("tma", or_empty(&tip.tma));
        put("tma_c", or_empty(&tip.tma));
        put(
            "altitude",
            tip.altitude_limit_m.map(|a| format!("{} m 或更低", a)).unwrap_or_default(),
        );
        put("altitude_limit_m", altitude.clone());
        put("equipment_altitude", altitude);
        put("installation_type", or_empty(&tip.installation_type));
        put("operating_conditions", or_empty(&tip.operating_conditions));
        put("mains_supply", or_empty(&tip.mains_supply));
        put("rated_voltage", or_empty(&tip.rated_voltage));
        put("rated_frequency", or_empty(&tip.rated_frequency));
        put("rated_current", or_empty(&tip.rated_current));
        put("protection_class", or_empty(&tip.protection_class));
        put("insulation_type", or_empty(&tip.insulation_type));
        put("additional_info", or_empty(&tip.additional_info));
        // Rendered through checkboxes instead
        put("mobility", String::new());
        put("equipment_mobility", String::new());
        put("classification_of_use", tip.classification_of_use.join(", "));
        put("supply_connection", tip.supply_connection.join(", "));
        put("supply_connection_type", tip.supply_connection.join(", "));

        let models: Vec<&str> = schema
            .series_models
            .iter()
            .map(|s| s.model.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        put("series_model", models.join(", "));
        put("model_list", models.join(", "));

        for i in 1..=MAX_SERIES_MODELS {
            let sm = schema.series_models.get(i - 1);
            let attr = |f: &dyn Fn(&SeriesModel) -> Option<String>| sm.and_then(f).unwrap_or_default();
            put(&format!("series_model_{}", i), sm.map(|s| s.model.clone()).unwrap_or_default());
            put(&format!("series_model_{}_vout", i), attr(&|s| s.vout.clone()));
            put(&format!("series_model_{}_iout", i), attr(&|s| s.iout.clone()));
            put(&format!("series_model_{}_pout", i), attr(&|s| s.pout.clone()));
            put(&format!("series_model_{}_vin", i), attr(&|s| s.vin.clone()));
            put(&format!("series_model_{}_iin", i), attr(&|s| s.iin.clone()));
            put(&format!("series_model_{}_case_type", i), attr(&|s| s.case_type.clone()));
            put(&format!("series_model_{}_connector", i), attr(&|s| s.connector_type.clone()));
            put(&format!("series_model_{}_diff", i), attr(&|s| s.differences.clone()));
            put(&format!("series_model_{}_remarks", i), attr(&|s| s.remarks.clone()));
        }

        for i in 1..=MAX_REVISIONS {
            let rev = schema.revision_records.get(i - 1);
            put(&format!("rev{}_item", i), rev.map(|r| r.item.clone()).unwrap_or_default());
            put(&format!("rev{}_date", i), rev.map(|r| or_empty(&r.date)).unwrap_or_default());
            put(
                &format!("rev{}_report_no", i),
                rev.map(|r| or_empty(&r.report_no)).unwrap_or_default(),
            );
            put(&format!("rev{}_desc", i), rev.map(|r| r.description.clone()).unwrap_or_default());
        }

        let attachments = schema.attachments.clone().unwrap_or_default();
        let bullets: Vec<String> = attachments.iter().map(|a| format!("• {}", a)).collect();
        put("attachment_list", attachments.join("; "));
        put("#BLOCK:ATTACHMENT_LIST_BLOCK", bullets.join("\n"));
        put("ATTACHMENT_LIST_BLOCK", bullets.join("\n"));

        put("#BLOCK:MAX_OUTPUT_POWER_BLOCK", max_output_block(schema));
        put("#BLOCK:TEMPERATURE_REQUIREMENTS_TABLE", temperature_block(schema));
        // Test tables are not generated; their anchors are cleared
        put("#BLOCK:TABLE_B2_5_INPUT_TEST", String::new());
        put("#BLOCK:TABLE_B3_B4_ABNORMAL_FAULT", String::new());

        put("lab_name", ctx.lab.name.clone());
        put("lab_address", ctx.lab.address.clone());
        put("lab_accreditation_no", ctx.lab.accreditation_no.clone());
        put("lab_altitude", ctx.lab.altitude.clone());

        put("extraction_timestamp", or_empty(&schema.extraction_timestamp));
        put("source_filename", or_empty(&schema.source_filename));

        PlaceholderMap { values: m }
    }

    /// Value for a placeholder name; `None` when the name is unknown.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{mock_schema, FactoryInfo, TemperatureRiseRow};

    fn map(schema: &ReportSchema) -> PlaceholderMap {
        PlaceholderMap::build(schema, &FillContext::default())
    }

    #[test]
    fn test_aliases_and_indexed_names() {
        let m = map(&mock_schema());
        assert_eq!(m.lookup("report_no"), Some("TW-12345-UL"));
        assert_eq!(m.lookup("header_report_no"), Some("TW-12345-UL"));
        assert_eq!(m.lookup("main_model"), Some("SPS-120W"));
        assert_eq!(m.lookup("series_model_2_vout"), Some("24V"));
        assert_eq!(m.lookup("series_model_3_case_type"), Some("Plastic"));
        assert_eq!(m.lookup("series_model_4"), Some(""));
        assert_eq!(m.lookup("series_model_60_remarks"), Some(""));
        assert_eq!(m.lookup("series_model_61"), None);
        assert_eq!(m.lookup("rev1_desc"), Some(""));
        assert_eq!(m.lookup("altitude"), Some("2000 m 或更低"));
        assert_eq!(m.lookup("model_list"), Some("SPS-120W-A, SPS-120W-B, SPS-120W-C"));
        assert_eq!(m.lookup("mobility"), Some(""));
    }

    #[test]
    fn test_defaults_fill_missing_report_fields() {
        let m = map(&mock_schema());
        assert_eq!(m.lookup("cns_standard"), Some("CNS 15598-1"));
        assert_eq!(m.lookup("test_type"), Some("型式試驗"));
    }

    #[test]
    fn test_max_output_derived_from_lines() {
        let mut schema = ReportSchema::default();
        schema.basic_info.rated_output_lines =
            Some(vec!["5V 3A 15W".into(), "12V 5A 60 W".into(), "20V 3.25A 65.5W".into()]);
        let m = map(&schema);
        assert_eq!(m.lookup("max_output_w"), Some("65.5"));
        assert_eq!(m.lookup("rated_output_block"), Some("5V 3A 15W\n12V 5A 60 W\n20V 3.25A 65.5W"));
    }

    #[test]
    fn test_max_output_block() {
        let mut schema = ReportSchema::default();
        assert_eq!(map(&schema).lookup("#BLOCK:MAX_OUTPUT_POWER_BLOCK"), Some(""));

        schema.basic_info.rated_output_lines = Some(vec!["5V 3A 15W".into(), "20V 3.25A 65.5W".into()]);
        assert_eq!(map(&schema).lookup("#BLOCK:MAX_OUTPUT_POWER_BLOCK"), Some("最大連續輸出功率為 65.5W"));

        schema.basic_info.max_output_w = Some("120".into());
        schema.basic_info.max_output_v = Some("12".into());
        schema.basic_info.max_output_a = Some("10A".into());
        assert_eq!(
            map(&schema).lookup("#BLOCK:MAX_OUTPUT_POWER_BLOCK"),
            Some("最大連續輸出功率為 120W / 12V, 10A")
        );
    }

    #[test]
    fn test_temperature_block_prefers_text_over_rise_rows() {
        let mut schema = ReportSchema::default();
        schema.key_tables.temperature_rise = vec![
            TemperatureRiseRow {
                location: Some("T1".into()),
                measured_temp: Some("85".into()),
                temp_rise: Some("60".into()),
                ..TemperatureRiseRow::default()
            },
            TemperatureRiseRow { location: Some("Enclosure".into()), ..TemperatureRiseRow::default() },
            TemperatureRiseRow::default(),
        ];
        assert_eq!(
            map(&schema).lookup("#BLOCK:TEMPERATURE_REQUIREMENTS_TABLE"),
            Some("Temperature rise summary: T1 / 85C / rise 60K; Enclosure")
        );

        schema.basic_info.temperature_requirements_text = Some("Tested at 40°C ambient".into());
        assert_eq!(map(&schema).lookup("#BLOCK:TEMPERATURE_REQUIREMENTS_TABLE"), Some("Tested at 40°C ambient"));
    }

    #[test]
    fn test_list_blocks() {
        let mut schema = ReportSchema::default();
        schema.attachments = Some(vec!["Photos".into(), "Schematics".into()]);
        schema.factories = vec![
            FactoryInfo { name: "Plant A".into(), address: "Taipei".into() },
            FactoryInfo { name: "Plant B".into(), address: String::new() },
        ];
        let m = map(&schema);
        assert_eq!(m.lookup("#BLOCK:ATTACHMENT_LIST_BLOCK"), Some("• Photos\n• Schematics"));
        assert_eq!(m.lookup("attachment_list"), Some("Photos; Schematics"));
        assert_eq!(m.lookup("#BLOCK:FACTORY_TABLE_BLOCK"), Some("Plant A / Taipei\nPlant B"));
        assert_eq!(m.lookup("#BLOCK:TABLE_B2_5_INPUT_TEST"), Some(""));
    }

    #[test]
    fn test_series_beyond_bound_not_addressable() {
        let mut schema = ReportSchema::default();
        schema.series_models =
            (1..=3).map(|i| SeriesModel { model: format!("M{}", i), ..Default::default() }).collect();
        let m = map(&schema);
        assert_eq!(m.lookup("series_model_1"), Some("M1"));
        assert_eq!(m.lookup("series_model_0"), None);
    }
}
