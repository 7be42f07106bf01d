//! Raw JSON → `ReportSchema`
//!
//! Walks the raw value field by field. Values of a compatible shape are
//! coerced (numbers to text, `"2000 m"` to 2000, a lone string to a list);
//! values of an incompatible shape are collected as `ValidationError`s and
//! fail the whole record. Over-long arrays are truncated with a notice.

use serde_json::{Map, Value};

use super::*;
use crate::error::ValidationError;

/// A record that passed validation, plus non-fatal notices (truncations,
/// dropped values) worth logging.
#[derive(Debug, Clone)]
pub struct Validated {
    pub schema: ReportSchema,
    pub notices: Vec<String>,
}

#[derive(Default)]
struct Ctx {
    errors: Vec<ValidationError>,
    notices: Vec<String>,
}

/// A JSON object being read, with its path for error reporting. A missing or
/// `null` object reads as empty.
struct Obj<'v> {
    map: Option<&'v Map<String, Value>>,
    path: String,
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Scalar-to-text coercion shared by text fields and list elements.
fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First run of ASCII digits in `s`, e.g. `"≤ 2000 m"` → 2000.
fn leading_integer(s: &str) -> Option<i64> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let digits: String = s[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    let n: i64 = digits.parse().ok()?;
    if s[..start].trim_end().ends_with('-') { Some(-n) } else { Some(n) }
}

impl<'v> Obj<'v> {
    fn root(map: &'v Map<String, Value>) -> Self {
        Obj { map: Some(map), path: String::new() }
    }

    fn path_of(&self, key: &str) -> String {
        if self.path.is_empty() { key.to_string() } else { format!("{}.{}", self.path, key) }
    }

    fn get(&self, key: &str) -> Option<&'v Value> {
        self.map.and_then(|m| m.get(key)).filter(|v| !v.is_null())
    }

    fn mismatch(&self, cx: &mut Ctx, key: &str, expected: &str, found: &Value) {
        cx.errors.push(ValidationError::new(
            self.path_of(key),
            format!("expected {}, found {}", expected, kind(found)),
        ));
    }

    fn opt_text(&self, cx: &mut Ctx, key: &str) -> Option<String> {
        let v = self.get(key)?;
        if let Some(s) = scalar_text(v) {
            return Some(s);
        }
        if let Value::Array(items) = v {
            let parts: Option<Vec<String>> = items.iter().map(scalar_text).collect();
            if let Some(parts) = parts {
                return Some(parts.join(", "));
            }
        }
        self.mismatch(cx, key, "text", v);
        None
    }

    fn text(&self, cx: &mut Ctx, key: &str) -> String {
        self.opt_text(cx, key).unwrap_or_default()
    }

    fn text_or(&self, cx: &mut Ctx, key: &str, default: &str) -> String {
        self.opt_text(cx, key).unwrap_or_else(|| default.to_string())
    }

    fn opt_text_list(&self, cx: &mut Ctx, key: &str) -> Option<Vec<String>> {
        let v = self.get(key)?;
        match v {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Null => {}
                        other => match scalar_text(other) {
                            Some(s) => out.push(s),
                            None => self.mismatch(cx, &format!("{}[{}]", key, i), "text", other),
                        },
                    }
                }
                Some(out)
            }
            Value::String(s) if s.trim().is_empty() => Some(Vec::new()),
            Value::String(s) => Some(vec![s.clone()]),
            other => {
                self.mismatch(cx, key, "list of text", other);
                None
            }
        }
    }

    fn text_list(&self, cx: &mut Ctx, key: &str) -> Vec<String> {
        self.opt_text_list(cx, key).unwrap_or_default()
    }

    fn opt_int(&self, cx: &mut Ctx, key: &str) -> Option<i64> {
        let v = self.get(key)?;
        match v {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(i)
                } else {
                    n.as_f64().map(|f| f.round() as i64)
                }
            }
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => {
                let parsed = leading_integer(s);
                if parsed.is_none() {
                    cx.notices.push(format!("{}: no number in {:?}, left empty", self.path_of(key), s));
                }
                parsed
            }
            other => {
                self.mismatch(cx, key, "integer", other);
                None
            }
        }
    }

    fn flag(&self, cx: &mut Ctx, key: &str) -> bool {
        let Some(v) = self.get(key) else { return false };
        match v {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => true,
                "false" | "no" | "n" | "0" | "" => false,
                _ => {
                    self.mismatch(cx, key, "boolean", v);
                    false
                }
            },
            other => {
                self.mismatch(cx, key, "boolean", other);
                false
            }
        }
    }

    fn child(&self, cx: &mut Ctx, key: &str) -> Obj<'v> {
        let path = self.path_of(key);
        match self.get(key) {
            Some(Value::Object(map)) => Obj { map: Some(map), path },
            Some(other) => {
                self.mismatch(cx, key, "object", other);
                Obj { map: None, path }
            }
            None => Obj { map: None, path },
        }
    }

    /// Array of records. Elements beyond `bound` are dropped with a notice.
    fn records<T: FromRaw>(&self, cx: &mut Ctx, key: &str, bound: Option<usize>) -> Vec<T> {
        let Some(v) = self.get(key) else { return Vec::new() };
        let Value::Array(items) = v else {
            self.mismatch(cx, key, "array", v);
            return Vec::new();
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("{}[{}]", self.path_of(key), i);
            match item {
                Value::Object(map) => out.push(T::from_raw(&Obj { map: Some(map), path }, cx)),
                Value::Null => {}
                other => cx.errors.push(ValidationError::new(
                    path,
                    format!("expected object, found {}", kind(other)),
                )),
            }
        }

        if let Some(max) = bound {
            if out.len() > max {
                cx.notices.push(format!(
                    "{}: {} entries, keeping the first {}",
                    self.path_of(key),
                    out.len(),
                    max
                ));
                out.truncate(max);
            }
        }
        out
    }
}

trait FromRaw: Sized {
    fn from_raw(obj: &Obj, cx: &mut Ctx) -> Self;
}

impl FromRaw for BasicInfo {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        BasicInfo {
            cb_report_no: o.text(cx, "cb_report_no"),
            ast_report_no: o.opt_text(cx, "ast_report_no"),
            cns_report_no: o.opt_text(cx, "cns_report_no"),
            bsmi_designated_report_no: o.opt_text(cx, "bsmi_designated_report_no"),
            standard: o.text(cx, "standard"),
            standard_version: o.opt_text(cx, "standard_version"),
            cns_standard: o.opt_text(cx, "cns_standard"),
            cns_standard_version: o.opt_text(cx, "cns_standard_version"),
            national_differences: o.opt_text(cx, "national_differences"),
            test_lab: o.opt_text(cx, "test_lab"),
            test_lab_country: o.opt_text(cx, "test_lab_country"),
            cb_scheme_member: o.opt_text(cx, "cb_scheme_member"),
            applicant_en: o.text(cx, "applicant_en"),
            applicant_address_en: o.text(cx, "applicant_address_en"),
            manufacturer_en: o.text(cx, "manufacturer_en"),
            manufacturer_address_en: o.text(cx, "manufacturer_address_en"),
            factory_name_en: o.opt_text(cx, "factory_name_en"),
            factory_address_en: o.opt_text(cx, "factory_address_en"),
            product_name_en: o.text(cx, "product_name_en"),
            model_main: o.text(cx, "model_main"),
            brand: o.opt_text(cx, "brand"),
            trademark: o.opt_text(cx, "trademark"),
            ratings_input: o.text(cx, "ratings_input"),
            ratings_output: o.text(cx, "ratings_output"),
            ratings_power: o.opt_text(cx, "ratings_power"),
            rated_output_lines: o.opt_text_list(cx, "rated_output_lines"),
            max_output_v: o.opt_text(cx, "max_output_v"),
            max_output_a: o.opt_text(cx, "max_output_a"),
            max_output_w: o.opt_text(cx, "max_output_w"),
            issue_date: o.opt_text(cx, "issue_date"),
            issue_date_short: o.opt_text(cx, "issue_date_short"),
            receive_date: o.opt_text(cx, "receive_date"),
            test_date_from: o.opt_text(cx, "test_date_from"),
            test_date_to: o.opt_text(cx, "test_date_to"),
            cb_test_lab: o.opt_text(cx, "cb_test_lab"),
            cb_certificate_no: o.opt_text(cx, "cb_certificate_no"),
            cb_standard: o.opt_text(cx, "cb_standard"),
            equipment_mass: o.opt_text(cx, "equipment_mass"),
            protection_rating: o.opt_text(cx, "protection_rating"),
            test_type: o.opt_text(cx, "test_type"),
            overall_result: o.opt_text(cx, "overall_result"),
            sample_conforms: o.opt_text(cx, "sample_conforms"),
            sample_not_conforms: o.opt_text(cx, "sample_not_conforms"),
            not_applicable_items: o.opt_text(cx, "not_applicable_items"),
            special_installation: o.opt_text(cx, "special_installation"),
            national_differences_summary: o.opt_text(cx, "national_differences_summary"),
            model_differences: o.opt_text(cx, "model_differences"),
            cb_report_note: o.opt_text(cx, "cb_report_note"),
            temperature_requirements_text: o.opt_text(cx, "temperature_requirements_text"),
        }
    }
}

impl FromRaw for TestItemParticulars {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        TestItemParticulars {
            product_group: o.opt_text(cx, "product_group"),
            classification_of_use: o.text_list(cx, "classification_of_use"),
            supply_connection: o.text_list(cx, "supply_connection"),
            ovc: o.opt_text(cx, "ovc"),
            pollution_degree: o.opt_text(cx, "pollution_degree"),
            ip_code: o.opt_text(cx, "ip_code"),
            tma: o.opt_text(cx, "tma"),
            altitude_limit_m: o.opt_int(cx, "altitude_limit_m"),
            installation_type: o.opt_text(cx, "installation_type"),
            operating_conditions: o.opt_text(cx, "operating_conditions"),
            mains_supply: o.opt_text(cx, "mains_supply"),
            rated_voltage: o.opt_text(cx, "rated_voltage"),
            rated_frequency: o.opt_text(cx, "rated_frequency"),
            rated_current: o.opt_text(cx, "rated_current"),
            protection_class: o.opt_text(cx, "protection_class"),
            insulation_type: o.opt_text(cx, "insulation_type"),
            mobility: o.opt_text(cx, "mobility"),
            additional_info: o.opt_text(cx, "additional_info"),
        }
    }
}

impl FromRaw for SeriesModel {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        SeriesModel {
            model: o.text(cx, "model"),
            vout: o.opt_text(cx, "vout"),
            iout: o.opt_text(cx, "iout"),
            pout: o.opt_text(cx, "pout"),
            vin: o.opt_text(cx, "vin"),
            iin: o.opt_text(cx, "iin"),
            case_type: o.opt_text(cx, "case_type"),
            connector_type: o.opt_text(cx, "connector_type"),
            differences: o.opt_text(cx, "differences"),
            remarks: o.opt_text(cx, "remarks"),
        }
    }
}

impl FromRaw for RevisionRecord {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        let defaults = RevisionRecord::default();
        RevisionRecord {
            item: o.text_or(cx, "item", &defaults.item),
            date: o.opt_text(cx, "date"),
            report_no: o.opt_text(cx, "report_no"),
            description: o.text_or(cx, "description", &defaults.description),
        }
    }
}

impl FromRaw for ClauseVerdict {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        ClauseVerdict {
            clause: o.text(cx, "clause"),
            clause_title: o.opt_text(cx, "clause_title"),
            verdict: o.text_or(cx, "verdict", "P"),
            comment_en: o.opt_text(cx, "comment_en"),
            comment_zh: o.opt_text(cx, "comment_zh"),
            test_method: o.opt_text(cx, "test_method"),
            reference: o.opt_text(cx, "reference"),
        }
    }
}

impl FromRaw for InputTestRow {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        InputTestRow {
            test_condition: o.opt_text(cx, "test_condition"),
            voltage: o.opt_text(cx, "voltage"),
            current: o.opt_text(cx, "current"),
            power: o.opt_text(cx, "power"),
            frequency: o.opt_text(cx, "frequency"),
            power_factor: o.opt_text(cx, "power_factor"),
            remarks: o.opt_text(cx, "remarks"),
        }
    }
}

impl FromRaw for TemperatureRiseRow {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        TemperatureRiseRow {
            location: o.opt_text(cx, "location"),
            component: o.opt_text(cx, "component"),
            measured_temp: o.opt_text(cx, "measured_temp"),
            ambient_temp: o.opt_text(cx, "ambient_temp"),
            temp_rise: o.opt_text(cx, "temp_rise"),
            limit: o.opt_text(cx, "limit"),
            verdict: o.opt_text(cx, "verdict"),
            remarks: o.opt_text(cx, "remarks"),
        }
    }
}

impl FromRaw for EnergySourceRow {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        EnergySourceRow {
            energy_source: o.opt_text(cx, "energy_source"),
            class_level: o.opt_text(cx, "class_level"),
            voltage: o.opt_text(cx, "voltage"),
            current: o.opt_text(cx, "current"),
            power: o.opt_text(cx, "power"),
            location: o.opt_text(cx, "location"),
            safeguard: o.opt_text(cx, "safeguard"),
            remarks: o.opt_text(cx, "remarks"),
        }
    }
}

impl FromRaw for KeyTables {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        KeyTables {
            input_tests: o.records(cx, "input_tests", None),
            temperature_rise: o.records(cx, "temperature_rise", None),
            energy_sources: o.records(cx, "energy_sources", None),
        }
    }
}

impl FromRaw for FactoryInfo {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        FactoryInfo { name: o.text(cx, "name"), address: o.text(cx, "address") }
    }
}

impl FromRaw for Translations {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        Translations {
            applicant_zh: o.opt_text(cx, "applicant_zh"),
            applicant_address_zh: o.opt_text(cx, "applicant_address_zh"),
            manufacturer_zh: o.opt_text(cx, "manufacturer_zh"),
            manufacturer_address_zh: o.opt_text(cx, "manufacturer_address_zh"),
            product_name_zh: o.opt_text(cx, "product_name_zh"),
            factory_name_zh: o.opt_text(cx, "factory_name_zh"),
            factory_address_zh: o.opt_text(cx, "factory_address_zh"),
            factory_name_1: o.opt_text(cx, "factory_name_1"),
            factory_address_1: o.opt_text(cx, "factory_address_1"),
            factory_name_2: o.opt_text(cx, "factory_name_2"),
            factory_address_2: o.opt_text(cx, "factory_address_2"),
        }
    }
}

impl FromRaw for CheckboxFlags {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        CheckboxFlags {
            is_av: o.flag(cx, "is_av"),
            is_ict: o.flag(cx, "is_ict"),
            is_av_ict: o.flag(cx, "is_av_ict"),
            is_telecom: o.flag(cx, "is_telecom"),
            is_ordinary: o.flag(cx, "is_ordinary"),
            is_skilled: o.flag(cx, "is_skilled"),
            is_instructed: o.flag(cx, "is_instructed"),
            is_class_i: o.flag(cx, "is_class_i"),
            is_class_ii: o.flag(cx, "is_class_ii"),
            is_class_iii: o.flag(cx, "is_class_iii"),
            is_direct_plugin: o.flag(cx, "is_direct_plugin"),
            is_stationary: o.flag(cx, "is_stationary"),
            is_building_in: o.flag(cx, "is_building_in"),
            is_wall_ceiling: o.flag(cx, "is_wall_ceiling"),
            is_rack_mounted: o.flag(cx, "is_rack_mounted"),
            is_portable: o.flag(cx, "is_portable"),
            is_fixed: o.flag(cx, "is_fixed"),
            is_pluggable_a: o.flag(cx, "is_pluggable_a"),
            is_pluggable_b: o.flag(cx, "is_pluggable_b"),
            is_permanently_connected: o.flag(cx, "is_permanently_connected"),
        }
    }
}

impl FromRaw for ReportSchema {
    fn from_raw(o: &Obj, cx: &mut Ctx) -> Self {
        ReportSchema {
            basic_info: BasicInfo::from_raw(&o.child(cx, "basic_info"), cx),
            test_item_particulars: TestItemParticulars::from_raw(
                &o.child(cx, "test_item_particulars"),
                cx,
            ),
            series_models: o.records(cx, "series_models", Some(MAX_SERIES_MODELS)),
            revision_records: o.records(cx, "revision_records", Some(MAX_REVISIONS)),
            clause_verdicts: o.records(cx, "clause_verdicts", None),
            key_tables: KeyTables::from_raw(&o.child(cx, "key_tables"), cx),
            factories: o.records(cx, "factories", None),
            attachments: o.opt_text_list(cx, "attachments"),
            translations: Translations::from_raw(&o.child(cx, "translations"), cx),
            checkbox_flags: CheckboxFlags::from_raw(&o.child(cx, "checkbox_flags"), cx),
            extraction_version: o.text_or(cx, "extraction_version", SCHEMA_VERSION),
            extraction_timestamp: o.opt_text(cx, "extraction_timestamp"),
            source_filename: o.opt_text(cx, "source_filename"),
            extraction_notes: o.opt_text(cx, "extraction_notes"),
        }
    }
}

/// Check and coerce a raw JSON value into a `ReportSchema`.
///
/// Returns every field-level error when any declared field has an
/// incompatible shape. Unknown keys are ignored.
pub fn validate(raw: &Value) -> Result<Validated, Vec<ValidationError>> {
    let Value::Object(map) = raw else {
        return Err(vec![ValidationError::new(
            "$",
            format!("expected object, found {}", kind(raw)),
        )]);
    };

    let mut cx = Ctx::default();
    let schema = ReportSchema::from_raw(&Obj::root(map), &mut cx);

    if cx.errors.is_empty() {
        Ok(Validated { schema, notices: cx.notices })
    } else {
        Err(cx.errors)
    }
}
