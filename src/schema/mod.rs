//! Report schema
//!
//! `ReportSchema` is the single structured record produced from a CB test
//! report and consumed by the template filler. Field names are stable: they
//! are both the JSON keys and the placeholder names in the Word template.
//!
//! Records are built through [`validate`], never deserialized directly, so
//! that LLM output with slightly-off types is coerced instead of rejected.

mod fixture;
mod merge;
mod validate;

pub use fixture::mock_schema;
pub use validate::{validate, Validated};

use serde::Serialize;

/// Maximum number of series models the template has rows for.
pub const MAX_SERIES_MODELS: usize = 60;
/// Maximum number of revision records the template has rows for.
pub const MAX_REVISIONS: usize = 5;
pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BasicInfo {
    pub cb_report_no: String,
    pub ast_report_no: Option<String>,
    pub cns_report_no: Option<String>,
    pub bsmi_designated_report_no: Option<String>,
    pub standard: String,
    pub standard_version: Option<String>,
    pub cns_standard: Option<String>,
    pub cns_standard_version: Option<String>,
    pub national_differences: Option<String>,
    pub test_lab: Option<String>,
    pub test_lab_country: Option<String>,
    pub cb_scheme_member: Option<String>,

    pub applicant_en: String,
    pub applicant_address_en: String,
    pub manufacturer_en: String,
    pub manufacturer_address_en: String,
    pub factory_name_en: Option<String>,
    pub factory_address_en: Option<String>,

    pub product_name_en: String,
    pub model_main: String,
    pub brand: Option<String>,
    pub trademark: Option<String>,

    pub ratings_input: String,
    pub ratings_output: String,
    pub ratings_power: Option<String>,
    pub rated_output_lines: Option<Vec<String>>,
    pub max_output_v: Option<String>,
    pub max_output_a: Option<String>,
    pub max_output_w: Option<String>,

    pub issue_date: Option<String>,
    /// ROC calendar short form, e.g. `113.03.27`
    pub issue_date_short: Option<String>,
    pub receive_date: Option<String>,
    pub test_date_from: Option<String>,
    pub test_date_to: Option<String>,

    pub cb_test_lab: Option<String>,
    pub cb_certificate_no: Option<String>,
    pub cb_standard: Option<String>,

    pub equipment_mass: Option<String>,
    /// Rated current of the protective device
    pub protection_rating: Option<String>,

    pub test_type: Option<String>,
    pub overall_result: Option<String>,
    pub sample_conforms: Option<String>,
    pub sample_not_conforms: Option<String>,
    pub not_applicable_items: Option<String>,
    pub special_installation: Option<String>,
    pub national_differences_summary: Option<String>,
    pub model_differences: Option<String>,
    pub cb_report_note: Option<String>,
    pub temperature_requirements_text: Option<String>,
}

/// "Test item particulars" block from the first pages of a CB report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestItemParticulars {
    /// AV / ICT / AV & ICT / Telecom
    pub product_group: Option<String>,
    /// Ordinary / Skilled / Instructed, possibly several
    pub classification_of_use: Vec<String>,
    /// Class I / II / III, possibly several
    pub supply_connection: Vec<String>,
    pub ovc: Option<String>,
    pub pollution_degree: Option<String>,
    pub ip_code: Option<String>,
    pub tma: Option<String>,
    pub altitude_limit_m: Option<i64>,
    pub installation_type: Option<String>,
    pub operating_conditions: Option<String>,
    pub mains_supply: Option<String>,
    pub rated_voltage: Option<String>,
    pub rated_frequency: Option<String>,
    pub rated_current: Option<String>,
    pub protection_class: Option<String>,
    pub insulation_type: Option<String>,
    pub mobility: Option<String>,
    pub additional_info: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesModel {
    pub model: String,
    pub vout: Option<String>,
    pub iout: Option<String>,
    pub pout: Option<String>,
    pub vin: Option<String>,
    pub iin: Option<String>,
    pub case_type: Option<String>,
    pub connector_type: Option<String>,
    pub differences: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevisionRecord {
    pub item: String,
    pub date: Option<String>,
    pub report_no: Option<String>,
    pub description: String,
}

impl Default for RevisionRecord {
    fn default() -> Self {
        Self {
            item: "01".to_string(),
            date: None,
            report_no: None,
            description: "主報告".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClauseVerdict {
    pub clause: String,
    pub clause_title: Option<String>,
    /// P / F / N/A / NT / C
    pub verdict: String,
    pub comment_en: Option<String>,
    pub comment_zh: Option<String>,
    pub test_method: Option<String>,
    pub reference: Option<String>,
}

impl Default for ClauseVerdict {
    fn default() -> Self {
        Self {
            clause: String::new(),
            clause_title: None,
            verdict: "P".to_string(),
            comment_en: None,
            comment_zh: None,
            test_method: None,
            reference: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputTestRow {
    pub test_condition: Option<String>,
    pub voltage: Option<String>,
    pub current: Option<String>,
    pub power: Option<String>,
    pub frequency: Option<String>,
    pub power_factor: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemperatureRiseRow {
    pub location: Option<String>,
    pub component: Option<String>,
    pub measured_temp: Option<String>,
    pub ambient_temp: Option<String>,
    pub temp_rise: Option<String>,
    pub limit: Option<String>,
    pub verdict: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergySourceRow {
    pub energy_source: Option<String>,
    /// ES1 / ES2 / ES3
    pub class_level: Option<String>,
    pub voltage: Option<String>,
    pub current: Option<String>,
    pub power: Option<String>,
    pub location: Option<String>,
    pub safeguard: Option<String>,
    pub remarks: Option<String>,
}

/// Test tables carried through structuring. Only the temperature rise rows
/// reach the template, as a text summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyTables {
    pub input_tests: Vec<InputTestRow>,
    pub temperature_rise: Vec<TemperatureRiseRow>,
    pub energy_sources: Vec<EnergySourceRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FactoryInfo {
    pub name: String,
    pub address: String,
}

/// Traditional Chinese renderings produced by the translation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Translations {
    pub applicant_zh: Option<String>,
    pub applicant_address_zh: Option<String>,
    pub manufacturer_zh: Option<String>,
    pub manufacturer_address_zh: Option<String>,
    pub product_name_zh: Option<String>,
    pub factory_name_zh: Option<String>,
    pub factory_address_zh: Option<String>,
    pub factory_name_1: Option<String>,
    pub factory_address_1: Option<String>,
    pub factory_name_2: Option<String>,
    pub factory_address_2: Option<String>,
}

/// Boolean state behind every `□` option in the template.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckboxFlags {
    pub is_av: bool,
    pub is_ict: bool,
    pub is_av_ict: bool,
    pub is_telecom: bool,

    pub is_ordinary: bool,
    pub is_skilled: bool,
    pub is_instructed: bool,

    pub is_class_i: bool,
    pub is_class_ii: bool,
    pub is_class_iii: bool,

    pub is_direct_plugin: bool,
    pub is_stationary: bool,
    pub is_building_in: bool,
    pub is_wall_ceiling: bool,
    pub is_rack_mounted: bool,
    pub is_portable: bool,
    pub is_fixed: bool,

    pub is_pluggable_a: bool,
    pub is_pluggable_b: bool,
    pub is_permanently_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSchema {
    pub basic_info: BasicInfo,
    pub test_item_particulars: TestItemParticulars,
    pub series_models: Vec<SeriesModel>,
    pub revision_records: Vec<RevisionRecord>,
    pub clause_verdicts: Vec<ClauseVerdict>,
    pub key_tables: KeyTables,
    pub factories: Vec<FactoryInfo>,
    pub attachments: Option<Vec<String>>,
    pub translations: Translations,
    pub checkbox_flags: CheckboxFlags,

    pub extraction_version: String,
    pub extraction_timestamp: Option<String>,
    pub source_filename: Option<String>,
    pub extraction_notes: Option<String>,
}

impl Default for ReportSchema {
    fn default() -> Self {
        Self {
            basic_info: BasicInfo::default(),
            test_item_particulars: TestItemParticulars::default(),
            series_models: Vec::new(),
            revision_records: Vec::new(),
            clause_verdicts: Vec::new(),
            key_tables: KeyTables::default(),
            factories: Vec::new(),
            attachments: None,
            translations: Translations::default(),
            checkbox_flags: CheckboxFlags::default(),
            extraction_version: SCHEMA_VERSION.to_string(),
            extraction_timestamp: None,
            source_filename: None,
            extraction_notes: None,
        }
    }
}

impl ReportSchema {
    /// Report number used for output naming; CB number first, then AST.
    pub fn report_number(&self) -> Option<&str> {
        let info = &self.basic_info;
        Some(info.cb_report_no.as_str())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| info.ast_report_no.as_deref().filter(|s| !s.trim().is_empty()))
    }
}
