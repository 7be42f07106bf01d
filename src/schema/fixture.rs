//! Fixed sample record used by the mock pipeline path and `/api/schema-sample`.

use super::{
    BasicInfo, CheckboxFlags, ClauseVerdict, ReportSchema, SeriesModel, TestItemParticulars,
    Translations,
};

fn s(v: &str) -> Option<String> {
    Some(v.to_string())
}

fn series(model: &str, vout: &str, iout: &str, pout: &str, case_type: &str) -> SeriesModel {
    SeriesModel {
        model: model.to_string(),
        vout: s(vout),
        iout: s(iout),
        pout: s(pout),
        case_type: s(case_type),
        ..SeriesModel::default()
    }
}

fn verdict(clause: &str, comment: &str) -> ClauseVerdict {
    ClauseVerdict {
        clause: clause.to_string(),
        verdict: "P".to_string(),
        comment_en: s(comment),
        ..ClauseVerdict::default()
    }
}

/// A complete, valid record for a 120 W switching power supply.
pub fn mock_schema() -> ReportSchema {
    ReportSchema {
        basic_info: BasicInfo {
            cb_report_no: "TW-12345-UL".to_string(),
            standard: "IEC 62368-1:2018".to_string(),
            applicant_en: "ABC Technology Co., Ltd.".to_string(),
            applicant_address_en: "No. 123, Tech Road, Hsinchu, Taiwan".to_string(),
            manufacturer_en: "XYZ Manufacturing Inc.".to_string(),
            manufacturer_address_en: "No. 456, Industry Blvd, Shenzhen, China".to_string(),
            product_name_en: "Switching Power Supply".to_string(),
            model_main: "SPS-120W".to_string(),
            ratings_input: "100-240Vac, 50/60Hz, 2A".to_string(),
            ratings_output: "12Vdc, 10A".to_string(),
            issue_date: s("2024-01-15"),
            ..BasicInfo::default()
        },
        test_item_particulars: TestItemParticulars {
            product_group: s("ICT"),
            classification_of_use: vec!["Ordinary".to_string()],
            supply_connection: vec!["Class I".to_string()],
            ovc: s("OVC II"),
            pollution_degree: s("2"),
            ip_code: s("IP20"),
            tma: s("40°C"),
            altitude_limit_m: Some(2000),
            ..TestItemParticulars::default()
        },
        series_models: vec![
            series("SPS-120W-A", "12V", "10A", "120W", "Metal"),
            series("SPS-120W-B", "24V", "5A", "120W", "Metal"),
            series("SPS-120W-C", "48V", "2.5A", "120W", "Plastic"),
        ],
        clause_verdicts: vec![
            verdict("4.1.1", "Product properly classified"),
            verdict("4.2.1", "Energy sources identified"),
            verdict("5.4.2", "Temperature rise within limits"),
        ],
        translations: Translations {
            applicant_zh: s("ABC 科技股份有限公司"),
            manufacturer_zh: s("XYZ 製造有限公司"),
            product_name_zh: s("交換式電源供應器"),
            ..Translations::default()
        },
        checkbox_flags: CheckboxFlags {
            is_ict: true,
            is_ordinary: true,
            is_class_i: true,
            ..CheckboxFlags::default()
        },
        ..ReportSchema::default()
    }
}
