//! Combining per-chunk structuring results, and deriving checkbox flags.

use super::*;

/// Field-level "non-empty update wins" rule.
trait Overlay {
    fn overlay(&mut self, update: Self);
}

impl Overlay for String {
    fn overlay(&mut self, update: Self) {
        if !update.is_empty() {
            *self = update;
        }
    }
}

impl Overlay for Option<String> {
    fn overlay(&mut self, update: Self) {
        if let Some(v) = update.filter(|v| !v.is_empty()) {
            *self = Some(v);
        }
    }
}

impl Overlay for Option<i64> {
    fn overlay(&mut self, update: Self) {
        if update.is_some() {
            *self = update;
        }
    }
}

impl Overlay for Option<Vec<String>> {
    fn overlay(&mut self, update: Self) {
        if let Some(v) = update.filter(|v| !v.is_empty()) {
            *self = Some(v);
        }
    }
}

/// Lists union, keeping first-seen order.
impl Overlay for Vec<String> {
    fn overlay(&mut self, update: Self) {
        for item in update {
            if !self.contains(&item) {
                self.push(item);
            }
        }
    }
}

impl SeriesModel {
    fn fill_gaps(&mut self, other: SeriesModel) {
        let slots = [
            (&mut self.vout, other.vout),
            (&mut self.iout, other.iout),
            (&mut self.pout, other.pout),
            (&mut self.vin, other.vin),
            (&mut self.iin, other.iin),
            (&mut self.case_type, other.case_type),
            (&mut self.connector_type, other.connector_type),
            (&mut self.differences, other.differences),
            (&mut self.remarks, other.remarks),
        ];
        for (slot, value) in slots {
            if slot.as_deref().map_or(true, str::is_empty) {
                slot.overlay(value);
            }
        }
    }
}

macro_rules! overlay_fields {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $( $dst.$field.overlay($src.$field); )+
    };
}

impl ReportSchema {
    /// Fold another partial result into this one.
    ///
    /// Non-empty scalars from `update` win; lists union; series models are
    /// de-duplicated by model name (first wins, later entries only fill its
    /// blank attributes); clause verdicts are keyed by
    /// clause (last wins); key table rows are appended; checkbox groups keep
    /// their first selection.
    pub fn merge(&mut self, update: ReportSchema) {
        let (b, u) = (&mut self.basic_info, update.basic_info);
        overlay_fields!(b, u;
            cb_report_no, ast_report_no, cns_report_no, bsmi_designated_report_no,
            standard, standard_version, cns_standard, cns_standard_version,
            national_differences, test_lab, test_lab_country, cb_scheme_member,
            applicant_en, applicant_address_en, manufacturer_en, manufacturer_address_en,
            factory_name_en, factory_address_en, product_name_en, model_main, brand,
            trademark, ratings_input, ratings_output, ratings_power, rated_output_lines,
            max_output_v, max_output_a, max_output_w, issue_date, issue_date_short,
            receive_date, test_date_from, test_date_to, cb_test_lab, cb_certificate_no,
            cb_standard, equipment_mass, protection_rating, test_type, overall_result,
            sample_conforms, sample_not_conforms, not_applicable_items,
            special_installation, national_differences_summary, model_differences,
            cb_report_note, temperature_requirements_text,
        );

        let (t, u) = (&mut self.test_item_particulars, update.test_item_particulars);
        overlay_fields!(t, u;
            product_group, classification_of_use, supply_connection, ovc,
            pollution_degree, ip_code, tma, altitude_limit_m, installation_type,
            operating_conditions, mains_supply, rated_voltage, rated_frequency,
            rated_current, protection_class, insulation_type, mobility, additional_info,
        );

        for model in update.series_models {
            if model.model.is_empty() {
                continue;
            }
            match self.series_models.iter_mut().find(|m| m.model == model.model) {
                Some(existing) => existing.fill_gaps(model),
                None => self.series_models.push(model),
            }
        }
        self.series_models.truncate(MAX_SERIES_MODELS);

        if !update.revision_records.is_empty() && self.revision_records.is_empty() {
            self.revision_records = update.revision_records;
        }

        for verdict in update.clause_verdicts {
            if verdict.clause.is_empty() {
                continue;
            }
            match self.clause_verdicts.iter_mut().find(|c| c.clause == verdict.clause) {
                Some(existing) => *existing = verdict,
                None => self.clause_verdicts.push(verdict),
            }
        }

        self.key_tables.input_tests.extend(update.key_tables.input_tests);
        self.key_tables.temperature_rise.extend(update.key_tables.temperature_rise);
        self.key_tables.energy_sources.extend(update.key_tables.energy_sources);

        let (t, u) = (&mut self.translations, update.translations);
        overlay_fields!(t, u;
            applicant_zh, applicant_address_zh, manufacturer_zh, manufacturer_address_zh,
            product_name_zh, factory_name_zh, factory_address_zh,
            factory_name_1, factory_address_1, factory_name_2, factory_address_2,
        );

        self.checkbox_flags.absorb(&update.checkbox_flags);

        for factory in update.factories {
            if !self.factories.contains(&factory) {
                self.factories.push(factory);
            }
        }

        if let Some(extra) = update.attachments {
            let list = self.attachments.get_or_insert_with(Vec::new);
            list.overlay(extra);
        }

        self.extraction_notes.overlay(update.extraction_notes);
    }
}

/// `needle` occurs in `hay` followed by a non-alphanumeric char or the end,
/// so `CLASS I` does not match inside `CLASS II`.
fn contains_option(hay: &str, needle: &str) -> bool {
    hay.match_indices(needle).any(|(i, m)| {
        hay[i + m.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true)
    })
}

/// Fold one single-choice group. A selection already in `current` wins,
/// otherwise the first option set in `update`; at most one stays set.
fn choose<const N: usize>(current: [&mut bool; N], update: [bool; N]) {
    let picked = current
        .iter()
        .position(|b| **b)
        .or_else(|| update.iter().position(|b| *b));
    for (i, slot) in current.into_iter().enumerate() {
        *slot = picked == Some(i);
    }
}

impl CheckboxFlags {
    /// Fold `other` into these flags.
    ///
    /// Product category, equipment class, mobility and supply connection
    /// are single-choice groups: an existing selection is kept, else the
    /// first option of `other` in declaration order. User categories are
    /// independent and OR-ed.
    pub fn absorb(&mut self, other: &CheckboxFlags) {
        choose(
            [&mut self.is_av_ict, &mut self.is_av, &mut self.is_ict, &mut self.is_telecom],
            [other.is_av_ict, other.is_av, other.is_ict, other.is_telecom],
        );
        choose(
            [&mut self.is_class_i, &mut self.is_class_ii, &mut self.is_class_iii],
            [other.is_class_i, other.is_class_ii, other.is_class_iii],
        );
        choose(
            [
                &mut self.is_direct_plugin,
                &mut self.is_stationary,
                &mut self.is_building_in,
                &mut self.is_wall_ceiling,
                &mut self.is_rack_mounted,
                &mut self.is_portable,
                &mut self.is_fixed,
            ],
            [
                other.is_direct_plugin,
                other.is_stationary,
                other.is_building_in,
                other.is_wall_ceiling,
                other.is_rack_mounted,
                other.is_portable,
                other.is_fixed,
            ],
        );
        choose(
            [&mut self.is_pluggable_a, &mut self.is_pluggable_b, &mut self.is_permanently_connected],
            [other.is_pluggable_a, other.is_pluggable_b, other.is_permanently_connected],
        );
        self.is_ordinary |= other.is_ordinary;
        self.is_skilled |= other.is_skilled;
        self.is_instructed |= other.is_instructed;
    }

    /// Copy with every single-choice group reduced to one option.
    pub fn settled(&self) -> CheckboxFlags {
        let mut flags = CheckboxFlags::default();
        flags.absorb(self);
        flags
    }

    /// Fill in flags implied by the test item particulars. Groups that
    /// already have a selection keep it.
    pub fn infer(&mut self, tip: &TestItemParticulars) {
        let mut implied = CheckboxFlags::default();
        implied.imply(tip);
        self.absorb(&implied);
    }

    fn imply(&mut self, tip: &TestItemParticulars) {
        let group = tip.product_group.as_deref().unwrap_or("").to_uppercase();
        let av = contains_option(&group, "AV") || group.contains("AUDIO");
        if av && group.contains("ICT") {
            self.is_av_ict = true;
        } else if av {
            self.is_av = true;
        } else if group.contains("ICT") {
            self.is_ict = true;
        } else if group.contains("TELECOM") {
            self.is_telecom = true;
        }

        for class in &tip.classification_of_use {
            let class = class.to_uppercase();
            self.is_ordinary |= class.contains("ORDINARY");
            self.is_skilled |= class.contains("SKILLED");
            self.is_instructed |= class.contains("INSTRUCTED");
        }

        for conn in &tip.supply_connection {
            let conn = conn.to_uppercase();
            self.is_class_i |= contains_option(&conn, "CLASS I") || contains_option(&conn, "CLASS 1");
            self.is_class_ii |= contains_option(&conn, "CLASS II") || contains_option(&conn, "CLASS 2");
            self.is_class_iii |= contains_option(&conn, "CLASS III") || contains_option(&conn, "CLASS 3");
        }

        let mobility = tip.mobility.as_deref().unwrap_or("").to_uppercase();
        self.is_portable |= mobility.contains("PORTABLE") || mobility.contains("MOVABLE");
        self.is_stationary |= mobility.contains("STATIONARY");
        self.is_fixed |= mobility.contains("FIXED");
        self.is_direct_plugin |= mobility.contains("DIRECT PLUG");
        self.is_building_in |= mobility.contains("BUILDING-IN") || mobility.contains("BUILT-IN");
        self.is_wall_ceiling |= mobility.contains("WALL") || mobility.contains("CEILING");
        self.is_rack_mounted |= mobility.contains("RACK") || mobility.contains("SRME");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides_non_empty_scalars_only() {
        let mut base = ReportSchema::default();
        base.basic_info.cb_report_no = "CB-1".into();
        base.basic_info.brand = Some("Acme".into());

        let mut update = ReportSchema::default();
        update.basic_info.brand = Some(String::new());
        update.basic_info.model_main = "M1".into();
        update.test_item_particulars.supply_connection = vec!["Class II".into()];

        base.merge(update);
        assert_eq!(base.basic_info.cb_report_no, "CB-1");
        assert_eq!(base.basic_info.brand.as_deref(), Some("Acme"));
        assert_eq!(base.basic_info.model_main, "M1");
        assert_eq!(base.test_item_particulars.supply_connection, vec!["Class II"]);
    }

    #[test]
    fn test_duplicate_model_fills_blank_attributes() {
        let mut base = ReportSchema::default();
        base.series_models.push(SeriesModel { model: "A".into(), vout: Some("12V".into()), ..SeriesModel::default() });
        let mut update = ReportSchema::default();
        update.series_models.push(SeriesModel {
            model: "A".into(),
            vout: Some("5V".into()),
            iout: Some("1A".into()),
            ..SeriesModel::default()
        });

        base.merge(update);
        assert_eq!(base.series_models.len(), 1);
        assert_eq!(base.series_models[0].vout.as_deref(), Some("12V"));
        assert_eq!(base.series_models[0].iout.as_deref(), Some("1A"));
    }

    #[test]
    fn test_merge_dedupes_models_and_keys_clauses() {
        let model = |m: &str| SeriesModel { model: m.into(), ..SeriesModel::default() };
        let clause = |c: &str, v: &str| ClauseVerdict {
            clause: c.into(),
            verdict: v.into(),
            ..ClauseVerdict::default()
        };

        let mut base = ReportSchema {
            series_models: vec![model("A"), model("B")],
            clause_verdicts: vec![clause("4.1.1", "N/A")],
            ..ReportSchema::default()
        };
        let update = ReportSchema {
            series_models: vec![model("B"), model("C"), model("")],
            clause_verdicts: vec![clause("4.1.1", "P"), clause("5.2", "P")],
            checkbox_flags: CheckboxFlags { is_ict: true, ..CheckboxFlags::default() },
            ..ReportSchema::default()
        };
        base.merge(update);

        let names: Vec<&str> = base.series_models.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(base.clause_verdicts.len(), 2);
        assert_eq!(base.clause_verdicts[0].verdict, "P");
        assert!(base.checkbox_flags.is_ict);
    }

    #[test]
    fn test_infer_class_flags_do_not_overlap() {
        let tip = TestItemParticulars {
            product_group: Some("ICT".into()),
            classification_of_use: vec!["Ordinary person".into()],
            supply_connection: vec!["Class II".into()],
            mobility: Some("Stationary".into()),
            ..TestItemParticulars::default()
        };
        let mut flags = CheckboxFlags::default();
        flags.infer(&tip);

        assert!(flags.is_ict && !flags.is_av && !flags.is_av_ict);
        assert!(flags.is_ordinary);
        assert!(flags.is_class_ii);
        assert!(!flags.is_class_i);
        assert!(!flags.is_class_iii);
        assert!(flags.is_stationary);
    }

    #[test]
    fn test_conflicting_chunks_keep_one_class() {
        let mut base = ReportSchema::default();
        base.checkbox_flags.is_class_i = true;
        let mut update = ReportSchema::default();
        update.checkbox_flags.is_class_ii = true;
        update.checkbox_flags.is_skilled = true;
        update.test_item_particulars.supply_connection = vec!["Class III".into()];

        base.merge(update);
        let tip = base.test_item_particulars.clone();
        base.checkbox_flags.infer(&tip);

        let f = &base.checkbox_flags;
        assert!(f.is_class_i && !f.is_class_ii && !f.is_class_iii);
        assert!(f.is_skilled);
    }

    #[test]
    fn test_infer_only_fills_empty_groups() {
        let tip = TestItemParticulars {
            product_group: Some("AV".into()),
            supply_connection: vec!["Class II".into()],
            ..TestItemParticulars::default()
        };
        let mut flags = CheckboxFlags { is_ict: true, ..CheckboxFlags::default() };
        flags.infer(&tip);

        assert!(flags.is_ict && !flags.is_av);
        assert!(flags.is_class_ii);
    }

    #[test]
    fn test_settled_reduces_each_group() {
        let flags = CheckboxFlags {
            is_av: true,
            is_ict: true,
            is_class_ii: true,
            is_class_iii: true,
            is_portable: true,
            is_fixed: true,
            is_ordinary: true,
            is_instructed: true,
            ..CheckboxFlags::default()
        };
        let settled = flags.settled();

        assert!(settled.is_av && !settled.is_ict);
        assert!(settled.is_class_ii && !settled.is_class_iii);
        assert!(settled.is_portable && !settled.is_fixed);
        assert!(settled.is_ordinary && settled.is_instructed);
    }

    #[test]
    fn test_infer_av_and_ict() {
        let tip = TestItemParticulars {
            product_group: Some("Audio/Video & ICT".into()),
            ..TestItemParticulars::default()
        };
        let mut flags = CheckboxFlags::default();
        flags.infer(&tip);
        assert!(flags.is_av_ict);
        assert!(!flags.is_av);
    }
}
