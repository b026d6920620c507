// ==========================================
// 免疫接种排程系统 - 剂次规则引擎
// ==========================================
// 职责: 排程/接种输入的业务规则校验
// 红线: Engine 不拼 SQL；今天由调用方注入，不读系统时间
// 输出: 违反规则时返回 DoseRuleViolation（即拒绝原因）
// ==========================================

use crate::domain::vaccine::Vaccine;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::instrument;

/// 剂次规则违反原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DoseRuleViolation {
    #[error("剂次必须 >= 1: dose_number={dose_number}")]
    DoseNumberBelowOne { dose_number: i32 },

    #[error("剂次超出疫苗总剂次: dose_number={dose_number}, total_doses_required={total}")]
    DoseNumberExceedsTotal { dose_number: i32, total: i32 },

    #[error("疫苗已停用: vaccine_id={vaccine_id}")]
    VaccineInactive { vaccine_id: String },

    #[error("接种日期不能晚于今天: administered_date={date}, today={today}")]
    AdministeredDateInFuture { date: NaiveDate, today: NaiveDate },

    #[error("字段不能为空: {0}")]
    EmptyField(&'static str),
}

/// 接种输入（未落库前的原始参数）
#[derive(Debug, Clone, Copy)]
pub struct AdministrationInput<'a> {
    pub lot_number: &'a str,
    pub administration_site: &'a str,
    pub route: &'a str,
    pub administered_date: NaiveDate,
}

// ==========================================
// DoseRuleEngine - 剂次规则引擎
// ==========================================
#[derive(Debug, Default)]
pub struct DoseRuleEngine;

impl DoseRuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// 剂次号校验: 1 <= dose_number <= total_doses_required
    pub fn check_dose_number(
        &self,
        vaccine: &Vaccine,
        dose_number: i32,
    ) -> Result<(), DoseRuleViolation> {
        if dose_number < 1 {
            return Err(DoseRuleViolation::DoseNumberBelowOne { dose_number });
        }
        if !vaccine.accepts_dose_number(dose_number) {
            return Err(DoseRuleViolation::DoseNumberExceedsTotal {
                dose_number,
                total: vaccine.total_doses_required,
            });
        }
        Ok(())
    }

    /// 新建排程的完整校验
    ///
    /// 依次检查: 剂次号 → 疫苗启用状态，返回第一条违反的规则。
    /// 排程日期不受限，补录历史排程允许早于今天。
    #[instrument(skip(self, vaccine), fields(vaccine_id = %vaccine.vaccine_id))]
    pub fn check_new_schedule(
        &self,
        vaccine: &Vaccine,
        dose_number: i32,
    ) -> Result<(), DoseRuleViolation> {
        self.check_dose_number(vaccine, dose_number)?;
        if !vaccine.is_active {
            return Err(DoseRuleViolation::VaccineInactive {
                vaccine_id: vaccine.vaccine_id.clone(),
            });
        }
        Ok(())
    }

    /// 接种输入校验（先于任何状态读取执行）
    pub fn check_administration_input(
        &self,
        input: &AdministrationInput<'_>,
        today: NaiveDate,
    ) -> Result<(), DoseRuleViolation> {
        if input.lot_number.trim().is_empty() {
            return Err(DoseRuleViolation::EmptyField("lot_number"));
        }
        if input.administration_site.trim().is_empty() {
            return Err(DoseRuleViolation::EmptyField("administration_site"));
        }
        if input.route.trim().is_empty() {
            return Err(DoseRuleViolation::EmptyField("route"));
        }
        if input.administered_date > today {
            return Err(DoseRuleViolation::AdministeredDateInFuture {
                date: input.administered_date,
                today,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn vaccine(total: i32, active: bool) -> Vaccine {
        let ts = d(2026, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        Vaccine {
            vaccine_id: "v1".to_string(),
            vaccine_code: "VAC0001".to_string(),
            vaccine_name: "Hepatitis B".to_string(),
            manufacturer: None,
            description: None,
            total_doses_required: total,
            booster_required: false,
            booster_interval_months: None,
            recommended_age_months: None,
            is_active: active,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_dose_number_bounds() {
        let engine = DoseRuleEngine::new();
        let v = vaccine(3, true);
        assert!(engine.check_dose_number(&v, 1).is_ok());
        assert!(engine.check_dose_number(&v, 3).is_ok());
        assert_eq!(
            engine.check_dose_number(&v, 4),
            Err(DoseRuleViolation::DoseNumberExceedsTotal {
                dose_number: 4,
                total: 3
            })
        );
        assert_eq!(
            engine.check_dose_number(&v, 0),
            Err(DoseRuleViolation::DoseNumberBelowOne { dose_number: 0 })
        );
    }

    #[test]
    fn test_new_schedule_rejects_inactive_vaccine() {
        let engine = DoseRuleEngine::new();
        assert!(engine.check_new_schedule(&vaccine(2, true), 2).is_ok());
        assert!(matches!(
            engine.check_new_schedule(&vaccine(2, true), 3),
            Err(DoseRuleViolation::DoseNumberExceedsTotal { .. })
        ));
        assert!(matches!(
            engine.check_new_schedule(&vaccine(2, false), 1),
            Err(DoseRuleViolation::VaccineInactive { .. })
        ));
    }

    #[test]
    fn test_administration_input() {
        let engine = DoseRuleEngine::new();
        let today = d(2026, 10, 17);
        let mut input = AdministrationInput {
            lot_number: "HB-01",
            administration_site: "left deltoid",
            route: "IM",
            administered_date: today,
        };
        assert!(engine.check_administration_input(&input, today).is_ok());

        input.route = "  ";
        assert_eq!(
            engine.check_administration_input(&input, today),
            Err(DoseRuleViolation::EmptyField("route"))
        );

        input.route = "IM";
        input.administered_date = d(2026, 10, 18);
        assert!(matches!(
            engine.check_administration_input(&input, today),
            Err(DoseRuleViolation::AdministeredDateInFuture { .. })
        ));
    }
}
