// ==========================================
// 免疫接种排程系统 - 接种状态聚合引擎
// ==========================================
// 职责: 由排程条目推导患者接种进度、即将到期、逾期、日历视图
// 红线: Engine 不拼 SQL；只读，不修改任何条目
// 输入: DoseSchedule 列表 + 疫苗目录 + today
// ==========================================

use crate::domain::schedule::DoseSchedule;
use crate::domain::types::DoseState;
use crate::domain::vaccine::Vaccine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

/// 百分比，保留两位小数；total <= 0 时为 0
pub fn percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ==========================================
// 输出结构
// ==========================================

/// 下一剂
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextDose {
    pub schedule_id: String,
    pub dose_number: i32,
    pub scheduled_date: NaiveDate,
}

/// 单个疫苗的接种进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccineProgress {
    pub vaccine_id: String,
    pub vaccine_name: String,
    pub total_doses_required: i32,
    pub doses_administered: i64,
    pub is_complete: bool,
    pub completion_pct: f64,
    pub next_dose: Option<NextDose>,
    pub last_administered_date: Option<NaiveDate>,
}

/// 患者接种状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientVaccinationStatus {
    pub patient_id: String,
    pub as_of: NaiveDate,
    pub vaccines: Vec<VaccineProgress>,
    pub completed_vaccines: usize,
}

/// 即将到期 / 逾期提醒
///
/// days_until_due: 即将到期 >= 0，逾期 < 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueDoseAlert {
    pub schedule_id: String,
    pub schedule_code: String,
    pub patient_id: String,
    pub vaccine_id: String,
    pub vaccine_name: String,
    pub dose_number: i32,
    pub scheduled_date: NaiveDate,
    pub days_until_due: i64,
}

/// 日历事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub schedule_code: String,
    pub patient_id: String,
    pub vaccine_id: String,
    pub vaccine_name: String,
    pub dose_number: i32,
    pub scheduled_date: NaiveDate,
    pub state: DoseState,
    pub is_administered: bool,
}

// ==========================================
// StatusAggregator - 接种状态聚合引擎
// ==========================================
#[derive(Debug, Default)]
pub struct StatusAggregator;

impl StatusAggregator {
    pub fn new() -> Self {
        Self
    }

    /// 患者接种状态
    ///
    /// # 参数
    /// - schedules: 该患者的排程条目（CANCELLED 会被忽略）
    /// - vaccines: vaccine_id → Vaccine；目录中不存在的疫苗不参与统计
    /// - today: 判定 next_dose 的基准日
    #[instrument(skip(self, schedules, vaccines), fields(count = schedules.len()))]
    pub fn patient_status(
        &self,
        patient_id: &str,
        schedules: &[DoseSchedule],
        vaccines: &HashMap<String, Vaccine>,
        today: NaiveDate,
    ) -> PatientVaccinationStatus {
        // BTreeMap 保证输出顺序稳定
        let mut grouped: BTreeMap<&str, Vec<&DoseSchedule>> = BTreeMap::new();
        for schedule in schedules.iter().filter(|s| s.state != DoseState::Cancelled) {
            grouped
                .entry(schedule.vaccine_id.as_str())
                .or_default()
                .push(schedule);
        }

        let mut progress = Vec::with_capacity(grouped.len());
        for (vaccine_id, entries) in grouped {
            let vaccine = match vaccines.get(vaccine_id) {
                Some(v) => v,
                None => {
                    debug!(vaccine_id, "疫苗不在目录中，跳过");
                    continue;
                }
            };
            progress.push(self.vaccine_progress(vaccine, &entries, today));
        }
        progress.sort_by(|a, b| {
            a.vaccine_name
                .cmp(&b.vaccine_name)
                .then_with(|| a.vaccine_id.cmp(&b.vaccine_id))
        });

        let completed_vaccines = progress.iter().filter(|p| p.is_complete).count();
        PatientVaccinationStatus {
            patient_id: patient_id.to_string(),
            as_of: today,
            vaccines: progress,
            completed_vaccines,
        }
    }

    fn vaccine_progress(
        &self,
        vaccine: &Vaccine,
        entries: &[&DoseSchedule],
        today: NaiveDate,
    ) -> VaccineProgress {
        let administered: Vec<&&DoseSchedule> =
            entries.iter().filter(|s| s.is_administered()).collect();
        let doses_administered = administered.len() as i64;
        let total = vaccine.total_doses_required as i64;

        let next_dose = entries
            .iter()
            .filter(|s| s.state == DoseState::Scheduled && s.scheduled_date >= today)
            .min_by(|a, b| {
                a.scheduled_date
                    .cmp(&b.scheduled_date)
                    .then_with(|| a.dose_number.cmp(&b.dose_number))
            })
            .map(|s| NextDose {
                schedule_id: s.schedule_id.clone(),
                dose_number: s.dose_number,
                scheduled_date: s.scheduled_date,
            });

        let last_administered_date = administered
            .iter()
            .filter_map(|s| s.administered_date)
            .max();

        VaccineProgress {
            vaccine_id: vaccine.vaccine_id.clone(),
            vaccine_name: vaccine.vaccine_name.clone(),
            total_doses_required: vaccine.total_doses_required,
            doses_administered,
            is_complete: doses_administered >= total,
            completion_pct: percentage(doses_administered, total),
            next_dose,
            last_administered_date,
        }
    }

    /// 投影为到期提醒（即将到期或逾期），保持输入顺序
    pub fn due_alerts(
        &self,
        schedules: &[DoseSchedule],
        vaccine_names: &HashMap<String, String>,
        today: NaiveDate,
    ) -> Vec<DueDoseAlert> {
        schedules
            .iter()
            .filter(|s| s.state == DoseState::Scheduled)
            .map(|s| DueDoseAlert {
                schedule_id: s.schedule_id.clone(),
                schedule_code: s.schedule_code.clone(),
                patient_id: s.patient_id.clone(),
                vaccine_id: s.vaccine_id.clone(),
                vaccine_name: lookup_name(vaccine_names, &s.vaccine_id),
                dose_number: s.dose_number,
                scheduled_date: s.scheduled_date,
                days_until_due: (s.scheduled_date - today).num_days(),
            })
            .collect()
    }

    /// 投影为日历事件（CANCELLED 不出现）
    pub fn calendar_events(
        &self,
        schedules: &[DoseSchedule],
        vaccine_names: &HashMap<String, String>,
    ) -> Vec<CalendarEvent> {
        schedules
            .iter()
            .filter(|s| s.state != DoseState::Cancelled)
            .map(|s| CalendarEvent {
                id: s.schedule_id.clone(),
                schedule_code: s.schedule_code.clone(),
                patient_id: s.patient_id.clone(),
                vaccine_id: s.vaccine_id.clone(),
                vaccine_name: lookup_name(vaccine_names, &s.vaccine_id),
                dose_number: s.dose_number,
                scheduled_date: s.scheduled_date,
                state: s.state,
                is_administered: s.is_administered(),
            })
            .collect()
    }
}

fn lookup_name(names: &HashMap<String, String>, vaccine_id: &str) -> String {
    names
        .get(vaccine_id)
        .cloned()
        .unwrap_or_else(|| vaccine_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn vaccine(id: &str, name: &str, total: i32) -> Vaccine {
        let ts = d(2026, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        Vaccine {
            vaccine_id: id.to_string(),
            vaccine_code: format!("VAC-{}", id),
            vaccine_name: name.to_string(),
            manufacturer: None,
            description: None,
            total_doses_required: total,
            booster_required: false,
            booster_interval_months: None,
            recommended_age_months: None,
            is_active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn entry(id: &str, vaccine_id: &str, dose: i32, date: NaiveDate, state: DoseState) -> DoseSchedule {
        let ts = d(2026, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        let administered = state == DoseState::Administered;
        DoseSchedule {
            schedule_id: id.to_string(),
            schedule_code: format!("C-{}", id),
            patient_id: "p1".to_string(),
            vaccine_id: vaccine_id.to_string(),
            dose_number: dose,
            scheduled_date: date,
            state,
            administered_date: if administered { Some(date) } else { None },
            administering_doctor_id: None,
            consumed_lot_ref: if administered { Some("lot".to_string()) } else { None },
            administration_site: None,
            route: None,
            adverse_reactions: None,
            notes: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(3, 3), 100.0);
        assert_eq!(percentage(1, 0), 0.0);
    }

    #[test]
    fn test_patient_status_groups_by_vaccine() {
        let today = d(2026, 6, 1);
        let mut catalog = HashMap::new();
        catalog.insert("hb".to_string(), vaccine("hb", "Hepatitis B", 3));
        catalog.insert("mmr".to_string(), vaccine("mmr", "MMR", 1));

        let schedules = vec![
            entry("1", "hb", 1, d(2026, 1, 10), DoseState::Administered),
            entry("2", "hb", 2, d(2026, 3, 10), DoseState::Administered),
            entry("3", "hb", 3, d(2026, 7, 10), DoseState::Scheduled),
            entry("4", "mmr", 1, d(2026, 2, 1), DoseState::Administered),
            entry("5", "mmr", 1, d(2026, 8, 1), DoseState::Cancelled),
            entry("6", "gone", 1, d(2026, 8, 1), DoseState::Scheduled),
        ];

        let status = StatusAggregator::new().patient_status("p1", &schedules, &catalog, today);
        assert_eq!(status.vaccines.len(), 2);
        assert_eq!(status.completed_vaccines, 1);

        let hb = &status.vaccines[0];
        assert_eq!(hb.vaccine_name, "Hepatitis B");
        assert_eq!(hb.doses_administered, 2);
        assert!(!hb.is_complete);
        assert_eq!(hb.completion_pct, 66.67);
        assert_eq!(hb.next_dose.as_ref().map(|n| n.dose_number), Some(3));
        assert_eq!(hb.last_administered_date, Some(d(2026, 3, 10)));

        let mmr = &status.vaccines[1];
        assert!(mmr.is_complete);
        assert_eq!(mmr.completion_pct, 100.0);
        assert!(mmr.next_dose.is_none());
    }

    #[test]
    fn test_next_dose_tie_breaks_on_lowest_dose_number() {
        let today = d(2026, 6, 1);
        let mut catalog = HashMap::new();
        catalog.insert("hb".to_string(), vaccine("hb", "Hepatitis B", 3));
        let same_day = d(2026, 6, 5);
        let schedules = vec![
            entry("a", "hb", 3, same_day, DoseState::Scheduled),
            entry("b", "hb", 2, same_day, DoseState::Scheduled),
            // 逾期条目不是 next_dose
            entry("c", "hb", 1, d(2026, 5, 1), DoseState::Scheduled),
        ];

        let status = StatusAggregator::new().patient_status("p1", &schedules, &catalog, today);
        let next = status.vaccines[0].next_dose.clone().unwrap();
        assert_eq!(next.schedule_id, "b");
        assert_eq!(next.dose_number, 2);
    }

    #[test]
    fn test_due_alerts_and_calendar_projection() {
        let today = d(2026, 6, 1);
        let names: HashMap<String, String> =
            [("hb".to_string(), "Hepatitis B".to_string())].into_iter().collect();
        let schedules = vec![
            entry("1", "hb", 1, d(2026, 5, 29), DoseState::Scheduled),
            entry("2", "hb", 2, d(2026, 6, 4), DoseState::Scheduled),
            entry("3", "hb", 3, d(2026, 6, 4), DoseState::Administered),
            entry("4", "hb", 3, d(2026, 6, 4), DoseState::Cancelled),
        ];

        let aggregator = StatusAggregator::new();
        let alerts = aggregator.due_alerts(&schedules, &names, today);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].days_until_due, -3);
        assert_eq!(alerts[1].days_until_due, 3);
        assert_eq!(alerts[1].vaccine_name, "Hepatitis B");

        let events = aggregator.calendar_events(&schedules, &names);
        assert_eq!(events.len(), 3);
        assert!(events[2].is_administered);
        assert_eq!(events[2].state, DoseState::Administered);
    }
}
