// ==========================================
// 免疫接种排程系统 - 接种状态 API
// ==========================================
// 职责: 患者接种进度、即将到期/逾期提醒、日历视图
// 说明: 只读，不开事务，容忍短暂的读旧
// ==========================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::domain::vaccine::Vaccine;
use crate::engine::clock::Clock;
use crate::engine::status::{CalendarEvent, DueDoseAlert, PatientVaccinationStatus, StatusAggregator};
use crate::repository::schedule_repo::DoseScheduleRepository;
use crate::repository::vaccine_repo::VaccineRepository;

// ==========================================
// StatusApi - 接种状态 API
// ==========================================
pub struct StatusApi {
    schedule_repo: Arc<DoseScheduleRepository>,
    vaccine_repo: Arc<VaccineRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
    aggregator: StatusAggregator,
}

impl StatusApi {
    pub fn new(
        schedule_repo: Arc<DoseScheduleRepository>,
        vaccine_repo: Arc<VaccineRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedule_repo,
            vaccine_repo,
            config,
            clock,
            aggregator: StatusAggregator::new(),
        }
    }

    fn vaccine_names(&self) -> ApiResult<HashMap<String, String>> {
        Ok(self
            .vaccine_repo
            .find_all()?
            .into_iter()
            .map(|v| (v.vaccine_id, v.vaccine_name))
            .collect())
    }

    /// 患者接种状态
    pub fn patient_vaccination_status(&self, patient_id: &str) -> ApiResult<PatientVaccinationStatus> {
        if patient_id.trim().is_empty() {
            return Err(ApiError::ValidationError("患者ID不能为空".to_string()));
        }
        let schedules = self.schedule_repo.find_by_patient(patient_id)?;
        let catalog: HashMap<String, Vaccine> = self
            .vaccine_repo
            .find_all()?
            .into_iter()
            .map(|v| (v.vaccine_id.clone(), v))
            .collect();

        let status = self.aggregator.patient_status(
            patient_id,
            &schedules,
            &catalog,
            self.clock.today(),
        );
        debug!(
            patient_id,
            vaccines = status.vaccines.len(),
            completed = status.completed_vaccines,
            "患者接种状态已汇总"
        );
        Ok(status)
    }

    /// 即将到期: scheduled_date ∈ [today, today + window_days]
    ///
    /// # 参数
    /// - window_days: None 时取配置默认值；必须在 [1, 配置上限] 内
    pub fn upcoming(&self, window_days: Option<i64>) -> ApiResult<Vec<DueDoseAlert>> {
        let config_err = |e: Box<dyn std::error::Error>| {
            ApiError::InternalError(format!("读取配置失败: {}", e))
        };
        let max = self.config.get_upcoming_window_days_max().map_err(config_err)?;
        let days = match window_days {
            Some(d) => d,
            None => self
                .config
                .get_upcoming_window_days_default()
                .map_err(config_err)?,
        };
        if days < 1 || days > max {
            return Err(ApiError::ValidationError(format!(
                "提醒窗口必须在 1..={} 天之间: {}",
                max, days
            )));
        }

        let today = self.clock.today();
        let until = today.checked_add_days(Days::new(days as u64)).ok_or_else(|| {
            ApiError::ValidationError(format!("提醒窗口超出日期范围: {} 天", days))
        })?;
        let schedules = self.schedule_repo.find_scheduled_between(today, until)?;
        Ok(self
            .aggregator
            .due_alerts(&schedules, &self.vaccine_names()?, today))
    }

    /// 逾期: SCHEDULED 且 scheduled_date < today，days_until_due 为负
    pub fn overdue(&self) -> ApiResult<Vec<DueDoseAlert>> {
        let today = self.clock.today();
        let schedules = self.schedule_repo.find_scheduled_before(today)?;
        Ok(self
            .aggregator
            .due_alerts(&schedules, &self.vaccine_names()?, today))
    }

    /// 日历事件: [start, end] 内未删除的条目
    pub fn calendar_events(&self, start: NaiveDate, end: NaiveDate) -> ApiResult<Vec<CalendarEvent>> {
        if start > end {
            return Err(ApiError::ValidationError(format!(
                "开始日期不能晚于结束日期: {} > {}",
                start, end
            )));
        }
        let schedules = self
            .schedule_repo
            .find_active_in_range(Some(start), Some(end))?;
        Ok(self
            .aggregator
            .calendar_events(&schedules, &self.vaccine_names()?))
    }
}
