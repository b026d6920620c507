// ==========================================
// 免疫接种排程系统 - 剂次排程 API
// ==========================================
// 职责: 排程创建（单条/批量）、改期、逻辑删除、备注、检索
// 红线: 先校验后写入；非 SCHEDULED 条目不可改期/删除
// ==========================================

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::schedule::{
    BulkCreateResult, BulkItemError, BulkScheduleItem, DoseSchedule, ScheduleSearch,
};
use crate::domain::types::DoseState;
use crate::engine::clock::Clock;
use crate::engine::directory::PatientDirectory;
use crate::engine::dose_rules::DoseRuleEngine;
use crate::repository::schedule_repo::DoseScheduleRepository;
use crate::repository::vaccine_repo::VaccineRepository;

/// 单次检索的最大条数
pub const MAX_SEARCH_LIMIT: i64 = 1000;

/// 分页参数校验: limit ∈ 1..=MAX_SEARCH_LIMIT，offset >= 0
pub(crate) fn validate_paging(limit: Option<i64>, offset: Option<i64>) -> ApiResult<()> {
    if let Some(limit) = limit {
        if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
            return Err(ApiError::ValidationError(format!(
                "limit 必须在 1..={} 之间: {}",
                MAX_SEARCH_LIMIT, limit
            )));
        }
    }
    if offset.map_or(false, |o| o < 0) {
        return Err(ApiError::ValidationError("offset 不能为负数".to_string()));
    }
    Ok(())
}

// ==========================================
// ScheduleApi - 剂次排程 API
// ==========================================
pub struct ScheduleApi {
    schedule_repo: Arc<DoseScheduleRepository>,
    vaccine_repo: Arc<VaccineRepository>,
    patients: Arc<dyn PatientDirectory>,
    clock: Arc<dyn Clock>,
    rules: DoseRuleEngine,
}

impl ScheduleApi {
    pub fn new(
        schedule_repo: Arc<DoseScheduleRepository>,
        vaccine_repo: Arc<VaccineRepository>,
        patients: Arc<dyn PatientDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedule_repo,
            vaccine_repo,
            patients,
            clock,
            rules: DoseRuleEngine::new(),
        }
    }

    fn ensure_patient(&self, patient_id: &str) -> ApiResult<()> {
        if patient_id.trim().is_empty() {
            return Err(ApiError::ValidationError("患者ID不能为空".to_string()));
        }
        if !self.patients.patient_exists(patient_id) {
            return Err(ApiError::not_found("Patient", patient_id));
        }
        Ok(())
    }

    /// 校验并写入一条排程（患者已校验）
    fn create_for_known_patient(
        &self,
        patient_id: &str,
        vaccine_id: &str,
        dose_number: i32,
        scheduled_date: NaiveDate,
        notes: Option<String>,
    ) -> ApiResult<DoseSchedule> {
        // 1. 纯输入校验（不依赖目录）
        if dose_number < 1 {
            return Err(ApiError::ValidationError(format!(
                "剂次必须 >= 1: {}",
                dose_number
            )));
        }

        // 2. 疫苗存在性 + 剂次上限
        let vaccine = self
            .vaccine_repo
            .find_by_id(vaccine_id)?
            .ok_or_else(|| ApiError::not_found("Vaccine", vaccine_id))?;
        self.rules.check_new_schedule(&vaccine, dose_number)?;

        // 3. 编码分配与写入在同一事务内
        let now = self.clock.now();
        let mut schedule = DoseSchedule {
            schedule_id: Uuid::new_v4().to_string(),
            schedule_code: String::new(),
            patient_id: patient_id.to_string(),
            vaccine_id: vaccine.vaccine_id.clone(),
            dose_number,
            scheduled_date,
            state: DoseState::Scheduled,
            administered_date: None,
            administering_doctor_id: None,
            consumed_lot_ref: None,
            administration_site: None,
            route: None,
            adverse_reactions: None,
            notes,
            created_at: now,
            updated_at: now,
        };
        self.schedule_repo
            .insert_with_next_code(&mut schedule, self.clock.today())?;
        Ok(schedule)
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 创建单条排程
    ///
    /// # 返回
    /// - Err(ValidationError): 剂次 < 1 / 超出总剂次 / 疫苗停用
    /// - Err(NotFound): 患者或疫苗不存在
    pub fn create_schedule(
        &self,
        patient_id: &str,
        vaccine_id: &str,
        dose_number: i32,
        scheduled_date: NaiveDate,
        notes: Option<String>,
    ) -> ApiResult<DoseSchedule> {
        self.ensure_patient(patient_id)?;
        let schedule =
            self.create_for_known_patient(patient_id, vaccine_id, dose_number, scheduled_date, notes)?;

        info!(
            schedule_id = %schedule.schedule_id,
            schedule_code = %schedule.schedule_code,
            patient_id,
            vaccine_id,
            dose_number,
            "排程已创建"
        );
        Ok(schedule)
    }

    /// 批量创建排程
    ///
    /// 每项独立校验，失败项进入 errors，不影响其他项。
    /// 患者不存在时整批失败（NotFound）。
    pub fn bulk_create(
        &self,
        patient_id: &str,
        items: &[BulkScheduleItem],
    ) -> ApiResult<BulkCreateResult> {
        self.ensure_patient(patient_id)?;

        let mut result = BulkCreateResult::default();
        for (index, item) in items.iter().enumerate() {
            match self.create_for_known_patient(
                patient_id,
                &item.vaccine_id,
                item.dose_number,
                item.scheduled_date,
                None,
            ) {
                Ok(schedule) => result.created.push(schedule),
                Err(e) => {
                    debug!(index, vaccine_id = %item.vaccine_id, error = %e, "批量排程单项失败");
                    result.errors.push(BulkItemError {
                        index,
                        vaccine_id: item.vaccine_id.clone(),
                        dose_number: item.dose_number,
                        reason: e.to_string(),
                    });
                }
            }
        }
        result.created_count = result.created.len();
        result.error_count = result.errors.len();

        info!(
            patient_id,
            created = result.created_count,
            failed = result.error_count,
            "批量排程完成"
        );
        Ok(result)
    }

    // ==========================================
    // 修改
    // ==========================================

    /// 读取条目并要求处于 SCHEDULED
    fn load_scheduled(&self, schedule_id: &str, attempted: &str) -> ApiResult<DoseSchedule> {
        let schedule = self.get_schedule(schedule_id)?;
        if schedule.state != DoseState::Scheduled {
            warn!(schedule_id, current = %schedule.state, attempted, "状态冲突");
            return Err(ApiError::state_conflict(schedule.state, attempted));
        }
        Ok(schedule)
    }

    /// 条件更新未命中时，按当前状态给出冲突原因
    fn conflict_after_race(&self, schedule_id: &str, attempted: &str) -> ApiError {
        match self.get_schedule(schedule_id) {
            Ok(current) => ApiError::state_conflict(current.state, attempted),
            Err(e) => e,
        }
    }

    /// 改期（仅 SCHEDULED，新日期可早于今天）
    pub fn reschedule(&self, schedule_id: &str, new_date: NaiveDate) -> ApiResult<DoseSchedule> {
        let schedule = self.load_scheduled(schedule_id, "RESCHEDULE")?;

        if !self
            .schedule_repo
            .update_scheduled_date(schedule_id, new_date, self.clock.now())?
        {
            return Err(self.conflict_after_race(schedule_id, "RESCHEDULE"));
        }

        info!(
            schedule_id,
            from = %schedule.scheduled_date,
            to = %new_date,
            "排程已改期"
        );
        self.get_schedule(schedule_id)
    }

    /// 逻辑删除（SCHEDULED → CANCELLED）
    ///
    /// 已接种条目需先撤销接种；已取消条目不可重复删除
    pub fn remove_schedule(&self, schedule_id: &str) -> ApiResult<()> {
        self.load_scheduled(schedule_id, "REMOVE")?;
        if !self
            .schedule_repo
            .mark_cancelled(schedule_id, self.clock.now())?
        {
            return Err(self.conflict_after_race(schedule_id, "REMOVE"));
        }
        info!(schedule_id, "排程已删除");
        Ok(())
    }

    /// 更新备注（CANCELLED 除外）
    pub fn update_notes(&self, schedule_id: &str, notes: Option<String>) -> ApiResult<DoseSchedule> {
        let schedule = self.get_schedule(schedule_id)?;
        if schedule.state == DoseState::Cancelled {
            return Err(ApiError::state_conflict(schedule.state, "UPDATE_NOTES"));
        }
        let notes = notes.filter(|n| !n.trim().is_empty());
        if !self
            .schedule_repo
            .update_notes(schedule_id, notes.as_deref(), self.clock.now())?
        {
            return Err(self.conflict_after_race(schedule_id, "UPDATE_NOTES"));
        }
        debug!(schedule_id, "备注已更新");
        self.get_schedule(schedule_id)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按ID查询（含 CANCELLED）
    pub fn get_schedule(&self, schedule_id: &str) -> ApiResult<DoseSchedule> {
        if schedule_id.trim().is_empty() {
            return Err(ApiError::ValidationError("排程ID不能为空".to_string()));
        }
        self.schedule_repo
            .find_by_id(schedule_id)?
            .ok_or_else(|| ApiError::not_found("DoseSchedule", schedule_id))
    }

    /// 按排程编码查询（CANCELLED 条目不可见）
    pub fn get_by_code(&self, schedule_code: &str) -> ApiResult<DoseSchedule> {
        if schedule_code.trim().is_empty() {
            return Err(ApiError::ValidationError("排程编码不能为空".to_string()));
        }
        self.schedule_repo
            .find_by_code(schedule_code)?
            .ok_or_else(|| ApiError::not_found("DoseSchedule", schedule_code))
    }

    /// 条件检索，按 scheduled_date 倒序
    pub fn search(
        &self,
        filter: &ScheduleSearch,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ApiResult<Vec<DoseSchedule>> {
        validate_paging(limit, offset)?;
        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(ApiError::ValidationError(format!(
                    "开始日期不能晚于结束日期: {} > {}",
                    from, to
                )));
            }
        }
        Ok(self.schedule_repo.search(filter, limit, offset)?)
    }

    /// 患者的全部未取消条目（日期升序）
    pub fn list_by_patient(&self, patient_id: &str) -> ApiResult<Vec<DoseSchedule>> {
        Ok(self.schedule_repo.find_by_patient(patient_id)?)
    }

    /// 疫苗的全部未取消条目（日期升序）
    pub fn list_by_vaccine(&self, vaccine_id: &str) -> ApiResult<Vec<DoseSchedule>> {
        Ok(self.schedule_repo.find_by_vaccine(vaccine_id)?)
    }
}
