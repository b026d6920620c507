// ==========================================
// 免疫接种排程系统 - 接种协调 API
// ==========================================
// 职责: 接种落账 / 撤销接种（剂次状态机 × 库存扣减/回补）
// 红线: 库存变更与状态变更在同一个 BEGIN IMMEDIATE 事务内，要么都提交要么都不提交
// 红线: 撤销时只回补 consumed_lot_ref 指向的批次
// ==========================================
// 状态机:
//   SCHEDULED --administer--> ADMINISTERED
//   ADMINISTERED --cancel_administration--> SCHEDULED
// ==========================================

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::schedule::{AdministrationRecord, DoseSchedule};
use crate::domain::types::DoseState;
use crate::engine::clock::Clock;
use crate::engine::directory::DoctorDirectory;
use crate::engine::dose_rules::{AdministrationInput, DoseRuleEngine};
use crate::repository::error::RepositoryError;
use crate::repository::inventory_repo::InventoryLotRepository;
use crate::repository::schedule_repo::DoseScheduleRepository;

/// 接种请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdministerRequest {
    pub doctor_id: String,
    pub lot_number: String,
    pub administration_site: String,
    pub route: String,
    pub administered_date: NaiveDate,
    pub adverse_reactions: Option<String>,
}

// ==========================================
// AdministrationApi - 接种协调 API
// ==========================================
pub struct AdministrationApi {
    conn: Arc<Mutex<Connection>>,
    doctors: Arc<dyn DoctorDirectory>,
    clock: Arc<dyn Clock>,
    rules: DoseRuleEngine,
}

impl AdministrationApi {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        doctors: Arc<dyn DoctorDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            conn,
            doctors,
            clock,
            rules: DoseRuleEngine::new(),
        }
    }

    fn lock_conn(&self) -> ApiResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()).into())
    }

    /// 接种落账
    ///
    /// 顺序: 输入校验 → 医生存在性 → (事务) 读取条目 → 状态检查 → 定位批次 → 扣减 → 写入接种信息
    ///
    /// # 返回
    /// - Ok(DoseSchedule): 已接种的条目（consumed_lot_ref 指向被扣减的批次）
    /// - Err(ValidationError): 批号/部位/途径为空，或接种日期晚于今天
    /// - Err(NotFound): 条目或医生不存在
    /// - Err(StateConflict): 条目不是 SCHEDULED（无任何副作用）
    /// - Err(ResourceExhausted): 无可用批次或库存不足
    pub fn administer(&self, schedule_id: &str, req: &AdministerRequest) -> ApiResult<DoseSchedule> {
        let today = self.clock.today();

        // 1. 输入校验
        self.rules.check_administration_input(
            &AdministrationInput {
                lot_number: &req.lot_number,
                administration_site: &req.administration_site,
                route: &req.route,
                administered_date: req.administered_date,
            },
            today,
        )?;
        if req.doctor_id.trim().is_empty() {
            return Err(ApiError::ValidationError("医生ID不能为空".to_string()));
        }
        if !self.doctors.doctor_exists(&req.doctor_id) {
            return Err(ApiError::not_found("Doctor", &req.doctor_id));
        }

        // 2. 事务: 写锁在 BEGIN 时获取，并发接种在此串行化
        let now = self.clock.now();
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;

        let schedule = DoseScheduleRepository::find_by_id_tx(&tx, schedule_id)?
            .ok_or_else(|| ApiError::not_found("DoseSchedule", schedule_id))?;
        if schedule.state != DoseState::Scheduled {
            warn!(schedule_id, current = %schedule.state, "接种被拒绝: 状态冲突");
            return Err(ApiError::state_conflict(schedule.state, "ADMINISTER"));
        }

        let lot_number = req.lot_number.trim();
        let lot = InventoryLotRepository::find_consumable_tx(
            &tx,
            &schedule.vaccine_id,
            lot_number,
            today,
        )?
        .ok_or_else(|| {
            ApiError::ResourceExhausted(format!(
                "疫苗{}批号{}无可用库存或已过期",
                schedule.vaccine_id, lot_number
            ))
        })?;

        InventoryLotRepository::consume_tx(&tx, &lot.lot_id, 1, now)?;

        let record = AdministrationRecord {
            administered_date: req.administered_date,
            administering_doctor_id: req.doctor_id.clone(),
            consumed_lot_ref: lot.lot_id.clone(),
            administration_site: req.administration_site.trim().to_string(),
            route: req.route.trim().to_string(),
            adverse_reactions: req
                .adverse_reactions
                .clone()
                .filter(|r| !r.trim().is_empty()),
        };
        if !DoseScheduleRepository::mark_administered_tx(&tx, schedule_id, &record, now)? {
            return Err(ApiError::state_conflict(schedule.state, "ADMINISTER"));
        }

        let administered = DoseScheduleRepository::find_by_id_tx(&tx, schedule_id)?
            .ok_or_else(|| ApiError::InternalError(format!("接种后条目丢失: {}", schedule_id)))?;
        tx.commit().map_err(RepositoryError::from)?;

        info!(
            schedule_id,
            lot_id = %lot.lot_id,
            lot_number,
            doctor_id = %req.doctor_id,
            "接种已落账"
        );
        Ok(administered)
    }

    /// 撤销接种
    ///
    /// 回补 consumed_lot_ref 指向的批次 1 支，条目回到 SCHEDULED 并清空接种信息
    ///
    /// # 返回
    /// - Err(NotFound): 条目不存在
    /// - Err(StateConflict): 条目不是 ADMINISTERED
    pub fn cancel_administration(&self, schedule_id: &str) -> ApiResult<DoseSchedule> {
        let now = self.clock.now();
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;

        let schedule = DoseScheduleRepository::find_by_id_tx(&tx, schedule_id)?
            .ok_or_else(|| ApiError::not_found("DoseSchedule", schedule_id))?;
        if schedule.state != DoseState::Administered {
            warn!(schedule_id, current = %schedule.state, "撤销被拒绝: 尚未接种");
            return Err(ApiError::state_conflict(
                schedule.state,
                "CANCEL_ADMINISTRATION",
            ));
        }

        let lot_id = schedule.consumed_lot_ref.clone().ok_or_else(|| {
            ApiError::InternalError(format!("已接种条目缺少批次引用: {}", schedule_id))
        })?;

        InventoryLotRepository::restore_tx(&tx, &lot_id, 1, now)?;
        if !DoseScheduleRepository::reset_administration_tx(&tx, schedule_id, now)? {
            return Err(ApiError::state_conflict(
                schedule.state,
                "CANCEL_ADMINISTRATION",
            ));
        }

        let reset = DoseScheduleRepository::find_by_id_tx(&tx, schedule_id)?
            .ok_or_else(|| ApiError::InternalError(format!("撤销后条目丢失: {}", schedule_id)))?;
        tx.commit().map_err(RepositoryError::from)?;

        info!(schedule_id, lot_id = %lot_id, "接种已撤销");
        Ok(reset)
    }
}
