// ==========================================
// 免疫接种排程系统 - 剂次排程领域模型
// ==========================================
// 职责: 患者 × 疫苗 × 剂次 的排程条目及接种记录
// 红线: consumed_lot_ref 当且仅当 state == Administered 时有值
// ==========================================

use crate::domain::types::DoseState;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// DoseSchedule - 剂次排程条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseSchedule {
    // ===== 主键 =====
    pub schedule_id: String,
    pub schedule_code: String, // VSCH{yymmdd}{nnnn}

    // ===== 引用（纯标识符，不持有对象） =====
    pub patient_id: String,
    pub vaccine_id: String,

    // ===== 排程 =====
    pub dose_number: i32,
    pub scheduled_date: NaiveDate,
    pub state: DoseState,

    // ===== 接种信息（仅 Administered 时有值） =====
    pub administered_date: Option<NaiveDate>,
    pub administering_doctor_id: Option<String>,
    pub consumed_lot_ref: Option<String>,
    pub administration_site: Option<String>,
    pub route: Option<String>,
    pub adverse_reactions: Option<String>,

    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DoseSchedule {
    pub fn is_administered(&self) -> bool {
        self.state == DoseState::Administered
    }

    /// 状态与接种字段是否一致
    pub fn administration_fields_consistent(&self) -> bool {
        match self.state {
            DoseState::Administered => {
                self.consumed_lot_ref.is_some() && self.administered_date.is_some()
            }
            _ => self.consumed_lot_ref.is_none() && self.administered_date.is_none(),
        }
    }
}

// ==========================================
// AdministrationRecord - 接种落账信息
// ==========================================
/// 状态机 Scheduled → Administered 时写入排程条目的字段集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrationRecord {
    pub administered_date: NaiveDate,
    pub administering_doctor_id: String,
    pub consumed_lot_ref: String,
    pub administration_site: String,
    pub route: String,
    pub adverse_reactions: Option<String>,
}

// ==========================================
// 批量排程
// ==========================================

/// 批量排程单项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkScheduleItem {
    pub vaccine_id: String,
    pub dose_number: i32,
    pub scheduled_date: NaiveDate,
}

/// 批量排程单项失败原因
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemError {
    pub index: usize,
    pub vaccine_id: String,
    pub dose_number: i32,
    pub reason: String,
}

/// 批量排程结果（逐项隔离失败）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkCreateResult {
    pub created: Vec<DoseSchedule>,
    pub errors: Vec<BulkItemError>,
    pub created_count: usize,
    pub error_count: usize,
}

// ==========================================
// ScheduleSearch - 排程检索条件
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSearch {
    pub patient_id: Option<String>,
    pub vaccine_id: Option<String>,
    pub doctor_id: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// None 时排除 Cancelled
    pub state: Option<DoseState>,
    pub dose_number: Option<i32>,
}
