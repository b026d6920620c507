// ==========================================
// 免疫接种排程系统 - 疫苗目录领域模型
// ==========================================
// 职责: 疫苗参考数据（总剂次、加强针策略、推荐月龄）
// 红线: 目录数据只读于核心流程，由目录管理维护
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Vaccine - 疫苗
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vaccine {
    // ===== 主键 =====
    pub vaccine_id: String,
    pub vaccine_code: String, // VAC0001

    // ===== 基本信息 =====
    pub vaccine_name: String,
    pub manufacturer: Option<String>,
    pub description: Option<String>,

    // ===== 接种策略 =====
    pub total_doses_required: i32,             // 基础免疫总剂次 (>= 1)
    pub booster_required: bool,                // 是否需要加强针
    pub booster_interval_months: Option<i32>,  // 加强针间隔（月）
    pub recommended_age_months: Option<i32>,   // 推荐接种月龄

    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Vaccine {
    /// 剂次号是否在本疫苗允许范围内 (1..=total_doses_required)
    pub fn accepts_dose_number(&self, dose_number: i32) -> bool {
        dose_number >= 1 && dose_number <= self.total_doses_required
    }
}

/// 新建疫苗参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVaccine {
    pub vaccine_name: String,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub total_doses_required: i32,
    pub booster_required: bool,
    pub booster_interval_months: Option<i32>,
    pub recommended_age_months: Option<i32>,
}

/// 疫苗更新参数（None 表示不修改）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaccineUpdate {
    pub vaccine_name: Option<String>,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub total_doses_required: Option<i32>,
    pub booster_required: Option<bool>,
    pub booster_interval_months: Option<i32>,
    pub recommended_age_months: Option<i32>,
    pub is_active: Option<bool>,
}

/// 疫苗检索条件（名称 / 厂商为不区分大小写的子串匹配）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaccineSearch {
    pub vaccine_name: Option<String>,
    pub manufacturer: Option<String>,
    pub is_active: Option<bool>,
}
