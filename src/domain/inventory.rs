// ==========================================
// 免疫接种排程系统 - 疫苗库存批次领域模型
// ==========================================
// 职责: 批次（批号/效期/可用量/已用量）
// 红线: quantity_available >= 0
// 红线: 数量只通过 consume/restore 变更（补货事件除外）
// ==========================================

use crate::domain::types::LotAlertStatus;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// InventoryLot - 库存批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryLot {
    // ===== 主键 =====
    pub lot_id: String,
    pub vaccine_id: String,

    // ===== 批次标识 =====
    pub lot_number: String,
    pub batch_number: Option<String>,
    pub expiry_date: NaiveDate,

    // ===== 数量 =====
    pub quantity_available: i64,
    pub quantity_used: i64,
    pub reorder_level: i64,

    // ===== 入库信息 =====
    pub unit_cost_cents: Option<i64>,
    pub supplier: Option<String>,
    pub received_date: NaiveDate,
    pub storage_temperature: Option<String>, // e.g. "2-8°C"
    pub notes: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// Trait: StockLevel
// ==========================================
// 用途: 批次可用性判断（纯计算，不落库）
pub trait StockLevel {
    /// 是否可扣减 qty 支
    fn can_consume(&self, qty: i64) -> bool;

    /// 是否可回补 qty 支（不得超过已用量）
    fn can_restore(&self, qty: i64) -> bool;

    /// 是否低于补货线
    fn is_low_stock(&self) -> bool;

    /// 截至 today 是否已过期
    fn is_expired(&self, today: NaiveDate) -> bool;

    /// 截至 today 是否可用于接种
    fn is_consumable(&self, today: NaiveDate) -> bool;

    /// 入库总量 (available + used)
    fn total_received(&self) -> i64;
}

impl StockLevel for InventoryLot {
    fn can_consume(&self, qty: i64) -> bool {
        qty > 0 && self.quantity_available >= qty
    }

    fn can_restore(&self, qty: i64) -> bool {
        qty > 0 && self.quantity_used >= qty
    }

    fn is_low_stock(&self) -> bool {
        self.quantity_available <= self.reorder_level
    }

    fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    /// 可用: 有余量 且 效期 >= today（效期当天仍可用）
    fn is_consumable(&self, today: NaiveDate) -> bool {
        self.quantity_available > 0 && self.expiry_date >= today
    }

    fn total_received(&self) -> i64 {
        self.quantity_available + self.quantity_used
    }
}

/// 入库新批次参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInventoryLot {
    pub vaccine_id: String,
    pub lot_number: String,
    pub batch_number: Option<String>,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    /// None 时使用配置 default_reorder_level
    pub reorder_level: Option<i64>,
    pub unit_cost_cents: Option<i64>,
    pub supplier: Option<String>,
    pub received_date: NaiveDate,
    pub storage_temperature: Option<String>,
    pub notes: Option<String>,
}

/// 批次更新参数（None 表示不修改）
///
/// 数量只能通过 add_quantity 追加（补货），不能直接覆写
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryLotUpdate {
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub reorder_level: Option<i64>,
    pub unit_cost_cents: Option<i64>,
    pub supplier: Option<String>,
    pub storage_temperature: Option<String>,
    pub notes: Option<String>,
    pub add_quantity: Option<i64>,
}

/// 库存告警
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryAlert {
    pub lot_id: String,
    pub vaccine_id: String,
    pub lot_number: String,
    pub expiry_date: NaiveDate,
    pub quantity_available: i64,
    pub reorder_level: i64,
    pub status: LotAlertStatus,
}

impl InventoryAlert {
    pub fn from_lot(lot: &InventoryLot, status: LotAlertStatus) -> Self {
        Self {
            lot_id: lot.lot_id.clone(),
            vaccine_id: lot.vaccine_id.clone(),
            lot_number: lot.lot_number.clone(),
            expiry_date: lot.expiry_date,
            quantity_available: lot.quantity_available,
            reorder_level: lot.reorder_level,
            status,
        }
    }
}
