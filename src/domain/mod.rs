// ==========================================
// 免疫接种排程系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod inventory;
pub mod schedule;
pub mod types;
pub mod vaccine;

// 重导出核心类型
pub use inventory::{InventoryAlert, InventoryLot, InventoryLotUpdate, NewInventoryLot, StockLevel};
pub use schedule::{
    AdministrationRecord, BulkCreateResult, BulkItemError, BulkScheduleItem, DoseSchedule,
    ScheduleSearch,
};
pub use types::{DoseState, LotAlertStatus};
pub use vaccine::{NewVaccine, Vaccine, VaccineSearch, VaccineUpdate};
