// ==========================================
// 免疫接种排程系统 - API 层
// ==========================================
// 职责: 用例编排（校验 → 仓储调用 → 错误转换）
// ==========================================

pub mod administration_api;
pub mod error;
pub mod inventory_api;
pub mod report_api;
pub mod schedule_api;
pub mod status_api;
pub mod vaccine_api;

// 重导出核心类型
pub use administration_api::{AdministerRequest, AdministrationApi};
pub use error::{ApiError, ApiResult};
pub use inventory_api::InventoryApi;
pub use report_api::ReportApi;
pub use schedule_api::ScheduleApi;
pub use status_api::StatusApi;
pub use vaccine_api::VaccineApi;
