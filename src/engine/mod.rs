// ==========================================
// 免疫接种排程系统 - 引擎层
// ==========================================
// 职责: 实现业务规则与聚合,不拼 SQL
// 红线: Engine 不拼 SQL; 时间相关规则的 today 一律由 Clock 注入
// ==========================================

pub mod clock;
pub mod directory;
pub mod dose_rules;
pub mod reporting;
pub mod status;

// 重导出核心引擎
pub use clock::{Clock, FixedClock, SystemClock};
pub use directory::{AllowAllDirectory, DoctorDirectory, PatientDirectory, StaticDirectory};
pub use dose_rules::{AdministrationInput, DoseRuleEngine, DoseRuleViolation};
pub use reporting::{
    CompletionTrendPoint, ComprehensiveReport, InventoryCounts, MonthlyCount, ReportingEngine,
    StatsOverview, VaccineBreakdown,
};
pub use status::{
    CalendarEvent, DueDoseAlert, NextDose, PatientVaccinationStatus, StatusAggregator,
    VaccineProgress,
};
