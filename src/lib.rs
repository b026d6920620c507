// ==========================================
// 免疫接种排程系统 - 核心库
// ==========================================
// 范围: 剂次排程状态机 + 疫苗批次库存扣减/回补 + 状态聚合与报表
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则与聚合
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 共享状态装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{DoseState, LotAlertStatus};

// 领域实体
pub use domain::{
    AdministrationRecord, BulkCreateResult, BulkItemError, BulkScheduleItem, DoseSchedule,
    InventoryAlert, InventoryLot, InventoryLotUpdate, NewInventoryLot, NewVaccine,
    ScheduleSearch, StockLevel, Vaccine, VaccineUpdate,
};

// 引擎
pub use engine::{
    AllowAllDirectory, Clock, DoseRuleEngine, FixedClock, ReportingEngine, StaticDirectory,
    StatusAggregator, SystemClock,
};

// API
pub use api::{
    AdministerRequest, AdministrationApi, ApiError, ApiResult, InventoryApi, ReportApi,
    ScheduleApi, StatusApi, VaccineApi,
};

// 应用
pub use app::{get_default_db_path, AppState};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "免疫接种排程系统";
