// ==========================================
// 免疫接种排程系统 - 配置层
// ==========================================
// 职责: 系统配置管理（提醒窗口、报表区间、默认补货线）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
