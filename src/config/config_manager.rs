// ==========================================
// 免疫接种排程系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取整数配置；缺失或格式错误时回退到默认值
    fn get_i64_or_default(&self, key: &str, default: i64) -> Result<i64, Box<dyn Error>> {
        let value = self.get_config_value(key)?;
        Ok(value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(default))
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// 只包含已显式写入 config_kv 的键；未写入的键按默认值生效
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }

    // ===== 提醒窗口 =====

    /// 即将到期查询的默认窗口（天）
    pub fn get_upcoming_window_days_default(&self) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(config_keys::UPCOMING_WINDOW_DAYS_DEFAULT, 7)
    }

    /// 即将到期查询允许的最大窗口（天）
    pub fn get_upcoming_window_days_max(&self) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(config_keys::UPCOMING_WINDOW_DAYS_MAX, 30)
    }

    // ===== 统计报表 =====

    /// 统计概览中"即将到期"的天数
    pub fn get_stats_upcoming_days(&self) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(config_keys::STATS_UPCOMING_DAYS, 7)
    }

    pub fn get_trend_months_default(&self) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(config_keys::TREND_MONTHS_DEFAULT, 12)
    }

    pub fn get_trend_months_max(&self) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(config_keys::TREND_MONTHS_MAX, 36)
    }

    // ===== 库存 =====

    /// 新批次未指定补货线时的默认值
    pub fn get_default_reorder_level(&self) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(config_keys::DEFAULT_REORDER_LEVEL, 10)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 提醒窗口
    pub const UPCOMING_WINDOW_DAYS_DEFAULT: &str = "upcoming_window_days_default";
    pub const UPCOMING_WINDOW_DAYS_MAX: &str = "upcoming_window_days_max";

    // 统计报表
    pub const STATS_UPCOMING_DAYS: &str = "stats_upcoming_days";
    pub const TREND_MONTHS_DEFAULT: &str = "trend_months_default";
    pub const TREND_MONTHS_MAX: &str = "trend_months_max";

    // 库存
    pub const DEFAULT_REORDER_LEVEL: &str = "default_reorder_level";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = setup();
        assert_eq!(config.get_upcoming_window_days_default().unwrap(), 7);
        assert_eq!(config.get_upcoming_window_days_max().unwrap(), 30);
        assert_eq!(config.get_stats_upcoming_days().unwrap(), 7);
        assert_eq!(config.get_trend_months_default().unwrap(), 12);
        assert_eq!(config.get_trend_months_max().unwrap(), 36);
        assert_eq!(config.get_default_reorder_level().unwrap(), 10);
    }

    #[test]
    fn test_set_value_overrides_and_garbage_falls_back() {
        let config = setup();
        config
            .set_value(config_keys::UPCOMING_WINDOW_DAYS_MAX, "14")
            .unwrap();
        assert_eq!(config.get_upcoming_window_days_max().unwrap(), 14);

        config
            .set_value(config_keys::UPCOMING_WINDOW_DAYS_MAX, "21")
            .unwrap();
        assert_eq!(config.get_upcoming_window_days_max().unwrap(), 21);

        config
            .set_value(config_keys::DEFAULT_REORDER_LEVEL, "not-a-number")
            .unwrap();
        assert_eq!(config.get_default_reorder_level().unwrap(), 10);
    }

    #[test]
    fn test_snapshot_contains_written_keys() {
        let config = setup();
        config.set_value(config_keys::TREND_MONTHS_MAX, "24").unwrap();

        let snapshot = config.get_config_snapshot().unwrap();
        let map: HashMap<String, String> = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(map.get("trend_months_max").map(String::as_str), Some("24"));
        assert_eq!(map.len(), 1);
    }
}
