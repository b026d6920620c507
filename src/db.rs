// ==========================================
// 免疫接种排程系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，并发写入（接种扣减）时第二个写者等待而不是直接报 busy
// - 统一建表 DDL 与日期列的读写格式
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 日期列存储格式
pub const DATE_FMT: &str = "%Y-%m-%d";

/// 时间戳列存储格式
pub const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// 建表 DDL（幂等）
///
/// 说明：
/// - quantity_* 的 CHECK 约束是库存非负的最后一道防线
/// - dose_schedule 的 CHECK 保证 consumed_lot_ref 与 ADMINISTERED 状态同生同灭
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS vaccine (
    vaccine_id TEXT PRIMARY KEY,
    vaccine_code TEXT NOT NULL UNIQUE,
    vaccine_name TEXT NOT NULL,
    manufacturer TEXT,
    description TEXT,
    total_doses_required INTEGER NOT NULL CHECK (total_doses_required >= 1),
    booster_required INTEGER NOT NULL DEFAULT 0,
    booster_interval_months INTEGER,
    recommended_age_months INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inventory_lot (
    lot_id TEXT PRIMARY KEY,
    vaccine_id TEXT NOT NULL REFERENCES vaccine(vaccine_id),
    lot_number TEXT NOT NULL,
    batch_number TEXT,
    expiry_date TEXT NOT NULL,
    quantity_available INTEGER NOT NULL CHECK (quantity_available >= 0),
    quantity_used INTEGER NOT NULL DEFAULT 0 CHECK (quantity_used >= 0),
    reorder_level INTEGER NOT NULL DEFAULT 10,
    unit_cost_cents INTEGER,
    supplier TEXT,
    received_date TEXT NOT NULL,
    storage_temperature TEXT,
    notes TEXT,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_inventory_lot_vaccine_lot
    ON inventory_lot (vaccine_id, lot_number);
CREATE INDEX IF NOT EXISTS idx_inventory_lot_expiry
    ON inventory_lot (expiry_date);

CREATE TABLE IF NOT EXISTS dose_schedule (
    schedule_id TEXT PRIMARY KEY,
    schedule_code TEXT NOT NULL UNIQUE,
    patient_id TEXT NOT NULL,
    vaccine_id TEXT NOT NULL REFERENCES vaccine(vaccine_id),
    dose_number INTEGER NOT NULL CHECK (dose_number >= 1),
    scheduled_date TEXT NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('SCHEDULED', 'ADMINISTERED', 'CANCELLED')),
    administered_date TEXT,
    administering_doctor_id TEXT,
    consumed_lot_ref TEXT REFERENCES inventory_lot(lot_id),
    administration_site TEXT,
    route TEXT,
    adverse_reactions TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((state = 'ADMINISTERED') = (consumed_lot_ref IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_dose_schedule_patient
    ON dose_schedule (patient_id, scheduled_date);
CREATE INDEX IF NOT EXISTS idx_dose_schedule_date_state
    ON dose_schedule (scheduled_date, state);
CREATE INDEX IF NOT EXISTS idx_dose_schedule_administered
    ON dose_schedule (administered_date);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表并登记 schema_version（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

// ==========================================
// 日期列解析
// ==========================================
// 解析失败返回 FromSqlConversionFailure，而不是静默回退到 1970-01-01

/// 解析日期列
pub fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 解析可空日期列
pub fn parse_opt_date(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    raw.map(|s| parse_date(idx, &s)).transpose()
}

/// 解析时间戳列
pub fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FMT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 日期 → 存储字符串
pub fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

/// 时间戳 → 存储字符串
pub fn fmt_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TS_FMT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), None);
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(
            parse_date(0, "2026-10-17").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
        );
        assert!(parse_date(0, "17/10/2026").is_err());
        assert_eq!(parse_opt_date(0, None).unwrap(), None);
    }
}
