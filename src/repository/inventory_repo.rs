// ==========================================
// 免疫接种排程系统 - 疫苗库存批次数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 扣减/回补只能走条件 UPDATE，读-改-写在行级原子完成
// ==========================================

use crate::db::{fmt_date, fmt_timestamp, parse_date, parse_timestamp};
use crate::domain::inventory::{InventoryLot, InventoryLotUpdate};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{
    params, Connection, OptionalExtension, Result as SqliteResult, Row, Transaction,
    TransactionBehavior,
};
use std::sync::{Arc, Mutex};

const LOT_COLUMNS: &str = r#"
    lot_id, vaccine_id, lot_number, batch_number, expiry_date,
    quantity_available, quantity_used, reorder_level, unit_cost_cents,
    supplier, received_date, storage_temperature, notes, created_at, updated_at
"#;

fn map_lot_row(row: &Row) -> SqliteResult<InventoryLot> {
    Ok(InventoryLot {
        lot_id: row.get(0)?,
        vaccine_id: row.get(1)?,
        lot_number: row.get(2)?,
        batch_number: row.get(3)?,
        expiry_date: parse_date(4, &row.get::<_, String>(4)?)?,
        quantity_available: row.get(5)?,
        quantity_used: row.get(6)?,
        reorder_level: row.get(7)?,
        unit_cost_cents: row.get(8)?,
        supplier: row.get(9)?,
        received_date: parse_date(10, &row.get::<_, String>(10)?)?,
        storage_temperature: row.get(11)?,
        notes: row.get(12)?,
        created_at: parse_timestamp(13, &row.get::<_, String>(13)?)?,
        updated_at: parse_timestamp(14, &row.get::<_, String>(14)?)?,
    })
}

// ==========================================
// InventoryLotRepository - 库存批次仓储
// ==========================================
/// 库存批次仓储
/// 职责: 批次 CRUD、可用批次定位、扣减与回补
pub struct InventoryLotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl InventoryLotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn query_lots(
        conn: &Connection,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> RepositoryResult<Vec<InventoryLot>> {
        let sql = format!(
            "SELECT {} FROM inventory_lot WHERE deleted_at IS NULL AND {} ORDER BY expiry_date ASC, lot_number ASC",
            LOT_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let lots = stmt
            .query_map(params, map_lot_row)?
            .collect::<SqliteResult<Vec<InventoryLot>>>()?;
        Ok(lots)
    }

    // ==========================================
    // 批次维护
    // ==========================================

    /// 入库新批次
    pub fn insert(&self, lot: &InventoryLot) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO inventory_lot (
                lot_id, vaccine_id, lot_number, batch_number, expiry_date,
                quantity_available, quantity_used, reorder_level, unit_cost_cents,
                supplier, received_date, storage_temperature, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                lot.lot_id,
                lot.vaccine_id,
                lot.lot_number,
                lot.batch_number,
                fmt_date(lot.expiry_date),
                lot.quantity_available,
                lot.quantity_used,
                lot.reorder_level,
                lot.unit_cost_cents,
                lot.supplier,
                fmt_date(lot.received_date),
                lot.storage_temperature,
                lot.notes,
                fmt_timestamp(lot.created_at),
                fmt_timestamp(lot.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 更新批次元数据并按需补货
    ///
    /// None 字段保持原值；add_quantity 只累加到 quantity_available
    pub fn apply_update(
        &self,
        lot_id: &str,
        update: &InventoryLotUpdate,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE inventory_lot SET
                batch_number = COALESCE(?2, batch_number),
                expiry_date = COALESCE(?3, expiry_date),
                reorder_level = COALESCE(?4, reorder_level),
                unit_cost_cents = COALESCE(?5, unit_cost_cents),
                supplier = COALESCE(?6, supplier),
                storage_temperature = COALESCE(?7, storage_temperature),
                notes = COALESCE(?8, notes),
                quantity_available = quantity_available + COALESCE(?9, 0),
                updated_at = ?10
            WHERE lot_id = ?1 AND deleted_at IS NULL
            "#,
            params![
                lot_id,
                update.batch_number,
                update.expiry_date.map(fmt_date),
                update.reorder_level,
                update.unit_cost_cents,
                update.supplier,
                update.storage_temperature,
                update.notes,
                update.add_quantity,
                fmt_timestamp(updated_at),
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::not_found("InventoryLot", lot_id));
        }
        Ok(())
    }

    /// 软删除
    pub fn soft_delete(&self, lot_id: &str, deleted_at: NaiveDateTime) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let ts = fmt_timestamp(deleted_at);
        let affected = conn.execute(
            "UPDATE inventory_lot SET deleted_at = ?2, updated_at = ?2 WHERE lot_id = ?1 AND deleted_at IS NULL",
            params![lot_id, ts],
        )?;
        Ok(affected > 0)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_id(&self, lot_id: &str) -> RepositoryResult<Option<InventoryLot>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM inventory_lot WHERE lot_id = ?1 AND deleted_at IS NULL",
            LOT_COLUMNS
        );
        let lot = conn
            .query_row(&sql, params![lot_id], map_lot_row)
            .optional()?;
        Ok(lot)
    }

    /// 某疫苗的全部批次，按效期升序
    pub fn find_by_vaccine(&self, vaccine_id: &str) -> RepositoryResult<Vec<InventoryLot>> {
        let conn = self.get_conn()?;
        Self::query_lots(&conn, "vaccine_id = ?1", &[&vaccine_id])
    }

    pub fn find_all(&self) -> RepositoryResult<Vec<InventoryLot>> {
        let conn = self.get_conn()?;
        Self::query_lots(&conn, "1=1", &[])
    }

    /// 可用量 <= 补货线的批次
    pub fn find_low_stock(&self) -> RepositoryResult<Vec<InventoryLot>> {
        let conn = self.get_conn()?;
        Self::query_lots(&conn, "quantity_available <= reorder_level", &[])
    }

    /// 已过期但仍有余量的批次
    pub fn find_expired(&self, today: NaiveDate) -> RepositoryResult<Vec<InventoryLot>> {
        let conn = self.get_conn()?;
        let today = fmt_date(today);
        Self::query_lots(
            &conn,
            "expiry_date < ?1 AND quantity_available > 0",
            &[&today],
        )
    }

    // ==========================================
    // 事务内操作（由调用方持有事务）
    // ==========================================

    /// 定位可用批次: 批号匹配、有余量、未过期；多条时取效期最早者
    pub fn find_consumable_tx(
        tx: &Transaction,
        vaccine_id: &str,
        lot_number: &str,
        today: NaiveDate,
    ) -> RepositoryResult<Option<InventoryLot>> {
        let sql = format!(
            r#"
            SELECT {} FROM inventory_lot
            WHERE vaccine_id = ?1 AND lot_number = ?2
              AND quantity_available > 0 AND expiry_date >= ?3
              AND deleted_at IS NULL
            ORDER BY expiry_date ASC, created_at ASC
            LIMIT 1
            "#,
            LOT_COLUMNS
        );
        let lot = tx
            .query_row(
                &sql,
                params![vaccine_id, lot_number, fmt_date(today)],
                map_lot_row,
            )
            .optional()?;
        Ok(lot)
    }

    /// 读取批次当前数量 (available, used)，不过滤软删除
    fn read_quantities_tx(tx: &Transaction, lot_id: &str) -> RepositoryResult<(i64, i64)> {
        tx.query_row(
            "SELECT quantity_available, quantity_used FROM inventory_lot WHERE lot_id = ?1",
            params![lot_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?
        .ok_or_else(|| RepositoryError::not_found("InventoryLot", lot_id))
    }

    /// 扣减 qty 支: available -= qty, used += qty
    ///
    /// # 返回
    /// - Err(InsufficientStock): 可用量不足，未做任何修改
    pub fn consume_tx(
        tx: &Transaction,
        lot_id: &str,
        qty: i64,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let affected = tx.execute(
            r#"
            UPDATE inventory_lot SET
                quantity_available = quantity_available - ?2,
                quantity_used = quantity_used + ?2,
                updated_at = ?3
            WHERE lot_id = ?1 AND quantity_available >= ?2
            "#,
            params![lot_id, qty, fmt_timestamp(updated_at)],
        )?;

        if affected == 0 {
            let (available, _) = Self::read_quantities_tx(tx, lot_id)?;
            return Err(RepositoryError::InsufficientStock {
                lot_id: lot_id.to_string(),
                requested: qty,
                available,
            });
        }
        Ok(())
    }

    /// 回补 qty 支: available += qty, used -= qty
    ///
    /// 回补目标按批次ID定位，批次被软删除后仍可回补
    ///
    /// # 返回
    /// - Err(OverRestore): 回补量超过已用量，未做任何修改
    pub fn restore_tx(
        tx: &Transaction,
        lot_id: &str,
        qty: i64,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let affected = tx.execute(
            r#"
            UPDATE inventory_lot SET
                quantity_available = quantity_available + ?2,
                quantity_used = quantity_used - ?2,
                updated_at = ?3
            WHERE lot_id = ?1 AND quantity_used >= ?2
            "#,
            params![lot_id, qty, fmt_timestamp(updated_at)],
        )?;

        if affected == 0 {
            let (_, used) = Self::read_quantities_tx(tx, lot_id)?;
            return Err(RepositoryError::OverRestore {
                lot_id: lot_id.to_string(),
                requested: qty,
                used,
            });
        }
        Ok(())
    }

    /// 独立事务扣减
    pub fn consume(&self, lot_id: &str, qty: i64, updated_at: NaiveDateTime) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::consume_tx(&tx, lot_id, qty, updated_at)?;
        tx.commit()?;
        Ok(())
    }

    /// 独立事务回补
    pub fn restore(&self, lot_id: &str, qty: i64, updated_at: NaiveDateTime) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::restore_tx(&tx, lot_id, qty, updated_at)?;
        tx.commit()?;
        Ok(())
    }

    /// 独立事务定位可用批次
    pub fn find_consumable(
        &self,
        vaccine_id: &str,
        lot_number: &str,
        today: NaiveDate,
    ) -> RepositoryResult<Option<InventoryLot>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let lot = Self::find_consumable_tx(&tx, vaccine_id, lot_number, today)?;
        tx.commit()?;
        Ok(lot)
    }
}
