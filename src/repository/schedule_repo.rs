// ==========================================
// 免疫接种排程系统 - 剂次排程数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 状态变更一律使用条件 UPDATE (WHERE state = ?)，
//       由调用方根据受影响行数判定状态冲突
// ==========================================

use crate::db::{fmt_date, fmt_timestamp, parse_date, parse_opt_date, parse_timestamp};
use crate::domain::schedule::{AdministrationRecord, DoseSchedule, ScheduleSearch};
use crate::domain::types::DoseState;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Result as SqliteResult, Row,
    Transaction, TransactionBehavior,
};
use std::sync::{Arc, Mutex};

const SCHEDULE_COLUMNS: &str = r#"
    schedule_id, schedule_code, patient_id, vaccine_id, dose_number,
    scheduled_date, state, administered_date, administering_doctor_id,
    consumed_lot_ref, administration_site, route, adverse_reactions,
    notes, created_at, updated_at
"#;

fn map_schedule_row(row: &Row) -> SqliteResult<DoseSchedule> {
    let state_raw: String = row.get(6)?;
    let state = DoseState::from_db_str(&state_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown dose state: {}", state_raw).into(),
        )
    })?;

    Ok(DoseSchedule {
        schedule_id: row.get(0)?,
        schedule_code: row.get(1)?,
        patient_id: row.get(2)?,
        vaccine_id: row.get(3)?,
        dose_number: row.get(4)?,
        scheduled_date: parse_date(5, &row.get::<_, String>(5)?)?,
        state,
        administered_date: parse_opt_date(7, row.get(7)?)?,
        administering_doctor_id: row.get(8)?,
        consumed_lot_ref: row.get(9)?,
        administration_site: row.get(10)?,
        route: row.get(11)?,
        adverse_reactions: row.get(12)?,
        notes: row.get(13)?,
        created_at: parse_timestamp(14, &row.get::<_, String>(14)?)?,
        updated_at: parse_timestamp(15, &row.get::<_, String>(15)?)?,
    })
}

// ==========================================
// DoseScheduleRepository - 剂次排程仓储
// ==========================================
pub struct DoseScheduleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DoseScheduleRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn query_list(
        conn: &Connection,
        where_clause: &str,
        order_clause: &str,
        values: Vec<Value>,
    ) -> RepositoryResult<Vec<DoseSchedule>> {
        let sql = format!(
            "SELECT {} FROM dose_schedule WHERE {} ORDER BY {}",
            SCHEDULE_COLUMNS, where_clause, order_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), map_schedule_row)?
            .collect::<SqliteResult<Vec<DoseSchedule>>>()?;
        Ok(rows)
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 分配排程编码并插入，编码生成与插入在同一 IMMEDIATE 事务内
    ///
    /// # 参数
    /// - schedule: 待插入条目，schedule_code 由本方法写入
    /// - on: 编码日期（创建日）
    pub fn insert_with_next_code(
        &self,
        schedule: &mut DoseSchedule,
        on: NaiveDate,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        schedule.schedule_code = Self::next_schedule_code_tx(&tx, on)?;
        Self::insert_tx(&tx, schedule)?;
        tx.commit()?;
        Ok(())
    }

    /// 插入排程条目（编码由调用方给定）
    pub fn insert(&self, schedule: &DoseSchedule) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        Self::insert_tx(&tx, schedule)?;
        tx.commit()?;
        Ok(())
    }

    /// 改期（仅 SCHEDULED 条目）
    ///
    /// # 返回
    /// - Ok(true): 已更新
    /// - Ok(false): 条目不存在或状态不是 SCHEDULED
    pub fn update_scheduled_date(
        &self,
        schedule_id: &str,
        new_date: NaiveDate,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE dose_schedule
            SET scheduled_date = ?2, updated_at = ?3
            WHERE schedule_id = ?1 AND state = 'SCHEDULED'
            "#,
            params![schedule_id, fmt_date(new_date), fmt_timestamp(updated_at)],
        )?;
        Ok(affected > 0)
    }

    /// 逻辑删除: SCHEDULED → CANCELLED
    pub fn mark_cancelled(
        &self,
        schedule_id: &str,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE dose_schedule
            SET state = 'CANCELLED', updated_at = ?2
            WHERE schedule_id = ?1 AND state = 'SCHEDULED'
            "#,
            params![schedule_id, fmt_timestamp(updated_at)],
        )?;
        Ok(affected > 0)
    }

    /// 更新备注（CANCELLED 条目不可修改）
    pub fn update_notes(
        &self,
        schedule_id: &str,
        notes: Option<&str>,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE dose_schedule
            SET notes = ?2, updated_at = ?3
            WHERE schedule_id = ?1 AND state <> 'CANCELLED'
            "#,
            params![schedule_id, notes, fmt_timestamp(updated_at)],
        )?;
        Ok(affected > 0)
    }

    // ==========================================
    // 事务内操作（由调用方持有事务）
    // ==========================================

    /// 事务内生成排程编码 VSCH{yymmdd}{nnnn}
    pub fn next_schedule_code_tx(tx: &Transaction, on: NaiveDate) -> RepositoryResult<String> {
        let prefix = format!("VSCH{}", on.format("%y%m%d"));
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM dose_schedule WHERE schedule_code LIKE ?1",
            params![format!("{}%", prefix)],
            |row| row.get(0),
        )?;
        Ok(format!("{}{:04}", prefix, count + 1))
    }

    /// 事务内插入
    pub fn insert_tx(tx: &Transaction, schedule: &DoseSchedule) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO dose_schedule (
                schedule_id, schedule_code, patient_id, vaccine_id, dose_number,
                scheduled_date, state, administered_date, administering_doctor_id,
                consumed_lot_ref, administration_site, route, adverse_reactions,
                notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                schedule.schedule_id,
                schedule.schedule_code,
                schedule.patient_id,
                schedule.vaccine_id,
                schedule.dose_number,
                fmt_date(schedule.scheduled_date),
                schedule.state.to_db_str(),
                schedule.administered_date.map(fmt_date),
                schedule.administering_doctor_id,
                schedule.consumed_lot_ref,
                schedule.administration_site,
                schedule.route,
                schedule.adverse_reactions,
                schedule.notes,
                fmt_timestamp(schedule.created_at),
                fmt_timestamp(schedule.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 事务内按ID读取
    pub fn find_by_id_tx(
        tx: &Transaction,
        schedule_id: &str,
    ) -> RepositoryResult<Option<DoseSchedule>> {
        let sql = format!(
            "SELECT {} FROM dose_schedule WHERE schedule_id = ?1",
            SCHEDULE_COLUMNS
        );
        let schedule = tx
            .query_row(&sql, params![schedule_id], map_schedule_row)
            .optional()?;
        Ok(schedule)
    }

    /// 事务内落账接种: SCHEDULED → ADMINISTERED
    ///
    /// # 返回
    /// - Ok(true): 已更新
    /// - Ok(false): 状态已不是 SCHEDULED
    pub fn mark_administered_tx(
        tx: &Transaction,
        schedule_id: &str,
        record: &AdministrationRecord,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let affected = tx.execute(
            r#"
            UPDATE dose_schedule SET
                state = 'ADMINISTERED',
                administered_date = ?2,
                administering_doctor_id = ?3,
                consumed_lot_ref = ?4,
                administration_site = ?5,
                route = ?6,
                adverse_reactions = ?7,
                updated_at = ?8
            WHERE schedule_id = ?1 AND state = 'SCHEDULED'
            "#,
            params![
                schedule_id,
                fmt_date(record.administered_date),
                record.administering_doctor_id,
                record.consumed_lot_ref,
                record.administration_site,
                record.route,
                record.adverse_reactions,
                fmt_timestamp(updated_at),
            ],
        )?;
        Ok(affected > 0)
    }

    /// 事务内撤销接种: ADMINISTERED → SCHEDULED，并清空全部接种字段
    pub fn reset_administration_tx(
        tx: &Transaction,
        schedule_id: &str,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let affected = tx.execute(
            r#"
            UPDATE dose_schedule SET
                state = 'SCHEDULED',
                administered_date = NULL,
                administering_doctor_id = NULL,
                consumed_lot_ref = NULL,
                administration_site = NULL,
                route = NULL,
                adverse_reactions = NULL,
                updated_at = ?2
            WHERE schedule_id = ?1 AND state = 'ADMINISTERED'
            "#,
            params![schedule_id, fmt_timestamp(updated_at)],
        )?;
        Ok(affected > 0)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按ID查询（含 CANCELLED）
    pub fn find_by_id(&self, schedule_id: &str) -> RepositoryResult<Option<DoseSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM dose_schedule WHERE schedule_id = ?1",
            SCHEDULE_COLUMNS
        );
        let schedule = conn
            .query_row(&sql, params![schedule_id], map_schedule_row)
            .optional()?;
        Ok(schedule)
    }

    /// 按排程编码查询（不含 CANCELLED）
    pub fn find_by_code(&self, schedule_code: &str) -> RepositoryResult<Option<DoseSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM dose_schedule WHERE schedule_code = ?1 AND state <> 'CANCELLED'",
            SCHEDULE_COLUMNS
        );
        let schedule = conn
            .query_row(&sql, params![schedule_code], map_schedule_row)
            .optional()?;
        Ok(schedule)
    }

    /// 条件检索，按 scheduled_date 倒序
    ///
    /// state 为 None 时排除 CANCELLED
    pub fn search(
        &self,
        filter: &ScheduleSearch,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> RepositoryResult<Vec<DoseSchedule>> {
        let conn = self.get_conn()?;

        let mut sql = format!("SELECT {} FROM dose_schedule WHERE 1=1", SCHEDULE_COLUMNS);
        let mut values: Vec<Value> = Vec::new();
        let mut idx = 1;

        match filter.state {
            Some(state) => {
                sql.push_str(&format!(" AND state = ?{}", idx));
                values.push(Value::from(state.to_db_str().to_string()));
                idx += 1;
            }
            None => sql.push_str(" AND state <> 'CANCELLED'"),
        }

        if let Some(patient_id) = &filter.patient_id {
            sql.push_str(&format!(" AND patient_id = ?{}", idx));
            values.push(Value::from(patient_id.clone()));
            idx += 1;
        }
        if let Some(vaccine_id) = &filter.vaccine_id {
            sql.push_str(&format!(" AND vaccine_id = ?{}", idx));
            values.push(Value::from(vaccine_id.clone()));
            idx += 1;
        }
        if let Some(doctor_id) = &filter.doctor_id {
            sql.push_str(&format!(" AND administering_doctor_id = ?{}", idx));
            values.push(Value::from(doctor_id.clone()));
            idx += 1;
        }
        if let Some(from) = filter.date_from {
            sql.push_str(&format!(" AND scheduled_date >= ?{}", idx));
            values.push(Value::from(fmt_date(from)));
            idx += 1;
        }
        if let Some(to) = filter.date_to {
            sql.push_str(&format!(" AND scheduled_date <= ?{}", idx));
            values.push(Value::from(fmt_date(to)));
            idx += 1;
        }
        if let Some(dose_number) = filter.dose_number {
            sql.push_str(&format!(" AND dose_number = ?{}", idx));
            values.push(Value::from(dose_number));
            idx += 1;
        }

        sql.push_str(" ORDER BY scheduled_date DESC, schedule_code DESC");

        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT ?{}", idx));
            values.push(Value::from(limit));
            idx += 1;
            if let Some(offset) = offset {
                sql.push_str(&format!(" OFFSET ?{}", idx));
                values.push(Value::from(offset));
            }
        } else if let Some(offset) = offset {
            // SQLite 要求 OFFSET 前必须有 LIMIT
            sql.push_str(&format!(" LIMIT -1 OFFSET ?{}", idx));
            values.push(Value::from(offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), map_schedule_row)?
            .collect::<SqliteResult<Vec<DoseSchedule>>>()?;
        Ok(rows)
    }

    /// 患者的全部未取消条目，按日期升序
    pub fn find_by_patient(&self, patient_id: &str) -> RepositoryResult<Vec<DoseSchedule>> {
        let conn = self.get_conn()?;
        Self::query_list(
            &conn,
            "patient_id = ?1 AND state <> 'CANCELLED'",
            "scheduled_date ASC, dose_number ASC",
            vec![Value::from(patient_id.to_string())],
        )
    }

    /// 疫苗的全部未取消条目，按日期升序
    pub fn find_by_vaccine(&self, vaccine_id: &str) -> RepositoryResult<Vec<DoseSchedule>> {
        let conn = self.get_conn()?;
        Self::query_list(
            &conn,
            "vaccine_id = ?1 AND state <> 'CANCELLED'",
            "scheduled_date ASC, dose_number ASC",
            vec![Value::from(vaccine_id.to_string())],
        )
    }

    /// scheduled_date ∈ [from, to] 的 SCHEDULED 条目
    pub fn find_scheduled_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<DoseSchedule>> {
        let conn = self.get_conn()?;
        Self::query_list(
            &conn,
            "state = 'SCHEDULED' AND scheduled_date >= ?1 AND scheduled_date <= ?2",
            "scheduled_date ASC, schedule_code ASC",
            vec![Value::from(fmt_date(from)), Value::from(fmt_date(to))],
        )
    }

    /// scheduled_date < before 的 SCHEDULED 条目（逾期）
    pub fn find_scheduled_before(&self, before: NaiveDate) -> RepositoryResult<Vec<DoseSchedule>> {
        let conn = self.get_conn()?;
        Self::query_list(
            &conn,
            "state = 'SCHEDULED' AND scheduled_date < ?1",
            "scheduled_date ASC, schedule_code ASC",
            vec![Value::from(fmt_date(before))],
        )
    }

    /// 未取消条目，可选 scheduled_date 区间（闭区间）
    pub fn find_active_in_range(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> RepositoryResult<Vec<DoseSchedule>> {
        let conn = self.get_conn()?;
        let mut where_clause = String::from("state <> 'CANCELLED'");
        let mut values: Vec<Value> = Vec::new();
        if let Some(from) = from {
            values.push(Value::from(fmt_date(from)));
            where_clause.push_str(&format!(" AND scheduled_date >= ?{}", values.len()));
        }
        if let Some(to) = to {
            values.push(Value::from(fmt_date(to)));
            where_clause.push_str(&format!(" AND scheduled_date <= ?{}", values.len()));
        }
        Self::query_list(
            &conn,
            &where_clause,
            "scheduled_date ASC, schedule_code ASC",
            values,
        )
    }

    /// administered_date ∈ [from, to] 的已接种条目
    pub fn find_administered_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<DoseSchedule>> {
        let conn = self.get_conn()?;
        Self::query_list(
            &conn,
            "state = 'ADMINISTERED' AND administered_date >= ?1 AND administered_date <= ?2",
            "administered_date ASC, schedule_code ASC",
            vec![Value::from(fmt_date(from)), Value::from(fmt_date(to))],
        )
    }
}
