// ==========================================
// 免疫接种排程系统 - 疫苗目录数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::db::{fmt_timestamp, parse_timestamp};
use crate::domain::vaccine::{Vaccine, VaccineSearch};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Result as SqliteResult, Row,
    Transaction, TransactionBehavior,
};
use std::sync::{Arc, Mutex};

const VACCINE_COLUMNS: &str = r#"
    vaccine_id, vaccine_code, vaccine_name, manufacturer, description,
    total_doses_required, booster_required, booster_interval_months,
    recommended_age_months, is_active, created_at, updated_at
"#;

fn map_vaccine_row(row: &Row) -> SqliteResult<Vaccine> {
    Ok(Vaccine {
        vaccine_id: row.get(0)?,
        vaccine_code: row.get(1)?,
        vaccine_name: row.get(2)?,
        manufacturer: row.get(3)?,
        description: row.get(4)?,
        total_doses_required: row.get(5)?,
        booster_required: row.get::<_, i32>(6)? != 0,
        booster_interval_months: row.get(7)?,
        recommended_age_months: row.get(8)?,
        is_active: row.get::<_, i32>(9)? != 0,
        created_at: parse_timestamp(10, &row.get::<_, String>(10)?)?,
        updated_at: parse_timestamp(11, &row.get::<_, String>(11)?)?,
    })
}

// ==========================================
// VaccineRepository - 疫苗目录仓储
// ==========================================
/// 疫苗目录仓储
/// 职责: 管理 vaccine 表的 CRUD 操作（软删除）
pub struct VaccineRepository {
    conn: Arc<Mutex<Connection>>,
}

impl VaccineRepository {
    /// 从共享连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 分配疫苗编码并插入，编码生成与插入在同一 IMMEDIATE 事务内
    ///
    /// 编码按已存在的记录数递增（含已删除）
    pub fn insert_with_next_code(&self, vaccine: &mut Vaccine) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM vaccine", [], |row| row.get(0))?;
        vaccine.vaccine_code = format!("VAC{:04}", count + 1);
        Self::insert_tx(&tx, vaccine)?;
        tx.commit()?;
        Ok(())
    }

    /// 插入疫苗（编码由调用方给定）
    pub fn insert(&self, vaccine: &Vaccine) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        Self::insert_tx(&tx, vaccine)?;
        tx.commit()?;
        Ok(())
    }

    fn insert_tx(tx: &Transaction, vaccine: &Vaccine) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO vaccine (
                vaccine_id, vaccine_code, vaccine_name, manufacturer, description,
                total_doses_required, booster_required, booster_interval_months,
                recommended_age_months, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                vaccine.vaccine_id,
                vaccine.vaccine_code,
                vaccine.vaccine_name,
                vaccine.manufacturer,
                vaccine.description,
                vaccine.total_doses_required,
                vaccine.booster_required as i32,
                vaccine.booster_interval_months,
                vaccine.recommended_age_months,
                vaccine.is_active as i32,
                fmt_timestamp(vaccine.created_at),
                fmt_timestamp(vaccine.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按ID查询（已删除的记录不可见）
    ///
    /// # 返回
    /// - Ok(Some(Vaccine)): 找到疫苗
    /// - Ok(None): 未找到或已删除
    /// - Err: 数据库错误
    pub fn find_by_id(&self, vaccine_id: &str) -> RepositoryResult<Option<Vaccine>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM vaccine WHERE vaccine_id = ?1 AND deleted_at IS NULL",
            VACCINE_COLUMNS
        );
        let vaccine = conn
            .query_row(&sql, params![vaccine_id], map_vaccine_row)
            .optional()?;
        Ok(vaccine)
    }

    /// 按疫苗编码查询（已删除的记录不可见）
    pub fn find_by_code(&self, vaccine_code: &str) -> RepositoryResult<Option<Vaccine>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM vaccine WHERE vaccine_code = ?1 AND deleted_at IS NULL",
            VACCINE_COLUMNS
        );
        let vaccine = conn
            .query_row(&sql, params![vaccine_code], map_vaccine_row)
            .optional()?;
        Ok(vaccine)
    }

    /// 条件检索，按名称排序
    ///
    /// # 参数
    /// - filter: 名称 / 厂商子串（不区分大小写）、启用状态
    /// - limit / offset: 分页，None 表示不限
    pub fn search(
        &self,
        filter: &VaccineSearch,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> RepositoryResult<Vec<Vaccine>> {
        let conn = self.get_conn()?;

        let mut sql = format!(
            "SELECT {} FROM vaccine WHERE deleted_at IS NULL",
            VACCINE_COLUMNS
        );
        let mut values: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(name) = &filter.vaccine_name {
            sql.push_str(&format!(" AND LOWER(vaccine_name) LIKE ?{}", idx));
            values.push(Value::from(format!("%{}%", name.to_lowercase())));
            idx += 1;
        }
        if let Some(manufacturer) = &filter.manufacturer {
            sql.push_str(&format!(" AND LOWER(manufacturer) LIKE ?{}", idx));
            values.push(Value::from(format!("%{}%", manufacturer.to_lowercase())));
            idx += 1;
        }
        if let Some(is_active) = filter.is_active {
            sql.push_str(&format!(" AND is_active = ?{}", idx));
            values.push(Value::from(is_active as i32));
            idx += 1;
        }

        sql.push_str(" ORDER BY vaccine_name ASC");

        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT ?{}", idx));
            values.push(Value::from(limit));
            idx += 1;
            if let Some(offset) = offset {
                sql.push_str(&format!(" OFFSET ?{}", idx));
                values.push(Value::from(offset));
            }
        } else if let Some(offset) = offset {
            sql.push_str(&format!(" LIMIT -1 OFFSET ?{}", idx));
            values.push(Value::from(offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let vaccines = stmt
            .query_map(params_from_iter(values), map_vaccine_row)?
            .collect::<SqliteResult<Vec<Vaccine>>>()?;
        Ok(vaccines)
    }

    /// 未取消排程中使用的最大剂次号
    ///
    /// # 返回
    /// - Ok(None): 该疫苗没有未取消的排程
    pub fn max_dose_number_in_use(&self, vaccine_id: &str) -> RepositoryResult<Option<i32>> {
        let conn = self.get_conn()?;
        let max = conn.query_row(
            "SELECT MAX(dose_number) FROM dose_schedule WHERE vaccine_id = ?1 AND state <> 'CANCELLED'",
            params![vaccine_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// 查询全部未删除疫苗（含停用），按名称排序
    pub fn find_all(&self) -> RepositoryResult<Vec<Vaccine>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM vaccine WHERE deleted_at IS NULL ORDER BY vaccine_name ASC",
            VACCINE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let vaccines = stmt
            .query_map([], map_vaccine_row)?
            .collect::<SqliteResult<Vec<Vaccine>>>()?;
        Ok(vaccines)
    }

    /// 查询启用中的疫苗
    pub fn find_active(&self) -> RepositoryResult<Vec<Vaccine>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM vaccine WHERE deleted_at IS NULL AND is_active = 1 ORDER BY vaccine_name ASC",
            VACCINE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let vaccines = stmt
            .query_map([], map_vaccine_row)?
            .collect::<SqliteResult<Vec<Vaccine>>>()?;
        Ok(vaccines)
    }

    /// 统计启用中的疫苗数
    pub fn count_active(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM vaccine WHERE deleted_at IS NULL AND is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 整行更新（vaccine_code / created_at 不变）
    pub fn update(&self, vaccine: &Vaccine) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE vaccine SET
                vaccine_name = ?2, manufacturer = ?3, description = ?4,
                total_doses_required = ?5, booster_required = ?6,
                booster_interval_months = ?7, recommended_age_months = ?8,
                is_active = ?9, updated_at = ?10
            WHERE vaccine_id = ?1 AND deleted_at IS NULL
            "#,
            params![
                vaccine.vaccine_id,
                vaccine.vaccine_name,
                vaccine.manufacturer,
                vaccine.description,
                vaccine.total_doses_required,
                vaccine.booster_required as i32,
                vaccine.booster_interval_months,
                vaccine.recommended_age_months,
                vaccine.is_active as i32,
                fmt_timestamp(vaccine.updated_at),
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::not_found("Vaccine", &vaccine.vaccine_id));
        }
        Ok(())
    }

    /// 软删除
    ///
    /// # 返回
    /// - Ok(true): 已删除
    /// - Ok(false): 记录不存在或已删除
    pub fn soft_delete(&self, vaccine_id: &str, deleted_at: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE vaccine SET deleted_at = ?2, updated_at = ?2 WHERE vaccine_id = ?1 AND deleted_at IS NULL",
            params![vaccine_id, deleted_at],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup_repo() -> VaccineRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        VaccineRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn make_vaccine(id: &str, code: &str, name: &str) -> Vaccine {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Vaccine {
            vaccine_id: id.to_string(),
            vaccine_code: code.to_string(),
            vaccine_name: name.to_string(),
            manufacturer: Some("Acme Bio".to_string()),
            description: None,
            total_doses_required: 2,
            booster_required: false,
            booster_interval_months: None,
            recommended_age_months: Some(12),
            is_active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_insert_find_and_soft_delete() {
        let repo = setup_repo();

        let mut vaccine = make_vaccine("v1", "", "Hepatitis B");
        repo.insert_with_next_code(&mut vaccine).unwrap();
        assert_eq!(vaccine.vaccine_code, "VAC0001");

        let found = repo.find_by_id("v1").unwrap().unwrap();
        assert_eq!(found, vaccine);
        assert_eq!(repo.find_by_code("VAC0001").unwrap().unwrap(), vaccine);

        assert!(repo.soft_delete("v1", "2026-01-02 00:00:00").unwrap());
        assert!(repo.find_by_id("v1").unwrap().is_none());
        assert!(repo.find_by_code("VAC0001").unwrap().is_none());
        assert!(!repo.soft_delete("v1", "2026-01-02 00:00:00").unwrap());

        // 编码不回收
        let mut next = make_vaccine("v2", "", "MMR");
        repo.insert_with_next_code(&mut next).unwrap();
        assert_eq!(next.vaccine_code, "VAC0002");
    }

    #[test]
    fn test_search_matches_substrings_case_insensitively() {
        let repo = setup_repo();
        repo.insert(&make_vaccine("v1", "VAC0001", "Hepatitis B")).unwrap();
        repo.insert(&make_vaccine("v2", "VAC0002", "Hepatitis A")).unwrap();
        let mut other = make_vaccine("v3", "VAC0003", "MMR");
        other.manufacturer = Some("Merck".to_string());
        other.is_active = false;
        repo.insert(&other).unwrap();
        repo.insert(&make_vaccine("v4", "VAC0004", "Hepatitis E")).unwrap();
        repo.soft_delete("v4", "2026-01-02 00:00:00").unwrap();

        let hep = VaccineSearch {
            vaccine_name: Some("hepa".to_string()),
            ..Default::default()
        };
        let found = repo.search(&hep, None, None).unwrap();
        let names: Vec<_> = found.iter().map(|v| v.vaccine_name.as_str()).collect();
        assert_eq!(names, vec!["Hepatitis A", "Hepatitis B"]);

        let by_maker = VaccineSearch {
            manufacturer: Some("MERCK".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.search(&by_maker, None, None).unwrap()[0].vaccine_id, "v3");

        let active_only = VaccineSearch {
            is_active: Some(true),
            ..Default::default()
        };
        assert_eq!(repo.search(&active_only, None, None).unwrap().len(), 2);

        let page = repo.search(&VaccineSearch::default(), Some(1), Some(1)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].vaccine_name, "Hepatitis B");
        assert_eq!(repo.search(&VaccineSearch::default(), None, Some(2)).unwrap().len(), 1);
    }

    #[test]
    fn test_find_active_excludes_inactive() {
        let repo = setup_repo();
        repo.insert(&make_vaccine("v1", "VAC0001", "MMR")).unwrap();
        let mut inactive = make_vaccine("v2", "VAC0002", "BCG");
        inactive.is_active = false;
        repo.insert(&inactive).unwrap();

        assert_eq!(repo.find_all().unwrap().len(), 2);
        let active = repo.find_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].vaccine_id, "v1");
        assert_eq!(repo.count_active().unwrap(), 1);
    }

    #[test]
    fn test_update_missing_vaccine_is_not_found() {
        let repo = setup_repo();
        let vaccine = make_vaccine("ghost", "VAC0009", "Ghost");
        match repo.update(&vaccine) {
            Err(RepositoryError::NotFound { entity, id }) => {
                assert_eq!(entity, "Vaccine");
                assert_eq!(id, "ghost");
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }
}
