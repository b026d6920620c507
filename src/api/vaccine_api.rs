// ==========================================
// 免疫接种排程系统 - 疫苗目录 API
// ==========================================
// 职责: 疫苗目录的创建、查询、修改、删除
// ==========================================

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::db::fmt_timestamp;
use crate::api::schedule_api::validate_paging;
use crate::domain::vaccine::{NewVaccine, Vaccine, VaccineSearch, VaccineUpdate};
use crate::engine::clock::Clock;
use crate::repository::vaccine_repo::VaccineRepository;

// ==========================================
// VaccineApi - 疫苗目录 API
// ==========================================
pub struct VaccineApi {
    vaccine_repo: Arc<VaccineRepository>,
    clock: Arc<dyn Clock>,
}

impl VaccineApi {
    pub fn new(vaccine_repo: Arc<VaccineRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            vaccine_repo,
            clock,
        }
    }

    /// 字段校验（创建与更新共用）
    fn validate_fields(
        name: &str,
        total_doses_required: i32,
        booster_required: bool,
        booster_interval_months: Option<i32>,
        recommended_age_months: Option<i32>,
    ) -> ApiResult<()> {
        if name.trim().is_empty() {
            return Err(ApiError::ValidationError("疫苗名称不能为空".to_string()));
        }
        if total_doses_required < 1 {
            return Err(ApiError::ValidationError(format!(
                "总剂次必须 >= 1: {}",
                total_doses_required
            )));
        }
        if booster_required && booster_interval_months.map_or(true, |m| m < 1) {
            return Err(ApiError::ValidationError(
                "需要加强针时必须指定 >= 1 的加强针间隔（月）".to_string(),
            ));
        }
        if recommended_age_months.map_or(false, |m| m < 0) {
            return Err(ApiError::ValidationError("推荐月龄不能为负数".to_string()));
        }
        Ok(())
    }

    /// 新建疫苗
    ///
    /// # 返回
    /// - Ok(Vaccine): 新建的疫苗（已分配 vaccine_code）
    /// - Err(ApiError::ValidationError): 字段非法
    pub fn create_vaccine(&self, input: &NewVaccine) -> ApiResult<Vaccine> {
        Self::validate_fields(
            &input.vaccine_name,
            input.total_doses_required,
            input.booster_required,
            input.booster_interval_months,
            input.recommended_age_months,
        )?;

        let now = self.clock.now();
        let mut vaccine = Vaccine {
            vaccine_id: Uuid::new_v4().to_string(),
            vaccine_code: String::new(),
            vaccine_name: input.vaccine_name.trim().to_string(),
            manufacturer: input.manufacturer.clone(),
            description: input.description.clone(),
            total_doses_required: input.total_doses_required,
            booster_required: input.booster_required,
            booster_interval_months: input.booster_interval_months,
            recommended_age_months: input.recommended_age_months,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.vaccine_repo.insert_with_next_code(&mut vaccine)?;

        info!(
            vaccine_id = %vaccine.vaccine_id,
            vaccine_code = %vaccine.vaccine_code,
            total_doses = vaccine.total_doses_required,
            "疫苗已创建"
        );
        Ok(vaccine)
    }

    /// 按ID查询疫苗
    pub fn get_vaccine(&self, vaccine_id: &str) -> ApiResult<Vaccine> {
        if vaccine_id.trim().is_empty() {
            return Err(ApiError::ValidationError("疫苗ID不能为空".to_string()));
        }
        self.vaccine_repo
            .find_by_id(vaccine_id)?
            .ok_or_else(|| ApiError::not_found("Vaccine", vaccine_id))
    }

    /// 按疫苗编码查询
    pub fn get_by_code(&self, vaccine_code: &str) -> ApiResult<Vaccine> {
        if vaccine_code.trim().is_empty() {
            return Err(ApiError::ValidationError("疫苗编码不能为空".to_string()));
        }
        self.vaccine_repo
            .find_by_code(vaccine_code)?
            .ok_or_else(|| ApiError::not_found("Vaccine", vaccine_code))
    }

    /// 条件检索（名称 / 厂商子串、启用状态），按名称排序
    pub fn search(
        &self,
        filter: &VaccineSearch,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ApiResult<Vec<Vaccine>> {
        validate_paging(limit, offset)?;
        Ok(self.vaccine_repo.search(filter, limit, offset)?)
    }

    /// 启用中的疫苗
    pub fn list_active(&self) -> ApiResult<Vec<Vaccine>> {
        Ok(self.vaccine_repo.find_active()?)
    }

    /// 全部未删除疫苗（含停用）
    pub fn list_all(&self) -> ApiResult<Vec<Vaccine>> {
        Ok(self.vaccine_repo.find_all()?)
    }

    /// 修改疫苗（None 字段保持原值）
    ///
    /// # 返回
    /// - Err(ValidationError): 字段非法，或新总剂次小于未取消排程已使用的剂次号
    pub fn update_vaccine(&self, vaccine_id: &str, update: &VaccineUpdate) -> ApiResult<Vaccine> {
        let mut vaccine = self.get_vaccine(vaccine_id)?;

        if let Some(name) = &update.vaccine_name {
            vaccine.vaccine_name = name.trim().to_string();
        }
        if update.manufacturer.is_some() {
            vaccine.manufacturer = update.manufacturer.clone();
        }
        if update.description.is_some() {
            vaccine.description = update.description.clone();
        }
        if let Some(total) = update.total_doses_required {
            vaccine.total_doses_required = total;
        }
        if let Some(booster) = update.booster_required {
            vaccine.booster_required = booster;
        }
        if update.booster_interval_months.is_some() {
            vaccine.booster_interval_months = update.booster_interval_months;
        }
        if update.recommended_age_months.is_some() {
            vaccine.recommended_age_months = update.recommended_age_months;
        }
        if let Some(active) = update.is_active {
            vaccine.is_active = active;
        }

        Self::validate_fields(
            &vaccine.vaccine_name,
            vaccine.total_doses_required,
            vaccine.booster_required,
            vaccine.booster_interval_months,
            vaccine.recommended_age_months,
        )?;

        if update.total_doses_required.is_some() {
            if let Some(in_use) = self.vaccine_repo.max_dose_number_in_use(vaccine_id)? {
                if vaccine.total_doses_required < in_use {
                    warn!(
                        vaccine_id,
                        total_doses = vaccine.total_doses_required,
                        in_use,
                        "总剂次修改被拒绝: 低于已排程剂次"
                    );
                    return Err(ApiError::ValidationError(format!(
                        "总剂次不能小于已排程的剂次号: total_doses_required={}, in_use={}",
                        vaccine.total_doses_required, in_use
                    )));
                }
            }
        }

        vaccine.updated_at = self.clock.now();
        self.vaccine_repo.update(&vaccine)?;
        debug!(vaccine_id = %vaccine.vaccine_id, "疫苗已更新");
        Ok(vaccine)
    }

    /// 删除疫苗（软删除，删除后查询不可见）
    pub fn remove_vaccine(&self, vaccine_id: &str) -> ApiResult<()> {
        let deleted = self
            .vaccine_repo
            .soft_delete(vaccine_id, &fmt_timestamp(self.clock.now()))?;
        if !deleted {
            return Err(ApiError::not_found("Vaccine", vaccine_id));
        }
        info!(vaccine_id, "疫苗已删除");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::FixedClock;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn setup_api() -> VaccineApi {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let repo = Arc::new(VaccineRepository::new(Arc::new(Mutex::new(conn))));
        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()));
        VaccineApi::new(repo, clock)
    }

    fn new_vaccine(name: &str, total: i32) -> NewVaccine {
        NewVaccine {
            vaccine_name: name.to_string(),
            manufacturer: None,
            description: None,
            total_doses_required: total,
            booster_required: false,
            booster_interval_months: None,
            recommended_age_months: None,
        }
    }

    #[test]
    fn test_create_assigns_sequential_codes() {
        let api = setup_api();
        let a = api.create_vaccine(&new_vaccine("Hepatitis B", 3)).unwrap();
        let b = api.create_vaccine(&new_vaccine("MMR", 2)).unwrap();
        assert_eq!(a.vaccine_code, "VAC0001");
        assert_eq!(b.vaccine_code, "VAC0002");
        assert_eq!(api.list_active().unwrap().len(), 2);
        assert_eq!(api.get_by_code("VAC0002").unwrap(), b);
        assert!(matches!(api.get_by_code("VAC0404"), Err(ApiError::NotFound(_))));
        assert!(matches!(api.get_by_code(" "), Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn test_search_by_name_and_paging_bounds() {
        let api = setup_api();
        api.create_vaccine(&new_vaccine("Hepatitis B", 3)).unwrap();
        api.create_vaccine(&new_vaccine("Hepatitis A", 2)).unwrap();
        api.create_vaccine(&new_vaccine("MMR", 2)).unwrap();

        let filter = VaccineSearch {
            vaccine_name: Some("HEPATITIS".to_string()),
            ..Default::default()
        };
        let found = api.search(&filter, Some(10), None).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].vaccine_name, "Hepatitis A");

        assert!(matches!(
            api.search(&filter, Some(0), None),
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            api.search(&filter, None, Some(-1)),
            Err(ApiError::ValidationError(_))
        ));
    }

    #[test]
    fn test_create_rejects_invalid_fields() {
        let api = setup_api();
        assert!(matches!(
            api.create_vaccine(&new_vaccine("  ", 1)),
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            api.create_vaccine(&new_vaccine("Polio", 0)),
            Err(ApiError::ValidationError(_))
        ));

        let mut booster = new_vaccine("Tetanus", 3);
        booster.booster_required = true;
        assert!(matches!(
            api.create_vaccine(&booster),
            Err(ApiError::ValidationError(_))
        ));
        booster.booster_interval_months = Some(120);
        assert!(api.create_vaccine(&booster).is_ok());
    }

    #[test]
    fn test_update_and_remove() {
        let api = setup_api();
        let v = api.create_vaccine(&new_vaccine("Varicella", 2)).unwrap();

        let updated = api
            .update_vaccine(
                &v.vaccine_id,
                &VaccineUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!updated.is_active);
        assert!(api.list_active().unwrap().is_empty());
        assert_eq!(api.list_all().unwrap().len(), 1);

        api.remove_vaccine(&v.vaccine_id).unwrap();
        assert!(matches!(
            api.get_vaccine(&v.vaccine_id),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            api.remove_vaccine(&v.vaccine_id),
            Err(ApiError::NotFound(_))
        ));
    }
}
