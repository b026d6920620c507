// ==========================================
// 免疫接种排程系统 - 疫苗库存 API
// ==========================================
// 职责: 批次入库/维护、可用批次定位、扣减/回补、库存告警
// 红线: 数量只能通过 consume/restore 变更（补货 add_quantity 除外）
// ==========================================

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::domain::inventory::{InventoryAlert, InventoryLot, InventoryLotUpdate, NewInventoryLot};
use crate::domain::types::LotAlertStatus;
use crate::engine::clock::Clock;
use crate::repository::inventory_repo::InventoryLotRepository;
use crate::repository::vaccine_repo::VaccineRepository;

// ==========================================
// InventoryApi - 疫苗库存 API
// ==========================================
pub struct InventoryApi {
    inventory_repo: Arc<InventoryLotRepository>,
    vaccine_repo: Arc<VaccineRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
}

impl InventoryApi {
    pub fn new(
        inventory_repo: Arc<InventoryLotRepository>,
        vaccine_repo: Arc<VaccineRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inventory_repo,
            vaccine_repo,
            config,
            clock,
        }
    }

    fn validate_qty(qty: i64) -> ApiResult<()> {
        if qty < 1 {
            return Err(ApiError::ValidationError(format!("数量必须 >= 1: {}", qty)));
        }
        Ok(())
    }

    // ==========================================
    // 批次维护
    // ==========================================

    /// 入库新批次
    ///
    /// # 返回
    /// - Ok(InventoryLot): 新批次（quantity_used = 0）
    /// - Err(ValidationError): 批号为空 / 数量为负 / 补货线为负
    /// - Err(NotFound): 疫苗不存在
    pub fn create_lot(&self, input: &NewInventoryLot) -> ApiResult<InventoryLot> {
        if input.lot_number.trim().is_empty() {
            return Err(ApiError::ValidationError("批号不能为空".to_string()));
        }
        if input.quantity < 0 {
            return Err(ApiError::ValidationError(format!(
                "入库数量不能为负数: {}",
                input.quantity
            )));
        }
        if input.reorder_level.map_or(false, |r| r < 0) {
            return Err(ApiError::ValidationError("补货线不能为负数".to_string()));
        }
        if self.vaccine_repo.find_by_id(&input.vaccine_id)?.is_none() {
            return Err(ApiError::not_found("Vaccine", &input.vaccine_id));
        }

        let reorder_level = match input.reorder_level {
            Some(level) => level,
            None => self
                .config
                .get_default_reorder_level()
                .map_err(|e| ApiError::InternalError(format!("读取配置失败: {}", e)))?,
        };

        let now = self.clock.now();
        let lot = InventoryLot {
            lot_id: Uuid::new_v4().to_string(),
            vaccine_id: input.vaccine_id.clone(),
            lot_number: input.lot_number.trim().to_string(),
            batch_number: input.batch_number.clone(),
            expiry_date: input.expiry_date,
            quantity_available: input.quantity,
            quantity_used: 0,
            reorder_level,
            unit_cost_cents: input.unit_cost_cents,
            supplier: input.supplier.clone(),
            received_date: input.received_date,
            storage_temperature: input.storage_temperature.clone(),
            notes: input.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        self.inventory_repo.insert(&lot)?;

        info!(
            lot_id = %lot.lot_id,
            vaccine_id = %lot.vaccine_id,
            lot_number = %lot.lot_number,
            quantity = lot.quantity_available,
            "批次已入库"
        );
        Ok(lot)
    }

    /// 更新批次（元数据 + 补货）
    pub fn update_lot(&self, lot_id: &str, update: &InventoryLotUpdate) -> ApiResult<InventoryLot> {
        if let Some(qty) = update.add_quantity {
            Self::validate_qty(qty)?;
        }
        if update.reorder_level.map_or(false, |r| r < 0) {
            return Err(ApiError::ValidationError("补货线不能为负数".to_string()));
        }

        self.inventory_repo
            .apply_update(lot_id, update, self.clock.now())?;
        if let Some(qty) = update.add_quantity {
            info!(lot_id, added = qty, "批次已补货");
        }
        self.get_lot(lot_id)
    }

    /// 删除批次（软删除）
    pub fn remove_lot(&self, lot_id: &str) -> ApiResult<()> {
        if !self.inventory_repo.soft_delete(lot_id, self.clock.now())? {
            return Err(ApiError::not_found("InventoryLot", lot_id));
        }
        info!(lot_id, "批次已删除");
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_lot(&self, lot_id: &str) -> ApiResult<InventoryLot> {
        self.inventory_repo
            .find_by_id(lot_id)?
            .ok_or_else(|| ApiError::not_found("InventoryLot", lot_id))
    }

    pub fn list_lots(&self) -> ApiResult<Vec<InventoryLot>> {
        Ok(self.inventory_repo.find_all()?)
    }

    /// 某疫苗的批次，按效期升序
    pub fn get_by_vaccine(&self, vaccine_id: &str) -> ApiResult<Vec<InventoryLot>> {
        Ok(self.inventory_repo.find_by_vaccine(vaccine_id)?)
    }

    /// 定位可用批次（批号匹配、有余量、效期 >= 今天）
    ///
    /// # 返回
    /// - Err(ResourceExhausted): 无匹配批次
    pub fn find_consumable_lot(&self, vaccine_id: &str, lot_number: &str) -> ApiResult<InventoryLot> {
        let today = self.clock.today();
        self.inventory_repo
            .find_consumable(vaccine_id, lot_number.trim(), today)?
            .ok_or_else(|| {
                ApiError::ResourceExhausted(format!(
                    "疫苗{}批号{}无可用库存或已过期",
                    vaccine_id, lot_number
                ))
            })
    }

    // ==========================================
    // 扣减 / 回补
    // ==========================================

    /// 扣减 qty 支
    pub fn consume(&self, lot_id: &str, qty: i64) -> ApiResult<InventoryLot> {
        Self::validate_qty(qty)?;
        if let Err(e) = self.inventory_repo.consume(lot_id, qty, self.clock.now()) {
            warn!(lot_id, qty, error = %e, "扣减失败");
            return Err(e.into());
        }
        debug!(lot_id, qty, "已扣减");
        self.get_lot(lot_id)
    }

    /// 回补 qty 支（不得超过已用量）
    pub fn restore(&self, lot_id: &str, qty: i64) -> ApiResult<InventoryLot> {
        Self::validate_qty(qty)?;
        if let Err(e) = self.inventory_repo.restore(lot_id, qty, self.clock.now()) {
            warn!(lot_id, qty, error = %e, "回补失败");
            return Err(e.into());
        }
        debug!(lot_id, qty, "已回补");
        self.get_lot(lot_id)
    }

    // ==========================================
    // 告警
    // ==========================================

    /// 低库存告警: available <= reorder_level
    pub fn low_stock_alerts(&self) -> ApiResult<Vec<InventoryAlert>> {
        let lots = self.inventory_repo.find_low_stock()?;
        Ok(lots
            .iter()
            .map(|lot| {
                let status = if lot.quantity_available == 0 {
                    LotAlertStatus::OutOfStock
                } else {
                    LotAlertStatus::LowStock
                };
                InventoryAlert::from_lot(lot, status)
            })
            .collect())
    }

    /// 过期告警: expiry_date < today 且仍有余量
    pub fn expired_lots(&self) -> ApiResult<Vec<InventoryAlert>> {
        let lots = self.inventory_repo.find_expired(self.clock.today())?;
        Ok(lots
            .iter()
            .map(|lot| InventoryAlert::from_lot(lot, LotAlertStatus::Expired))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inventory::StockLevel;
    use crate::domain::vaccine::NewVaccine;
    use crate::api::vaccine_api::VaccineApi;
    use crate::config::config_keys;
    use crate::engine::clock::FixedClock;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct Fixture {
        api: InventoryApi,
        config: Arc<ConfigManager>,
        vaccine_id: String,
    }

    fn setup() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(d(2026, 6, 1)));

        let vaccine_repo = Arc::new(VaccineRepository::new(conn.clone()));
        let vaccine = VaccineApi::new(vaccine_repo.clone(), clock.clone())
            .create_vaccine(&NewVaccine {
                vaccine_name: "MMR".to_string(),
                manufacturer: None,
                description: None,
                total_doses_required: 2,
                booster_required: false,
                booster_interval_months: None,
                recommended_age_months: Some(12),
            })
            .unwrap();

        let config = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());
        let api = InventoryApi::new(
            Arc::new(InventoryLotRepository::new(conn)),
            vaccine_repo,
            config.clone(),
            clock,
        );
        Fixture {
            api,
            config,
            vaccine_id: vaccine.vaccine_id,
        }
    }

    fn new_lot(vaccine_id: &str, lot_number: &str, qty: i64, expiry: NaiveDate) -> NewInventoryLot {
        NewInventoryLot {
            vaccine_id: vaccine_id.to_string(),
            lot_number: lot_number.to_string(),
            batch_number: None,
            expiry_date: expiry,
            quantity: qty,
            reorder_level: None,
            unit_cost_cents: None,
            supplier: None,
            received_date: d(2026, 5, 1),
            storage_temperature: None,
            notes: None,
        }
    }

    #[test]
    fn test_create_lot_uses_configured_reorder_level() {
        let f = setup();
        let lot = f
            .api
            .create_lot(&new_lot(&f.vaccine_id, "MMR-1", 20, d(2027, 1, 1)))
            .unwrap();
        assert_eq!(lot.reorder_level, 10);

        f.config
            .set_value(config_keys::DEFAULT_REORDER_LEVEL, "4")
            .unwrap();
        let lot = f
            .api
            .create_lot(&new_lot(&f.vaccine_id, "MMR-2", 20, d(2027, 1, 1)))
            .unwrap();
        assert_eq!(lot.reorder_level, 4);
    }

    #[test]
    fn test_create_lot_validation() {
        let f = setup();
        assert!(matches!(
            f.api.create_lot(&new_lot(&f.vaccine_id, " ", 5, d(2027, 1, 1))),
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            f.api.create_lot(&new_lot(&f.vaccine_id, "X", -1, d(2027, 1, 1))),
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            f.api.create_lot(&new_lot("no-such-vaccine", "X", 5, d(2027, 1, 1))),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_consume_restore_and_quantity_guards() {
        let f = setup();
        let lot = f
            .api
            .create_lot(&new_lot(&f.vaccine_id, "MMR-1", 2, d(2027, 1, 1)))
            .unwrap();

        assert!(matches!(
            f.api.consume(&lot.lot_id, 0),
            Err(ApiError::ValidationError(_))
        ));
        let after = f.api.consume(&lot.lot_id, 2).unwrap();
        assert_eq!(after.quantity_available, 0);
        assert_eq!(after.total_received(), 2);
        assert!(matches!(
            f.api.consume(&lot.lot_id, 1),
            Err(ApiError::ResourceExhausted(_))
        ));

        let restored = f.api.restore(&lot.lot_id, 2).unwrap();
        assert_eq!(restored.quantity_available, 2);
        assert_eq!(restored.quantity_used, 0);
        assert!(matches!(
            f.api.restore(&lot.lot_id, 1),
            Err(ApiError::ValidationError(_))
        ));
    }

    #[test]
    fn test_find_consumable_lot_exhausted() {
        let f = setup();
        f.api
            .create_lot(&new_lot(&f.vaccine_id, "OLD", 5, d(2026, 5, 31)))
            .unwrap();
        assert!(matches!(
            f.api.find_consumable_lot(&f.vaccine_id, "OLD"),
            Err(ApiError::ResourceExhausted(_))
        ));

        let expired = f.api.expired_lots().unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, LotAlertStatus::Expired);
    }

    #[test]
    fn test_low_stock_alert_status() {
        let f = setup();
        let empty = f
            .api
            .create_lot(&new_lot(&f.vaccine_id, "A", 0, d(2027, 1, 1)))
            .unwrap();
        f.api
            .create_lot(&new_lot(&f.vaccine_id, "B", 3, d(2027, 1, 1)))
            .unwrap();
        f.api
            .create_lot(&new_lot(&f.vaccine_id, "C", 50, d(2027, 1, 1)))
            .unwrap();

        let alerts = f.api.low_stock_alerts().unwrap();
        assert_eq!(alerts.len(), 2);
        let out = alerts.iter().find(|a| a.lot_id == empty.lot_id).unwrap();
        assert_eq!(out.status, LotAlertStatus::OutOfStock);
        assert!(alerts
            .iter()
            .any(|a| a.lot_number == "B" && a.status == LotAlertStatus::LowStock));

        // 补货后不再告警
        let refilled = f
            .api
            .update_lot(
                &empty.lot_id,
                &InventoryLotUpdate {
                    add_quantity: Some(30),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(refilled.quantity_available, 30);
        assert_eq!(f.api.low_stock_alerts().unwrap().len(), 1);
    }
}
