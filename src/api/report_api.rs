// ==========================================
// 免疫接种排程系统 - 统计报表 API
// ==========================================
// 职责: 概览统计、接种趋势、综合报表、完成率趋势
// 说明: 只读汇总，数据全部来自排程条目与库存批次
// ==========================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::engine::clock::Clock;
use crate::engine::reporting::{
    CompletionTrendPoint, ComprehensiveReport, InventoryCounts, MonthlyCount, ReportingEngine,
    StatsOverview,
};
use crate::repository::inventory_repo::InventoryLotRepository;
use crate::repository::schedule_repo::DoseScheduleRepository;
use crate::repository::vaccine_repo::VaccineRepository;

fn config_error(e: Box<dyn std::error::Error>) -> ApiError {
    ApiError::InternalError(format!("读取配置失败: {}", e))
}

// ==========================================
// ReportApi - 统计报表 API
// ==========================================
pub struct ReportApi {
    schedule_repo: Arc<DoseScheduleRepository>,
    vaccine_repo: Arc<VaccineRepository>,
    inventory_repo: Arc<InventoryLotRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
    engine: ReportingEngine,
}

impl ReportApi {
    pub fn new(
        schedule_repo: Arc<DoseScheduleRepository>,
        vaccine_repo: Arc<VaccineRepository>,
        inventory_repo: Arc<InventoryLotRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedule_repo,
            vaccine_repo,
            inventory_repo,
            config,
            clock,
            engine: ReportingEngine::new(),
        }
    }

    fn vaccine_names(&self) -> ApiResult<HashMap<String, String>> {
        Ok(self
            .vaccine_repo
            .find_all()?
            .into_iter()
            .map(|v| (v.vaccine_id, v.vaccine_name))
            .collect())
    }

    /// 月数参数: None 取默认值，必须在 [1, 上限] 内
    fn resolve_months(&self, months: Option<i64>) -> ApiResult<i64> {
        let max = self.config.get_trend_months_max().map_err(config_error)?;
        let months = match months {
            Some(m) => m,
            None => self.config.get_trend_months_default().map_err(config_error)?,
        };
        if months < 1 || months > max {
            return Err(ApiError::ValidationError(format!(
                "月数必须在 1..={} 之间: {}",
                max, months
            )));
        }
        Ok(months)
    }

    /// 概览统计
    ///
    /// total/administered/pending 受区间限制；upcoming/overdue 与库存计数为全量
    pub fn stats_overview(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> ApiResult<StatsOverview> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(ApiError::ValidationError(format!(
                    "开始日期不能晚于结束日期: {} > {}",
                    s, e
                )));
            }
        }

        let today = self.clock.today();
        let upcoming_days = self
            .config
            .get_stats_upcoming_days()
            .map_err(config_error)?;

        let until = u64::try_from(upcoming_days)
            .ok()
            .and_then(|days| today.checked_add_days(Days::new(days)))
            .ok_or_else(|| {
                ApiError::ValidationError(format!(
                    "概览待接种窗口超出日期范围: {} 天",
                    upcoming_days
                ))
            })?;

        let period_schedules = self.schedule_repo.find_active_in_range(start, end)?;
        let upcoming = self.schedule_repo.find_scheduled_between(today, until)?;
        let overdue = self.schedule_repo.find_scheduled_before(today)?;
        let inventory = InventoryCounts {
            active_vaccines: self.vaccine_repo.count_active()?,
            low_stock_lots: self.inventory_repo.find_low_stock()?.len() as i64,
            expired_lots: self.inventory_repo.find_expired(today)?.len() as i64,
        };

        Ok(self.engine.stats_overview(
            (start, end),
            &period_schedules,
            &upcoming,
            &overdue,
            inventory,
        ))
    }

    fn window_for(&self, months: i64) -> ApiResult<(NaiveDate, NaiveDate)> {
        self.engine
            .trend_window(self.clock.today(), months)
            .ok_or_else(|| {
                ApiError::ValidationError(format!("趋势窗口超出日期范围: {} 个月", months))
            })
    }

    /// 接种趋势: 最近 months 个月（按 30 天/月）每月接种量
    pub fn trends(&self, months: Option<i64>) -> ApiResult<Vec<MonthlyCount>> {
        let months = self.resolve_months(months)?;
        let (from, to) = self.window_for(months)?;
        let administered = self.schedule_repo.find_administered_between(from, to)?;
        Ok(self.engine.monthly_administrations(&administered))
    }

    /// 按疫苗综合报表（任意区间）
    pub fn administrations_by_vaccine(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ApiResult<ComprehensiveReport> {
        if start > end {
            return Err(ApiError::ValidationError(format!(
                "开始日期不能晚于结束日期: {} > {}",
                start, end
            )));
        }
        let period_schedules = self
            .schedule_repo
            .find_active_in_range(Some(start), Some(end))?;
        let administered = self.schedule_repo.find_administered_between(start, end)?;
        let report = self.engine.comprehensive(
            start,
            end,
            &period_schedules,
            &administered,
            &self.vaccine_names()?,
        );
        info!(
            start = %start,
            end = %end,
            total = report.total_schedules,
            administered = report.total_administered,
            "综合报表已生成"
        );
        Ok(report)
    }

    /// 年度综合报表（year 为 None 时取今年）
    pub fn comprehensive_report(&self, year: Option<i32>) -> ApiResult<ComprehensiveReport> {
        let year = year.unwrap_or_else(|| self.clock.today().year());
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| ApiError::ValidationError(format!("无效年份: {}", year)))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| ApiError::ValidationError(format!("无效年份: {}", year)))?;
        self.administrations_by_vaccine(start, end)
    }

    /// 完成率趋势: 最近 months 个月内按排程月份统计
    pub fn completion_trend(&self, months: Option<i64>) -> ApiResult<Vec<CompletionTrendPoint>> {
        let months = self.resolve_months(months)?;
        let (from, to) = self.window_for(months)?;
        let schedules = self
            .schedule_repo
            .find_active_in_range(Some(from), Some(to))?;
        Ok(self.engine.completion_trend(&schedules))
    }
}
