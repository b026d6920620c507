// ==========================================
// 免疫接种排程系统 - 统计报表引擎
// ==========================================
// 职责: 概览统计、月度趋势、按疫苗汇总、完成率趋势
// 红线: Engine 不拼 SQL；只对仓储加载的条目做聚合
// ==========================================

use crate::domain::schedule::DoseSchedule;
use crate::domain::types::DoseState;
use crate::engine::status::percentage;
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::instrument;

/// 库存侧计数（由调用方从库存仓储获取）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryCounts {
    pub active_vaccines: i64,
    pub low_stock_lots: i64,
    pub expired_lots: i64,
}

/// 概览统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsOverview {
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub total_schedules: i64,
    pub administered_count: i64,
    pub pending_count: i64,
    pub upcoming_count: i64,
    pub overdue_count: i64,
    pub completion_rate: f64,
    pub total_vaccines: i64,
    pub low_stock_lots: i64,
    pub expired_lots: i64,
}

/// (年, 月) 计数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCount {
    pub year: i32,
    pub month: u32,
    pub count: i64,
}

/// 按疫苗汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccineBreakdown {
    pub vaccine_id: String,
    pub vaccine_name: String,
    pub total: i64,
    pub administered: i64,
    pub completion_rate: f64,
}

/// 综合报表（按区间）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveReport {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_schedules: i64,
    pub total_administered: i64,
    pub completion_rate: f64,
    pub by_vaccine: Vec<VaccineBreakdown>,
    pub by_month: Vec<MonthlyCount>,
}

/// 完成率趋势点（按排程月份）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionTrendPoint {
    pub year: i32,
    pub month: u32,
    pub total: i64,
    pub administered: i64,
    pub completion_rate: f64,
}

// ==========================================
// ReportingEngine - 统计报表引擎
// ==========================================
#[derive(Debug, Default)]
pub struct ReportingEngine;

impl ReportingEngine {
    pub fn new() -> Self {
        Self
    }

    /// 趋势窗口: [today - months*30 天, today]
    ///
    /// # 返回
    /// - None: months 为负，或窗口起点超出可表示的日期范围
    pub fn trend_window(&self, today: NaiveDate, months: i64) -> Option<(NaiveDate, NaiveDate)> {
        let days = u64::try_from(months.checked_mul(30)?).ok()?;
        let start = today.checked_sub_days(Days::new(days))?;
        Some((start, today))
    }

    /// 概览统计
    ///
    /// # 参数
    /// - period_schedules: 区间内未取消条目（决定 total/administered/pending）
    /// - upcoming: 今天起 N 天内待接种条目（全量，不受区间限制）
    /// - overdue: 逾期待接种条目（全量，不受区间限制）
    #[instrument(skip_all, fields(period = period_schedules.len()))]
    pub fn stats_overview(
        &self,
        period: (Option<NaiveDate>, Option<NaiveDate>),
        period_schedules: &[DoseSchedule],
        upcoming: &[DoseSchedule],
        overdue: &[DoseSchedule],
        inventory: InventoryCounts,
    ) -> StatsOverview {
        let active = period_schedules
            .iter()
            .filter(|s| s.state != DoseState::Cancelled);
        let (mut total, mut administered) = (0i64, 0i64);
        for s in active {
            total += 1;
            if s.is_administered() {
                administered += 1;
            }
        }

        StatsOverview {
            period_start: period.0,
            period_end: period.1,
            total_schedules: total,
            administered_count: administered,
            pending_count: total - administered,
            upcoming_count: count_state(upcoming, DoseState::Scheduled),
            overdue_count: count_state(overdue, DoseState::Scheduled),
            completion_rate: percentage(administered, total),
            total_vaccines: inventory.active_vaccines,
            low_stock_lots: inventory.low_stock_lots,
            expired_lots: inventory.expired_lots,
        }
    }

    /// 按接种月份统计接种量（仅有数据的月份），升序
    pub fn monthly_administrations(&self, administered: &[DoseSchedule]) -> Vec<MonthlyCount> {
        let mut buckets: BTreeMap<(i32, u32), i64> = BTreeMap::new();
        for s in administered.iter().filter(|s| s.is_administered()) {
            if let Some(date) = s.administered_date {
                *buckets.entry((date.year(), date.month())).or_insert(0) += 1;
            }
        }
        buckets
            .into_iter()
            .map(|((year, month), count)| MonthlyCount { year, month, count })
            .collect()
    }

    /// 按疫苗汇总，按疫苗名称排序
    pub fn by_vaccine(
        &self,
        period_schedules: &[DoseSchedule],
        vaccine_names: &HashMap<String, String>,
    ) -> Vec<VaccineBreakdown> {
        let mut buckets: HashMap<&str, (i64, i64)> = HashMap::new();
        for s in period_schedules
            .iter()
            .filter(|s| s.state != DoseState::Cancelled)
        {
            let bucket = buckets.entry(s.vaccine_id.as_str()).or_insert((0, 0));
            bucket.0 += 1;
            if s.is_administered() {
                bucket.1 += 1;
            }
        }

        let mut rows: Vec<VaccineBreakdown> = buckets
            .into_iter()
            .map(|(vaccine_id, (total, administered))| VaccineBreakdown {
                vaccine_id: vaccine_id.to_string(),
                vaccine_name: vaccine_names
                    .get(vaccine_id)
                    .cloned()
                    .unwrap_or_else(|| vaccine_id.to_string()),
                total,
                administered,
                completion_rate: percentage(administered, total),
            })
            .collect();
        rows.sort_by(|a, b| {
            a.vaccine_name
                .cmp(&b.vaccine_name)
                .then_with(|| a.vaccine_id.cmp(&b.vaccine_id))
        });
        rows
    }

    /// 综合报表
    ///
    /// # 参数
    /// - period_schedules: scheduled_date 落在区间内的条目
    /// - administered_in_period: administered_date 落在区间内的条目
    #[instrument(skip(self, period_schedules, administered_in_period, vaccine_names))]
    pub fn comprehensive(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
        period_schedules: &[DoseSchedule],
        administered_in_period: &[DoseSchedule],
        vaccine_names: &HashMap<String, String>,
    ) -> ComprehensiveReport {
        let by_vaccine = self.by_vaccine(period_schedules, vaccine_names);
        let total: i64 = by_vaccine.iter().map(|v| v.total).sum();
        let administered: i64 = by_vaccine.iter().map(|v| v.administered).sum();

        ComprehensiveReport {
            period_start,
            period_end,
            total_schedules: total,
            total_administered: administered,
            completion_rate: percentage(administered, total),
            by_vaccine,
            by_month: self.monthly_administrations(administered_in_period),
        }
    }

    /// 完成率趋势（按排程月份分组），升序
    pub fn completion_trend(&self, schedules: &[DoseSchedule]) -> Vec<CompletionTrendPoint> {
        let mut buckets: BTreeMap<(i32, u32), (i64, i64)> = BTreeMap::new();
        for s in schedules.iter().filter(|s| s.state != DoseState::Cancelled) {
            let key = (s.scheduled_date.year(), s.scheduled_date.month());
            let bucket = buckets.entry(key).or_insert((0, 0));
            bucket.0 += 1;
            if s.is_administered() {
                bucket.1 += 1;
            }
        }
        buckets
            .into_iter()
            .map(|((year, month), (total, administered))| CompletionTrendPoint {
                year,
                month,
                total,
                administered,
                completion_rate: percentage(administered, total),
            })
            .collect()
    }
}

fn count_state(schedules: &[DoseSchedule], state: DoseState) -> i64 {
    schedules.iter().filter(|s| s.state == state).count() as i64
}
