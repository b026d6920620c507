// ==========================================
// 免疫接种排程系统 - 命令行入口
// ==========================================
// 职责: 初始化日志 → 打开默认数据库并建表 → 输出概览与库存告警
// ==========================================

use std::process::ExitCode;

use anyhow::Context;
use immunization_core::app::{get_default_db_path, AppState};
use immunization_core::logging;

fn run() -> anyhow::Result<()> {
    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path.clone())
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("打开数据库失败: {}", db_path))?;

    let stats = state
        .report_api
        .stats_overview(None, None)
        .context("统计失败")?;
    tracing::info!(
        total = stats.total_schedules,
        administered = stats.administered_count,
        pending = stats.pending_count,
        upcoming = stats.upcoming_count,
        overdue = stats.overdue_count,
        completion_rate = stats.completion_rate,
        vaccines = stats.total_vaccines,
        "接种概览"
    );

    let low_stock = state
        .inventory_api
        .low_stock_alerts()
        .context("低库存查询失败")?;
    for alert in &low_stock {
        tracing::warn!(
            lot_id = %alert.lot_id,
            lot_number = %alert.lot_number,
            available = alert.quantity_available,
            reorder_level = alert.reorder_level,
            status = %alert.status,
            "低库存批次"
        );
    }

    let expired = state
        .inventory_api
        .expired_lots()
        .context("过期批次查询失败")?;
    for alert in &expired {
        tracing::warn!(
            lot_id = %alert.lot_id,
            lot_number = %alert.lot_number,
            expiry_date = %alert.expiry_date,
            available = alert.quantity_available,
            "过期批次仍有余量"
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", immunization_core::APP_NAME);
    tracing::info!("系统版本: {}", immunization_core::VERSION);
    tracing::info!("==================================================");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
