// ==========================================
// 免疫接种排程系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 说明: 全部仓储共享同一个 Arc<Mutex<Connection>>
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{
    AdministrationApi, InventoryApi, ReportApi, ScheduleApi, StatusApi, VaccineApi,
};
use crate::config::config_manager::ConfigManager;
use crate::db::{init_schema, open_sqlite_connection, read_schema_version};
use crate::engine::{AllowAllDirectory, Clock, DoctorDirectory, PatientDirectory, SystemClock};
use crate::repository::{DoseScheduleRepository, InventoryLotRepository, VaccineRepository};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 共享连接
    pub conn: Arc<Mutex<Connection>>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 疫苗目录API
    pub vaccine_api: Arc<VaccineApi>,

    /// 疫苗库存API
    pub inventory_api: Arc<InventoryApi>,

    /// 剂次排程API
    pub schedule_api: Arc<ScheduleApi>,

    /// 接种协调API
    pub administration_api: Arc<AdministrationApi>,

    /// 接种状态API
    pub status_api: Arc<StatusApi>,

    /// 统计报表API
    pub report_api: Arc<ReportApi>,
}

impl AppState {
    /// 使用系统时钟与放行目录创建 AppState
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        let directory = Arc::new(AllowAllDirectory);
        Self::with_collaborators(
            db_path,
            Arc::new(SystemClock),
            directory.clone(),
            directory,
        )
    }

    /// 注入时钟与外部目录创建 AppState
    ///
    /// 该方法会：
    /// 1. 打开共享连接并建表（幂等）
    /// 2. 初始化所有Repository
    /// 3. 创建所有API实例
    pub fn with_collaborators(
        db_path: String,
        clock: Arc<dyn Clock>,
        patients: Arc<dyn PatientDirectory>,
        doctors: Arc<dyn DoctorDirectory>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        let schema_version =
            read_schema_version(&conn).map_err(|e| format!("读取schema_version失败: {}", e))?;
        tracing::debug!(?schema_version, "schema 已就绪");
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let vaccine_repo = Arc::new(VaccineRepository::new(conn.clone()));
        let schedule_repo = Arc::new(DoseScheduleRepository::new(conn.clone()));
        let inventory_repo = Arc::new(InventoryLotRepository::new(conn.clone()));

        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        // ==========================================
        // 初始化API层
        // ==========================================
        let vaccine_api = Arc::new(VaccineApi::new(vaccine_repo.clone(), clock.clone()));
        let inventory_api = Arc::new(InventoryApi::new(
            inventory_repo.clone(),
            vaccine_repo.clone(),
            config_manager.clone(),
            clock.clone(),
        ));
        let schedule_api = Arc::new(ScheduleApi::new(
            schedule_repo.clone(),
            vaccine_repo.clone(),
            patients,
            clock.clone(),
        ));
        let administration_api = Arc::new(AdministrationApi::new(
            conn.clone(),
            doctors,
            clock.clone(),
        ));
        let status_api = Arc::new(StatusApi::new(
            schedule_repo.clone(),
            vaccine_repo.clone(),
            config_manager.clone(),
            clock.clone(),
        ));
        let report_api = Arc::new(ReportApi::new(
            schedule_repo,
            vaccine_repo,
            inventory_repo,
            config_manager.clone(),
            clock,
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            conn,
            config_manager,
            vaccine_api,
            inventory_api,
            schedule_api,
            administration_api,
            status_api,
            report_api,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

/// 默认数据库路径
///
/// 优先读取环境变量 VACCINATION_DB_PATH，否则放在用户数据目录下
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("VACCINATION_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./immunization.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("immunization-core-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("immunization-core");
        }

        // 确保目录存在；失败时由打开连接报错
        std::fs::create_dir_all(&path).ok();
        path = path.join("immunization.db");
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_app_state_initializes_schema() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let state = AppState::new(path.clone()).unwrap();
        assert_eq!(state.get_db_path(), path);
        assert!(state.vaccine_api.list_active().unwrap().is_empty());

        // 重复初始化同一文件（幂等建表）
        let again = AppState::new(path).unwrap();
        assert!(again.inventory_api.list_lots().unwrap().is_empty());
    }
}
