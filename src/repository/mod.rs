// ==========================================
// 免疫接种排程系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: 需要跨表原子性的操作提供 *_tx 关联函数，事务由调用方持有
// ==========================================

pub mod error;
pub mod inventory_repo;
pub mod schedule_repo;
pub mod vaccine_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use inventory_repo::InventoryLotRepository;
pub use schedule_repo::DoseScheduleRepository;
pub use vaccine_repo::VaccineRepository;
