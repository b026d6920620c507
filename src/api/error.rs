// ==========================================
// 免疫接种排程系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换Repository错误为用户友好的错误消息
// 分类: 输入校验 / 资源未找到 / 状态冲突 / 库存耗尽 / 基础设施
// ==========================================

use crate::domain::types::DoseState;
use crate::engine::dose_rules::DoseRuleViolation;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
/// 所有错误信息必须包含显式原因
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    /// 输入非法（剂次越界、日期越界、空字段、数量非法、超额回补）
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 状态机不允许的转换（无副作用）
    #[error("状态冲突: current={current}, attempted={attempted}")]
    StateConflict { current: String, attempted: String },

    /// 无可用批次或库存不足
    #[error("库存耗尽: {0}")]
    ResourceExhausted(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ApiError {
    /// 状态冲突
    ///
    /// # 参数
    /// - current: 条目当前状态
    /// - attempted: 试图执行的操作（ADMINISTER / CANCEL_ADMINISTRATION / RESCHEDULE / REMOVE ...）
    pub fn state_conflict(current: DoseState, attempted: &str) -> Self {
        ApiError::StateConflict {
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        ApiError::NotFound(format!("{}(id={})不存在", entity, id))
    }
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将Repository层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 库存争用
            RepositoryError::InsufficientStock {
                lot_id,
                requested,
                available,
            } => ApiError::ResourceExhausted(format!(
                "批次{}库存不足（请求{}，可用{}）",
                lot_id, requested, available
            )),
            RepositoryError::OverRestore {
                lot_id,
                requested,
                used,
            } => ApiError::ValidationError(format!(
                "批次{}回补量超出已用量（请求{}，已用{}）",
                lot_id, requested, used
            )),

            // 数据库错误
            RepositoryError::NotFound { entity, id } => ApiError::not_found(&entity, &id),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::ValidationError(format!("外键约束违反: {}", msg))
            }
            RepositoryError::CheckConstraintViolation(msg) => {
                ApiError::ValidationError(format!("CHECK 约束违反: {}", msg))
            }
        }
    }
}

impl From<DoseRuleViolation> for ApiError {
    fn from(violation: DoseRuleViolation) -> Self {
        ApiError::ValidationError(violation.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_errors_map_to_business_taxonomy() {
        let exhausted: ApiError = RepositoryError::InsufficientStock {
            lot_id: "L1".to_string(),
            requested: 1,
            available: 0,
        }
        .into();
        assert!(matches!(exhausted, ApiError::ResourceExhausted(_)));

        let over: ApiError = RepositoryError::OverRestore {
            lot_id: "L1".to_string(),
            requested: 2,
            used: 1,
        }
        .into();
        assert!(matches!(over, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_not_found_and_database_error_mapping() {
        let err: ApiError = RepositoryError::not_found("DoseSchedule", "S1").into();
        match err {
            ApiError::NotFound(msg) => assert!(msg.contains("S1")),
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let err: ApiError = RepositoryError::LockError("poisoned".to_string()).into();
        assert!(matches!(err, ApiError::DatabaseConnectionError(_)));

        let err: ApiError =
            RepositoryError::UniqueConstraintViolation("schedule_code".to_string()).into();
        assert!(matches!(err, ApiError::DatabaseError(_)));

        let err: ApiError = RepositoryError::CheckConstraintViolation("state".to_string()).into();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_rule_violation_is_validation_error() {
        let err: ApiError = DoseRuleViolation::DoseNumberExceedsTotal {
            dose_number: 4,
            total: 3,
        }
        .into();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }
}
