// ==========================================
// 免疫接种排程系统 - 领域类型定义
// ==========================================
// 职责: 剂次状态机、库存告警等枚举
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 剂次状态 (Dose State)
// ==========================================
// 状态机:
//   Scheduled → Administered → Scheduled (撤销接种)
//   Scheduled → Cancelled (逻辑删除, 终态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoseState {
    Scheduled,    // 已排程
    Administered, // 已接种
    Cancelled,    // 已取消(逻辑删除)
}

impl DoseState {
    /// 数据库存储值
    pub fn to_db_str(&self) -> &'static str {
        match self {
            DoseState::Scheduled => "SCHEDULED",
            DoseState::Administered => "ADMINISTERED",
            DoseState::Cancelled => "CANCELLED",
        }
    }

    /// 从数据库字符串解析
    ///
    /// 未知值返回 None，由调用方决定如何处理
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "SCHEDULED" => Some(DoseState::Scheduled),
            "ADMINISTERED" => Some(DoseState::Administered),
            "CANCELLED" => Some(DoseState::Cancelled),
            _ => None,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DoseState::Cancelled)
    }
}

impl fmt::Display for DoseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 库存告警状态 (Lot Alert Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotAlertStatus {
    LowStock,   // 低于补货线
    OutOfStock, // 无可用库存
    Expired,    // 已过期但仍有余量
}

impl fmt::Display for LotAlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotAlertStatus::LowStock => write!(f, "LOW_STOCK"),
            LotAlertStatus::OutOfStock => write!(f, "OUT_OF_STOCK"),
            LotAlertStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dose_state_db_round_trip() {
        for state in [DoseState::Scheduled, DoseState::Administered, DoseState::Cancelled] {
            assert_eq!(DoseState::from_db_str(state.to_db_str()), Some(state));
        }
        assert_eq!(DoseState::from_db_str("administered"), Some(DoseState::Administered));
        assert_eq!(DoseState::from_db_str("DELETED"), None);
    }

    #[test]
    fn test_dose_state_serde_matches_db() {
        let json = serde_json::to_string(&DoseState::Administered).unwrap();
        assert_eq!(json, "\"ADMINISTERED\"");
        assert!(DoseState::Cancelled.is_terminal());
        assert!(!DoseState::Scheduled.is_terminal());
    }
}
