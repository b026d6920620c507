// ==========================================
// 免疫接种排程系统 - 时钟抽象
// ==========================================
// 职责: 为"今天"相关的规则提供可注入的时间来源
// 说明: 引擎与 API 不直接调用 Local::now，测试中注入 FixedClock
// ==========================================

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};

/// 时间来源 Trait
pub trait Clock: Send + Sync {
    /// 当前本地日期
    fn today(&self) -> NaiveDate;

    /// 当前本地时间（用于 created_at / updated_at）
    fn now(&self) -> NaiveDateTime;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// 固定时钟（测试 / 回放）
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: NaiveDateTime,
}

impl FixedClock {
    /// 固定在某日 09:00
    pub fn on(date: NaiveDate) -> Self {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN);
        Self {
            at: date.and_time(nine),
        }
    }

    pub fn at(at: NaiveDateTime) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.at.date()
    }

    fn now(&self) -> NaiveDateTime {
        self.at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_is_stable() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let clock = FixedClock::on(day);
        assert_eq!(clock.today(), day);
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().date(), day);
    }
}
