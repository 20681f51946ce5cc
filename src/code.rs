use std::fmt;

/// 搜索起点（含）: 10^15
pub const CODE_START: u64 = 1_000_000_000_000_000;
/// 搜索终点（不含）: 10^16
pub const CODE_END: u64 = 10_000_000_000_000_000;

/// 候选解锁码，输出时补零到 16 位
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnlockCode(u64);

impl UnlockCode {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// 是否仍在搜索空间 [10^15, 10^16) 内
    pub const fn in_range(self) -> bool {
        self.0 >= CODE_START && self.0 < CODE_END
    }

    /// 当前候选码在搜索空间中的进度（百分比）
    pub fn progress_percent(self) -> f64 {
        progress_percent(self.0)
    }

    /// 解析 16 位数字字符串
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok().map(Self)
    }
}

impl fmt::Display for UnlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016}", self.0)
    }
}

/// (candidate − 10^15) / (10^16 − 10^15) × 100
#[must_use]
pub fn progress_percent(candidate: u64) -> f64 {
    let done = candidate.saturating_sub(CODE_START) as f64;
    done / (CODE_END - CODE_START) as f64 * 100.0
}

/// 固定步长下最多需要的迭代次数
#[must_use]
pub fn max_iterations(increment: u64) -> u64 {
    (CODE_END - CODE_START).div_ceil(increment)
}
