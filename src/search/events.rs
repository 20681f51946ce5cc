use std::time::Duration;

use crate::code::UnlockCode;
use crate::device::DeviceCommand;

/// 当前尝试的进度快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptStatus {
    pub candidate: UnlockCode,
    pub percent: f64,
    pub attempts: u64,
    pub elapsed: Duration,
}

impl AttemptStatus {
    /// 平均速度（次/秒），不足一秒按一秒计
    pub fn rate(&self) -> f64 {
        self.attempts as f64 / self.elapsed.as_secs_f64().max(1.0)
    }
}

/// 搜索过程中发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// 即将测试一个候选码
    Attempt(AttemptStatus),
    /// bootloader 的原始应答
    Output { candidate: UnlockCode, output: String },
    /// 检测到重启保护，已启用预防性重启
    ProtectionDetected { candidate: UnlockCode },
    /// 尝试超时
    Timeout { candidate: UnlockCode, limit: Duration },
    /// 尝试失败（无法启动等）
    AttemptFailed { candidate: UnlockCode, message: String },
    /// 无法识别的应答被当作失败
    UnknownTolerated { candidate: UnlockCode, output: String },
    /// 发出了一条设备命令
    Command(DeviceCommand),
    /// 检查点已保存
    CheckpointSaved { attempts: u64, location: String },
    /// 存储失败
    StoreFailed { message: String },
}

/// 搜索事件的消费者（显示、日志等）
pub trait SearchObserver {
    fn on_event(&mut self, event: &SearchEvent);
}

impl SearchObserver for () {
    fn on_event(&mut self, _event: &SearchEvent) {}
}

impl SearchObserver for Vec<SearchEvent> {
    fn on_event(&mut self, event: &SearchEvent) {
        self.push(event.clone());
    }
}
