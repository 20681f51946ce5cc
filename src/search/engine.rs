use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use super::classify::{Response, classify};
use super::events::{AttemptStatus, SearchEvent, SearchObserver};
use crate::code::{CODE_END, CODE_START, UnlockCode, progress_percent};
use crate::config::Settings;
use crate::device::{DeviceCommand, DeviceError, DeviceInfo, UnlockOracle};
use crate::imei::Imei;
use crate::progress::{Checkpoint, ProgressStore, UnlockRecord};

/// 搜索引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Running,
    Success,
    Exhausted,
    AbortedUnknownOutput,
    Interrupted,
}

/// 搜索结束的方式
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// 找到解锁码
    Unlocked { code: UnlockCode, record: UnlockRecord },
    /// 搜索空间已耗尽
    Exhausted,
    /// bootloader 返回了无法识别的内容
    UnknownOutput { candidate: UnlockCode, output: String },
    /// 被用户中断
    Interrupted,
}

impl SearchOutcome {
    pub fn state(&self) -> SearchState {
        match self {
            SearchOutcome::Unlocked { .. } => SearchState::Success,
            SearchOutcome::Exhausted => SearchState::Exhausted,
            SearchOutcome::UnknownOutput { .. } => SearchState::AbortedUnknownOutput,
            SearchOutcome::Interrupted => SearchState::Interrupted,
        }
    }
}

/// 引擎构造错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("步长为 0，搜索无法前进")]
    ZeroIncrement,

    #[error("检查点步长 {found} 与当前 IMEI 的步长 {expected} 不一致")]
    CheckpointMismatch { expected: u64, found: u64 },

    #[error("检查点中的候选码无效: {0}")]
    InvalidCheckpoint(String),
}

/// 搜索参数
pub struct SearchParams<'a> {
    pub imei: &'a Imei,
    pub settings: &'a Settings,
    pub oracle: &'a dyn UnlockOracle,
    pub store: &'a mut dyn ProgressStore,
    pub observer: &'a mut dyn SearchObserver,
    /// 置位后在下一个迭代边界停止
    pub cancel: &'a AtomicBool,
}

/// 解锁码搜索状态机，一次只测试一个候选码
pub struct SearchEngine<'a> {
    imei: Imei,
    settings: &'a Settings,
    oracle: &'a dyn UnlockOracle,
    store: &'a mut dyn ProgressStore,
    observer: &'a mut dyn SearchObserver,
    cancel: &'a AtomicBool,
    device_info: Option<DeviceInfo>,
    increment: u64,
    candidate: u64,
    attempts: u64,
    last_tested: Option<UnlockCode>,
    protection: bool,
    started: Instant,
    outcome: Option<SearchOutcome>,
}

impl<'a> SearchEngine<'a> {
    pub fn new(params: SearchParams<'a>) -> Result<Self, SearchError> {
        let increment = params.imei.increment();
        if increment == 0 {
            return Err(SearchError::ZeroIncrement);
        }

        Ok(Self {
            imei: params.imei.clone(),
            settings: params.settings,
            oracle: params.oracle,
            store: params.store,
            observer: params.observer,
            cancel: params.cancel,
            device_info: None,
            increment,
            candidate: CODE_START,
            attempts: 0,
            last_tested: None,
            protection: params.settings.auto_reboot,
            started: Instant::now(),
            outcome: None,
        })
    }

    /// 覆盖由 IMEI 推导的步长
    pub fn with_increment(mut self, increment: u64) -> Result<Self, SearchError> {
        if increment == 0 {
            return Err(SearchError::ZeroIncrement);
        }
        self.increment = increment;
        Ok(self)
    }

    /// 结果记录中附带的设备信息
    pub fn with_device_info(mut self, info: Option<DeviceInfo>) -> Self {
        self.device_info = info;
        self
    }

    /// 从检查点之后的下一个候选码继续
    pub fn resume_from(mut self, checkpoint: &Checkpoint) -> Result<Self, SearchError> {
        if checkpoint.increment != self.increment {
            return Err(SearchError::CheckpointMismatch {
                expected: self.increment,
                found: checkpoint.increment,
            });
        }

        let last = checkpoint
            .last_code()
            .filter(|code| code.in_range() && (code.value() - CODE_START) % self.increment == 0)
            .ok_or_else(|| SearchError::InvalidCheckpoint(checkpoint.last_code.clone()))?;

        self.candidate = last.value() + self.increment;
        self.attempts = checkpoint.attempts;
        self.last_tested = Some(last);
        tracing::info!(
            "从检查点继续: 上次 {last}，已尝试 {} 次",
            checkpoint.attempts
        );
        Ok(self)
    }

    pub fn state(&self) -> SearchState {
        self.outcome
            .as_ref()
            .map_or(SearchState::Running, SearchOutcome::state)
    }

    pub fn increment(&self) -> u64 {
        self.increment
    }

    /// 下一个要测试的候选码
    pub fn candidate(&self) -> UnlockCode {
        UnlockCode::new(self.candidate)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// 最后一个完成测试的候选码
    pub fn last_tested(&self) -> Option<UnlockCode> {
        self.last_tested
    }

    /// 是否已检测到重启保护
    pub fn protection_active(&self) -> bool {
        self.protection
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 运行到终止状态
    pub fn run(&mut self) -> SearchOutcome {
        tracing::info!(
            "开始搜索: 起点 {}，步长 {}，预防性重启 {}",
            self.candidate(),
            self.increment,
            if self.protection { "启用" } else { "未启用" }
        );
        loop {
            if let Some(outcome) = self.step() {
                return outcome;
            }
        }
    }

    /// 执行一次迭代，进入终止状态时返回结果
    pub fn step(&mut self) -> Option<SearchOutcome> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.clone());
        }
        if self.candidate >= CODE_END {
            return Some(self.exhaust());
        }
        if self.interrupted() {
            return Some(self.finish(SearchOutcome::Interrupted));
        }

        let code = self.candidate();
        let status = self.status();
        self.observer.on_event(&SearchEvent::Attempt(status));

        let result = self.oracle.attempt_unlock(code);
        // 中断信号同样会打断正在运行的 fastboot，这次的输出不可信
        if self.interrupted() {
            return Some(self.finish(SearchOutcome::Interrupted));
        }

        match result {
            Ok(output) => {
                tracing::debug!("{code}: {}", output.trim());
                self.observer.on_event(&SearchEvent::Output {
                    candidate: code,
                    output: output.clone(),
                });

                match classify(&output) {
                    Response::Success => return Some(self.succeed(code)),
                    Response::Protection => {
                        self.handle_protection(code);
                        return None;
                    }
                    Response::Failure => {}
                    Response::Unknown if self.settings.tolerate_unknown_output => {
                        tracing::warn!("{code}: 无法识别的应答，按失败处理");
                        self.observer
                            .on_event(&SearchEvent::UnknownTolerated { candidate: code, output });
                    }
                    Response::Unknown => {
                        tracing::error!("{code}: 无法识别的应答: {output}");
                        return Some(self.finish(SearchOutcome::UnknownOutput {
                            candidate: code,
                            output,
                        }));
                    }
                }
            }
            Err(DeviceError::Timeout(limit)) => {
                tracing::warn!("{code}: 命令超时，设备可能无响应");
                self.observer
                    .on_event(&SearchEvent::Timeout { candidate: code, limit });
                if self.protection {
                    self.issue(DeviceCommand::RebootBootloader);
                    pause(self.settings.recovery_pause);
                    return None;
                }
            }
            Err(e) => {
                tracing::warn!("{code}: 尝试失败: {e}");
                self.observer.on_event(&SearchEvent::AttemptFailed {
                    candidate: code,
                    message: e.to_string(),
                });
            }
        }

        self.attempts += 1;
        self.last_tested = Some(code);

        let save_every = self.settings.save_every;
        if save_every > 0 && self.attempts % save_every == 0 {
            self.save_checkpoint(code);
        }

        let reboot_every = self.settings.reboot_every;
        if self.protection && reboot_every > 0 && self.attempts % reboot_every == 0 {
            tracing::debug!("预防性重启 bootloader");
            self.issue(DeviceCommand::RebootBootloader);
            pause(self.settings.preventive_pause);
        }

        self.candidate = self.candidate.saturating_add(self.increment);
        if self.candidate >= CODE_END {
            return Some(self.exhaust());
        }
        None
    }

    fn status(&self) -> AttemptStatus {
        AttemptStatus {
            candidate: self.candidate(),
            percent: progress_percent(self.candidate),
            attempts: self.attempts,
            elapsed: self.elapsed(),
        }
    }

    fn interrupted(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn succeed(&mut self, code: UnlockCode) -> SearchOutcome {
        self.attempts += 1;
        self.last_tested = Some(code);

        let record = UnlockRecord {
            unlock_code: code.to_string(),
            imei: self.imei.clone(),
            attempts: self.attempts,
            time_elapsed: self.elapsed().as_secs_f64(),
            timestamp: Local::now(),
            device_info: self.device_info.clone(),
        };
        tracing::info!("解锁成功: {code}");

        if let Err(e) = self.store.save_result(&record) {
            tracing::error!("保存结果失败: {e}");
            self.observer.on_event(&SearchEvent::StoreFailed {
                message: e.to_string(),
            });
        }

        self.finish(SearchOutcome::Unlocked { code, record })
    }

    fn handle_protection(&mut self, code: UnlockCode) {
        tracing::warn!("{code}: 检测到 bootloader 重启保护，启用预防性重启");
        self.protection = true;
        self.observer
            .on_event(&SearchEvent::ProtectionDetected { candidate: code });
        self.issue(DeviceCommand::WaitForDevice);
        self.issue(DeviceCommand::RebootToBootloader);
        pause(self.settings.protection_pause);
    }

    fn save_checkpoint(&mut self, code: UnlockCode) {
        let checkpoint = Checkpoint {
            last_code: code.to_string(),
            attempts: self.attempts,
            progress: code.progress_percent(),
            increment: self.increment,
            timestamp: Local::now(),
        };

        match self.store.save_checkpoint(&checkpoint) {
            Ok(()) => {
                tracing::debug!("检查点已保存: {code} ({} 次)", self.attempts);
                self.observer.on_event(&SearchEvent::CheckpointSaved {
                    attempts: self.attempts,
                    location: self.store.checkpoint_location(),
                });
            }
            Err(e) => {
                tracing::warn!("保存检查点失败: {e}");
                self.observer.on_event(&SearchEvent::StoreFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    fn exhaust(&mut self) -> SearchOutcome {
        tracing::warn!("搜索空间已耗尽，共尝试 {} 次", self.attempts);
        self.issue(DeviceCommand::Reboot);
        self.finish(SearchOutcome::Exhausted)
    }

    fn finish(&mut self, outcome: SearchOutcome) -> SearchOutcome {
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// 尽力而为，失败只记录
    fn issue(&mut self, command: DeviceCommand) {
        self.observer.on_event(&SearchEvent::Command(command));
        if let Err(e) = self.oracle.run(command) {
            tracing::warn!("{command:?} 失败: {e}");
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
