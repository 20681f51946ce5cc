pub mod cli;
pub mod code;
pub mod config;
pub mod device;
pub mod imei;
pub mod progress;
pub mod report;
pub mod search;

use std::sync::atomic::AtomicBool;

pub use cli::Args;
pub use code::UnlockCode;
pub use config::Settings;
use device::{DeviceCommand, DeviceInfo, UnlockOracle};
use imei::{Imei, ImeiError};
use progress::{ProgressStore, StoreError};
use search::engine::SearchParams;
use search::{SearchEngine, SearchError, SearchObserver, SearchOutcome};

/// 解锁成功结果
#[derive(Debug, Clone)]
pub struct UnlockSuccess {
    /// 找到的解锁码
    pub code: UnlockCode,
    /// 总共尝试的次数
    pub attempts: u64,
    /// 总耗时（秒）
    pub elapsed_secs: f64,
    /// 结果保存位置
    pub result_location: String,
}

impl UnlockSuccess {
    /// 计算平均速度（次/秒）
    pub fn speed(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.attempts as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// 未解锁时的统计信息
#[derive(Debug, Clone)]
pub struct UnlockFailure {
    /// 最后一个测试过的候选码
    pub last_tested: Option<UnlockCode>,
    /// 总共尝试的次数
    pub attempts: u64,
    /// 总耗时（秒）
    pub elapsed_secs: f64,
    /// 检查点保存位置
    pub checkpoint_location: String,
}

impl UnlockFailure {
    /// 计算平均速度（次/秒）
    pub fn speed(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.attempts as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// 解锁错误
#[derive(Debug, thiserror::Error)]
pub enum UnlockError {
    #[error("IMEI 校验失败: {0}")]
    InvalidImei(#[from] ImeiError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("无法读取检查点: {0}")]
    Store(#[from] StoreError),

    #[error("搜索范围内未找到解锁码")]
    NotFound(UnlockFailure),

    #[error("设备返回了无法识别的内容")]
    UnknownResponse {
        candidate: UnlockCode,
        output: String,
        failure: UnlockFailure,
    },

    #[error("已被用户中断")]
    Interrupted(UnlockFailure),
}

/// 解锁结果类型
pub type UnlockResult = Result<UnlockSuccess, UnlockError>;

/// 一次解锁任务所需的全部协作者
pub struct UnlockJob<'a> {
    pub imei: &'a Imei,
    pub settings: &'a Settings,
    pub device_info: Option<DeviceInfo>,
    pub oracle: &'a dyn UnlockOracle,
    pub store: &'a mut dyn ProgressStore,
    pub observer: &'a mut dyn SearchObserver,
    pub cancel: &'a AtomicBool,
}

/// 执行解锁码搜索
///
/// 成功后会让设备重启；失败时返回的错误中带有统计信息与检查点位置
///
/// # 示例
/// ```no_run
/// use std::sync::atomic::AtomicBool;
/// use oem_unlocker::device::PlatformTools;
/// use oem_unlocker::progress::JsonProgressStore;
/// use oem_unlocker::{Settings, UnlockJob, unlock_device};
///
/// let settings = Settings::default();
/// let imei = "490154203237518".parse().unwrap();
/// let tools = PlatformTools::new(settings.attempt_timeout);
/// let mut store = JsonProgressStore::new(&settings.data_dir);
/// let cancel = AtomicBool::new(false);
///
/// match unlock_device(UnlockJob {
///     imei: &imei,
///     settings: &settings,
///     device_info: None,
///     oracle: &tools,
///     store: &mut store,
///     observer: &mut (),
///     cancel: &cancel,
/// }) {
///     Ok(success) => println!("解锁码: {}", success.code),
///     Err(e) => eprintln!("错误: {e}"),
/// }
/// ```
pub fn unlock_device(job: UnlockJob<'_>) -> UnlockResult {
    let checkpoint = if job.settings.resume {
        let checkpoint = job.store.load_checkpoint()?;
        if checkpoint.is_none() {
            tracing::info!("没有找到检查点，从头开始");
        }
        checkpoint
    } else {
        None
    };
    let checkpoint_location = job.store.checkpoint_location();
    let result_location = job.store.result_location();

    let mut engine = SearchEngine::new(SearchParams {
        imei: job.imei,
        settings: job.settings,
        oracle: job.oracle,
        store: job.store,
        observer: job.observer,
        cancel: job.cancel,
    })?
    .with_device_info(job.device_info);
    if let Some(checkpoint) = &checkpoint {
        engine = engine.resume_from(checkpoint)?;
    }

    let outcome = engine.run();
    let failure = UnlockFailure {
        last_tested: engine.last_tested(),
        attempts: engine.attempts(),
        elapsed_secs: engine.elapsed().as_secs_f64(),
        checkpoint_location,
    };
    drop(engine);

    match outcome {
        SearchOutcome::Unlocked { code, record } => {
            if let Err(e) = job.oracle.run(DeviceCommand::Reboot) {
                tracing::warn!("重启设备失败: {e}");
            }
            Ok(UnlockSuccess {
                code,
                attempts: record.attempts,
                elapsed_secs: record.time_elapsed,
                result_location,
            })
        }
        SearchOutcome::Exhausted => Err(UnlockError::NotFound(failure)),
        SearchOutcome::UnknownOutput { candidate, output } => Err(UnlockError::UnknownResponse {
            candidate,
            output,
            failure,
        }),
        SearchOutcome::Interrupted => Err(UnlockError::Interrupted(failure)),
    }
}
