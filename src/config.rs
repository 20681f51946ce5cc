use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::imei::Imei;
use crate::progress::{StoreError, write_json_atomic};

/// 配置缓存文件名
pub const CONFIG_FILE: &str = "config.json";

/// 获取默认数据目录 (~/.oem_unlocker)
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".oem_unlocker"))
        .unwrap_or_else(|| PathBuf::from(".oem_unlocker"))
}

/// 运行配置，启动时构造一次，之后只读
#[derive(Debug, Clone)]
pub struct Settings {
    /// 固定 IMEI，跳过检测与输入
    pub static_imei: Option<String>,
    /// 跳过确认提示
    pub quickstart: bool,
    /// 一开始就启用预防性重启
    pub auto_reboot: bool,
    /// 保护模式下每隔多少次尝试重启一次 bootloader
    pub reboot_every: u64,
    /// 每隔多少次尝试保存一次进度
    pub save_every: u64,
    /// 遇到无法识别的输出时继续（视为普通失败）
    pub tolerate_unknown_output: bool,
    /// 打印每次尝试的原始输出
    pub debug: bool,
    /// 单次解锁尝试的超时
    pub attempt_timeout: Duration,
    /// 检测到重启保护后的等待
    pub protection_pause: Duration,
    /// 超时恢复重启后的等待
    pub recovery_pause: Duration,
    /// 预防性重启后的等待
    pub preventive_pause: Duration,
    /// 从检查点继续
    pub resume: bool,
    /// 配置、进度与结果文件所在目录
    pub data_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            static_imei: None,
            quickstart: false,
            auto_reboot: false,
            reboot_every: 4,
            save_every: 200,
            tolerate_unknown_output: false,
            debug: false,
            attempt_timeout: Duration::from_secs(30),
            protection_pause: Duration::from_secs(3),
            recovery_pause: Duration::from_secs(5),
            preventive_pause: Duration::from_secs(2),
            resume: false,
            data_dir: default_data_dir(),
        }
    }
}

impl Settings {
    /// 所有等待时间为零，测试用
    pub fn without_pauses(mut self) -> Self {
        self.protection_pause = Duration::ZERO;
        self.recovery_pause = Duration::ZERO;
        self.preventive_pause = Duration::ZERO;
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }
}

/// 缓存的 IMEI 与设备信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedConfig {
    pub imei: Option<Imei>,
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
    pub last_updated: Option<DateTime<Local>>,
}

impl SavedConfig {
    /// 读取配置，文件不存在或损坏时返回默认值
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!("忽略无法解析的配置 {}: {e}", path.display());
            Self::default()
        })
    }

    /// 整体覆盖写入
    pub fn save(&mut self, path: &Path) -> Result<(), StoreError> {
        self.last_updated = Some(Local::now());
        write_json_atomic(path, self)
    }
}
