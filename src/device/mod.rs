pub mod parse;
pub mod process;
mod tools;

pub use self::tools::PlatformTools;

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::code::UnlockCode;
use crate::imei::Imei;

/// 设备命令错误
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("无法启动 {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("命令超时 ({0:?})")]
    Timeout(Duration),

    #[error("{program} 退出状态异常 ({status}): {output}")]
    Failed {
        program: PathBuf,
        status: ExitStatus,
        output: String,
    },

    #[error("读取命令输出失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 尽力而为的设备命令，只关心能否启动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `adb wait-for-device`
    WaitForDevice,
    /// `adb reboot bootloader`
    RebootToBootloader,
    /// `fastboot reboot-bootloader`
    RebootBootloader,
    /// `fastboot reboot`
    Reboot,
}

/// 解锁尝试的设备端：把候选码交给 bootloader，返回原始文本
pub trait UnlockOracle {
    /// 执行 `fastboot oem unlock <code>`，返回 stderr + stdout
    fn attempt_unlock(&self, code: UnlockCode) -> Result<String, DeviceError>;

    /// 执行一条尽力而为的命令
    fn run(&self, command: DeviceCommand) -> Result<(), DeviceError>;
}

/// 系统模式下（ADB）的设备查询
pub trait DeviceProbe {
    /// 已连接且已授权的设备序列号
    fn list_devices(&self) -> Result<Vec<String>, DeviceError>;

    /// 读取系统属性
    fn get_property(&self, device: &str, key: &str) -> Result<String, DeviceError>;

    /// 尝试自动读取 IMEI
    fn detect_imei(&self, device: &str) -> Option<Imei>;
}

/// Mate 30 Pro 系列型号
pub const MATE30_PRO_MODELS: &[&str] = &["TAS-AL00", "TAS-L29", "VOG-L29", "VOG-L04"];

/// 设备信息（会缓存到 config.json）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imei: Option<Imei>,
}

impl DeviceInfo {
    /// 收集设备信息，单项失败只记录日志
    pub fn collect(probe: &dyn DeviceProbe, device: &str) -> Self {
        let prop = |key: &str| match probe.get_property(device, key) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("读取属性 {key} 失败: {e}");
                None
            }
        };

        Self {
            id: device.to_string(),
            manufacturer: prop("ro.product.manufacturer"),
            model: prop("ro.product.model"),
            android_version: prop("ro.build.version.release"),
            imei: probe.detect_imei(device),
        }
    }

    /// 是否为 Mate 30 Pro
    pub fn is_mate30_pro(&self) -> bool {
        self.model.as_deref().is_some_and(|model| {
            let model = model.to_uppercase();
            MATE30_PRO_MODELS.iter().any(|m| model.contains(m)) || model.contains("MATE 30")
        })
    }
}
