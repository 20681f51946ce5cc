use std::path::PathBuf;
use std::time::Duration;

use super::parse::parse_device_list;
use super::process::{run_captured, run_checked};
use super::{DeviceCommand, DeviceError, DeviceProbe, UnlockOracle};
use crate::code::UnlockCode;
use crate::imei::{Imei, imei_from_parcel, imei_from_text};

/// 属性查询超时
const PROPERTY_TIMEOUT: Duration = Duration::from_secs(10);
/// IMEI 查询超时
const IMEI_TIMEOUT: Duration = Duration::from_secs(15);
/// 重启、等待设备等命令的超时，设备重启可能需要一两分钟
const COMMAND_TIMEOUT: Duration = Duration::from_secs(180);

/// 基于 Android platform-tools（adb / fastboot）的设备实现
#[derive(Debug, Clone)]
pub struct PlatformTools {
    adb: PathBuf,
    fastboot: PathBuf,
    serial: Option<String>,
    attempt_timeout: Duration,
    command_timeout: Duration,
}

impl PlatformTools {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            adb: PathBuf::from("adb"),
            fastboot: PathBuf::from("fastboot"),
            serial: None,
            attempt_timeout,
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    /// 指定 adb / fastboot 可执行文件路径
    pub fn with_binaries(mut self, adb: impl Into<PathBuf>, fastboot: impl Into<PathBuf>) -> Self {
        self.adb = adb.into();
        self.fastboot = fastboot.into();
        self
    }

    /// 多设备连接时限定目标设备
    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    /// 尽力而为命令的超时（`adb wait-for-device` 在 fastboot 模式下不会返回）
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// 启动 adb 服务
    pub fn start_server(&self) -> Result<(), DeviceError> {
        run_checked(&self.adb, &["start-server"], Some(PROPERTY_TIMEOUT)).map(drop)
    }

    /// 在参数前加上 `-s <serial>`（adb 与 fastboot 语义相同）
    fn target_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            full.extend(["-s", serial.as_str()]);
        }
        full.extend_from_slice(args);
        full
    }
}

impl UnlockOracle for PlatformTools {
    fn attempt_unlock(&self, code: UnlockCode) -> Result<String, DeviceError> {
        let code = code.to_string();
        let args = self.target_args(&["oem", "unlock", &code]);
        // 失败时 fastboot 退出码非 0，输出仍需交给分类器
        let output = run_captured(&self.fastboot, &args, Some(self.attempt_timeout))?;
        Ok(output.combined())
    }

    fn run(&self, command: DeviceCommand) -> Result<(), DeviceError> {
        let (program, args) = match command {
            DeviceCommand::WaitForDevice => (&self.adb, self.target_args(&["wait-for-device"])),
            DeviceCommand::RebootToBootloader => {
                (&self.adb, self.target_args(&["reboot", "bootloader"]))
            }
            DeviceCommand::RebootBootloader => {
                (&self.fastboot, self.target_args(&["reboot-bootloader"]))
            }
            DeviceCommand::Reboot => (&self.fastboot, self.target_args(&["reboot"])),
        };
        run_captured(program, &args, Some(self.command_timeout)).map(drop)
    }
}

impl DeviceProbe for PlatformTools {
    fn list_devices(&self) -> Result<Vec<String>, DeviceError> {
        let output = run_checked(&self.adb, &["devices"], Some(PROPERTY_TIMEOUT))?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn get_property(&self, device: &str, key: &str) -> Result<String, DeviceError> {
        let output = run_checked(
            &self.adb,
            &["-s", device, "shell", "getprop", key],
            Some(PROPERTY_TIMEOUT),
        )?;
        Ok(output.stdout_trimmed())
    }

    fn detect_imei(&self, device: &str) -> Option<Imei> {
        type Extract = fn(&str) -> Option<Imei>;
        let methods: [(&[&str], Extract); 3] = [
            (&["service", "call", "iphonesubinfo", "1"], imei_from_parcel),
            (&["dumpsys", "iphonesubinfo"], imei_from_text),
            (&["getprop", "gsm.baseband.imei"], imei_from_text),
        ];

        for (shell_args, extract) in methods {
            let mut args = vec!["-s", device, "shell"];
            args.extend_from_slice(shell_args);
            match run_checked(&self.adb, &args, Some(IMEI_TIMEOUT)) {
                Ok(output) => {
                    if let Some(imei) = extract(&String::from_utf8_lossy(&output.stdout)) {
                        tracing::debug!("通过 `{}` 读取到 IMEI", shell_args.join(" "));
                        return Some(imei);
                    }
                }
                Err(e) => tracing::debug!("`{}` 失败: {e}", shell_args.join(" ")),
            }
        }
        None
    }
}
