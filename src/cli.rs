use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{Settings, default_data_dir};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Parser)]
#[command(name = "oem_unlocker")]
#[command(about = "Huawei OEM 解锁码搜索工具 (fastboot)", long_about = None)]
pub struct Args {
    /// 固定 IMEI，跳过检测和输入
    #[arg(long)]
    pub imei: Option<String>,

    /// 跳过确认提示
    #[arg(short = 'y', long)]
    pub quickstart: bool,

    /// 从一开始就启用预防性重启
    #[arg(long)]
    pub auto_reboot: bool,

    /// 预防性重启间隔（次）
    #[arg(long, default_value = "4")]
    pub reboot_every: u64,

    /// 保存进度间隔（次）
    #[arg(long, default_value = "200")]
    pub save_every: u64,

    /// 遇到无法识别的输出时继续
    #[arg(long)]
    pub tolerate_unknown: bool,

    /// 显示每次尝试的原始输出
    #[arg(short, long)]
    pub debug: bool,

    /// 单次尝试超时（秒）
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// 从上次的检查点继续
    #[arg(long)]
    pub resume: bool,

    /// 数据目录 (默认: ~/.oem_unlocker)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// 设备已处于 fastboot 模式，跳过 ADB 检测
    #[arg(long)]
    pub skip_detect: bool,

    /// 多台设备连接时指定序列号
    #[arg(short, long)]
    pub serial: Option<String>,

    /// adb 可执行文件
    #[arg(long, default_value = "adb")]
    pub adb: PathBuf,

    /// fastboot 可执行文件
    #[arg(long, default_value = "fastboot")]
    pub fastboot: PathBuf,

    /// 日志级别，环境变量 OEM_UNLOCKER_TRACE 优先
    #[arg(long)]
    pub log_level: Option<LogLevel>,
}

impl Args {
    /// 把命令行参数合并到固定配置上
    pub fn settings(&self) -> Settings {
        Settings {
            static_imei: self.imei.clone(),
            quickstart: self.quickstart,
            auto_reboot: self.auto_reboot,
            reboot_every: self.reboot_every,
            save_every: self.save_every,
            tolerate_unknown_output: self.tolerate_unknown,
            debug: self.debug,
            attempt_timeout: Duration::from_secs(self.timeout),
            resume: self.resume,
            data_dir: self.data_dir.clone().unwrap_or_else(default_data_dir),
            ..Settings::default()
        }
    }
}
