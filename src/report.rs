use std::fmt::Write as _;

use indicatif::{ProgressBar, ProgressState, ProgressStyle};

use crate::device::DeviceCommand;
use crate::search::{SearchEvent, SearchObserver};

/// 进度条精度: 0.01%
const PROGRESS_SCALE: u64 = 10_000;

/// 调试模式下输出截断长度
const DEBUG_OUTPUT_LEN: usize = 100;

/// 终端显示
pub struct ConsoleReporter {
    bar: ProgressBar,
    debug: bool,
}

impl ConsoleReporter {
    pub fn new(debug: bool) -> Self {
        let bar = ProgressBar::new(PROGRESS_SCALE);
        let style = ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar}] {progress} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key("progress", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let _ = write!(w, "{:6.2}%", state.pos() as f64 * 100.0 / PROGRESS_SCALE as f64);
        })
        .progress_chars("#>-");
        bar.set_style(style);

        Self { bar, debug }
    }

    /// 结束进度条，保留最后一行
    pub fn finish(&self) {
        self.bar.abandon();
    }
}

impl SearchObserver for ConsoleReporter {
    fn on_event(&mut self, event: &SearchEvent) {
        match event {
            SearchEvent::Attempt(status) => {
                self.bar
                    .set_position((status.percent / 100.0 * PROGRESS_SCALE as f64) as u64);
                self.bar.set_message(format!(
                    "测试: {} | 已尝试: {} | 速度: {:.1}/s",
                    status.candidate,
                    status.attempts,
                    status.rate()
                ));
            }
            SearchEvent::Output { candidate, output } if self.debug => {
                let output: String = output.trim().chars().take(DEBUG_OUTPUT_LEN).collect();
                self.bar.println(format!("调试 {candidate}: {output}"));
            }
            SearchEvent::Output { .. } => {}
            SearchEvent::ProtectionDetected { candidate } => {
                self.bar.println(format!(
                    "检测到 bootloader 重启保护 ({candidate})，已启用自动重启"
                ));
            }
            SearchEvent::Timeout { candidate, limit } => {
                self.bar.println(format!(
                    "命令超时 ({candidate}, {}s)，设备可能无响应",
                    limit.as_secs()
                ));
            }
            SearchEvent::AttemptFailed { candidate, message } => {
                self.bar.println(format!("尝试出错 ({candidate}): {message}"));
            }
            SearchEvent::UnknownTolerated { candidate, output } => {
                self.bar
                    .println(format!("未知应答 ({candidate})，继续: {}", output.trim()));
            }
            SearchEvent::Command(command) => {
                let text = match command {
                    DeviceCommand::WaitForDevice => "等待设备连接...",
                    DeviceCommand::RebootToBootloader => "重启到 bootloader...",
                    DeviceCommand::RebootBootloader => "重启 bootloader...",
                    DeviceCommand::Reboot => "重启设备...",
                };
                if self.debug {
                    self.bar.println(text);
                }
            }
            SearchEvent::CheckpointSaved { attempts, location } => {
                self.bar
                    .println(format!("进度已保存 ({attempts} 次) -> {location}"));
            }
            SearchEvent::StoreFailed { message } => {
                self.bar.println(format!("保存失败: {message}"));
            }
        }
    }
}
