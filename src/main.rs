use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use dialoguer::{Confirm, Input};
use tracing_subscriber::EnvFilter;

use oem_unlocker::config::SavedConfig;
use oem_unlocker::device::{DeviceInfo, DeviceProbe, PlatformTools};
use oem_unlocker::imei::{Imei, ImeiError, validate_imei};
use oem_unlocker::progress::JsonProgressStore;
use oem_unlocker::report::ConsoleReporter;
use oem_unlocker::{Args, Settings, UnlockError, UnlockFailure, UnlockJob, unlock_device};

#[derive(Debug, thiserror::Error)]
enum SetupError {
    #[error("ADB 调用失败: {0}")]
    Adb(#[from] oem_unlocker::device::DeviceError),
    #[error("未找到已授权的设备")]
    NoDevices,
    #[error("未找到设备 '{0}'")]
    MissingDevice(String),
    #[error("IMEI 校验失败: {0}")]
    Imei(#[from] ImeiError),
    #[error("读取输入失败: {0}")]
    Input(#[from] dialoguer::Error),
    #[error("已取消")]
    Cancelled,
}

fn init_logging(args: &Args) {
    match EnvFilter::builder()
        .with_env_var("OEM_UNLOCKER_TRACE")
        .try_from_env()
    {
        Ok(filter) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
        Err(_) => {
            let fallback = if args.debug {
                tracing::Level::DEBUG
            } else {
                tracing::Level::WARN
            };
            tracing_subscriber::fmt()
                .with_max_level(args.log_level.map(tracing::Level::from).unwrap_or(fallback))
                .with_writer(io::stderr)
                .init();
        }
    }
}

/// 手动输入 IMEI 时的校验
#[allow(clippy::ptr_arg)]
fn check_imei_input(input: &String) -> Result<(), ImeiError> {
    validate_imei(input.trim()).map(drop)
}

/// 至少保存过一次检查点
fn checkpoint_written(failure: &UnlockFailure, save_every: u64) -> bool {
    save_every > 0 && failure.attempts >= save_every
}

/// 失败总结中关于检查点的提示
fn checkpoint_note(failure: &UnlockFailure, save_every: u64) -> String {
    if checkpoint_written(failure, save_every) {
        format!("进度文件: {}", failure.checkpoint_location)
    } else {
        format!("未保存检查点（每 {save_every} 次保存一次）")
    }
}

/// 检测设备并读取设备信息
fn detect_device(tools: &PlatformTools, serial: Option<&str>) -> Result<DeviceInfo, SetupError> {
    println!("正在检测设备...");
    if let Err(e) = tools.start_server() {
        tracing::warn!("启动 ADB 服务失败: {e}");
    }

    let devices = tools.list_devices()?;
    let device = match serial {
        Some(serial) => devices
            .into_iter()
            .find(|d| d == serial)
            .ok_or_else(|| SetupError::MissingDevice(serial.to_string()))?,
        None => devices.into_iter().next().ok_or(SetupError::NoDevices)?,
    };

    let info = DeviceInfo::collect(tools, &device);
    let unknown = || "未知".to_string();
    println!("设备 ID: {}", info.id);
    println!("厂商: {}", info.manufacturer.clone().unwrap_or_else(unknown));
    println!("型号: {}", info.model.clone().unwrap_or_else(unknown));
    println!("Android 版本: {}", info.android_version.clone().unwrap_or_else(unknown));
    println!(
        "IMEI: {}",
        info.imei.as_ref().map_or_else(|| "未检测到".to_string(), Imei::to_string)
    );
    if info.is_mate30_pro() {
        println!("检测到 Huawei Mate 30 Pro，已应用优化");
    } else {
        println!("使用兼容模式");
    }
    println!();

    Ok(info)
}

/// 依次使用: 固定 IMEI、检测结果、缓存、手动输入
fn resolve_imei(
    settings: &Settings,
    detected: Option<&Imei>,
    saved: &SavedConfig,
) -> Result<Imei, SetupError> {
    if let Some(imei) = &settings.static_imei {
        println!("使用固定 IMEI: {imei}");
        return Ok(validate_imei(imei)?);
    }
    if let Some(imei) = detected.or(saved.imei.as_ref()) {
        println!("使用 IMEI: {imei}");
        return Ok(imei.clone());
    }

    println!("请输入 15 位 IMEI（设置 > 关于手机 > 状态信息）");
    let input: String = Input::new()
        .with_prompt("IMEI")
        .validate_with(check_imei_input)
        .interact_text()?;
    Ok(validate_imei(input.trim())?)
}

fn prepare(
    args: &Args,
    settings: &Settings,
    tools: &PlatformTools,
) -> Result<(Imei, Option<DeviceInfo>), SetupError> {
    let config_path = settings.config_path();
    let mut saved = SavedConfig::load(&config_path);

    let device_info = if args.skip_detect {
        None
    } else {
        match detect_device(tools, args.serial.as_deref()) {
            Ok(info) => Some(info),
            Err(e) => {
                println!("请确认:");
                println!("  • 已开启 USB 调试");
                println!("  • 设备已通过 USB 连接");
                println!("  • 已授权此电脑");
                return Err(e);
            }
        }
    };

    let imei = resolve_imei(
        settings,
        device_info.as_ref().and_then(|info| info.imei.as_ref()),
        &saved,
    )?;
    println!("IMEI 校验通过: {imei}");
    println!("步长: {}", imei.increment());

    saved.imei = Some(imei.clone());
    if device_info.is_some() {
        saved.device_info = device_info.clone();
    }
    if let Err(e) = saved.save(&config_path) {
        tracing::warn!("保存配置失败: {e}");
    }

    if !settings.quickstart {
        println!();
        println!("警告: 解锁会清除设备上的全部数据！请先备份。");
        println!("请确认设备已进入 fastboot 模式 (adb reboot bootloader)");
        let proceed = Confirm::new()
            .with_prompt("确定继续吗?")
            .default(false)
            .interact()?;
        if !proceed {
            return Err(SetupError::Cancelled);
        }
    }

    Ok((imei, device_info.or(saved.device_info)))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);
    let settings = args.settings();

    println!("=== Huawei OEM 解锁码搜索 ===");
    println!("数据目录: {}", settings.data_dir.display());
    println!();

    let tools = PlatformTools::new(settings.attempt_timeout)
        .with_binaries(&args.adb, &args.fastboot)
        .with_serial(args.serial.clone());

    let (imei, device_info) = match prepare(&args, &settings, &tools) {
        Ok(prepared) => prepared,
        Err(SetupError::Cancelled) => {
            println!("操作已取消");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed)) {
        tracing::warn!("无法注册中断处理: {e}");
    }

    println!();
    println!("开始搜索...");
    println!("自动重启: {}", if settings.auto_reboot { "启用" } else { "按需启用" });
    println!("保存间隔: 每 {} 次", settings.save_every);

    let mut store = JsonProgressStore::new(&settings.data_dir);
    let mut reporter = ConsoleReporter::new(settings.debug);
    let result = unlock_device(UnlockJob {
        imei: &imei,
        settings: &settings,
        device_info,
        oracle: &tools,
        store: &mut store,
        observer: &mut reporter,
        cancel: &cancel,
    });
    reporter.finish();

    println!();
    println!("=== 最终结果 ===");
    match result {
        Ok(success) => {
            println!("✅ 解锁成功！解锁码: {}", success.code);
            println!("结果已保存到: {}", success.result_location);
            println!("已尝试: {} 次", success.attempts);
            println!("总耗时: {:.2} 秒", success.elapsed_secs);
            println!("平均速度: {:.1} 次/秒", success.speed());
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("❌ {err}");
            let failure = match &err {
                UnlockError::NotFound(failure) | UnlockError::Interrupted(failure) => Some(failure),
                UnlockError::UnknownResponse {
                    candidate,
                    output,
                    failure,
                } => {
                    println!("候选码: {candidate}");
                    println!("完整输出: {}", output.trim());
                    println!("提示: 使用 --tolerate-unknown 可忽略未知输出继续");
                    Some(failure)
                }
                _ => None,
            };
            if let Some(failure) = failure {
                match failure.last_tested {
                    Some(code) => println!("最后测试: {code}"),
                    None => println!("最后测试: 无"),
                }
                println!("已尝试: {} 次", failure.attempts);
                println!("总耗时: {:.2} 秒", failure.elapsed_secs);
                println!("{}", checkpoint_note(failure, settings.save_every));
                if checkpoint_written(failure, settings.save_every) {
                    println!("提示: 使用 --resume 可从检查点继续");
                }
            }
            ExitCode::FAILURE
        }
    }
}
