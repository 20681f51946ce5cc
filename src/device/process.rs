use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::DeviceError;
use super::parse::combine_output;

/// 轮询子进程状态的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 已结束命令的输出
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// stderr + stdout
    pub fn combined(&self) -> String {
        combine_output(&self.stdout, &self.stderr)
    }

    pub fn stdout_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// 运行外部命令并收集输出，`timeout` 为 `None` 时一直等待
///
/// 超时后子进程会被杀掉并返回 [`DeviceError::Timeout`]
pub fn run_captured(
    program: &Path,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<CommandOutput, DeviceError> {
    tracing::trace!("执行 {} {}", program.display(), args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| DeviceError::Launch {
            program: program.to_path_buf(),
            source,
        })?;

    // 两个管道分别在线程中读完，避免子进程写满缓冲区阻塞
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let status = match timeout {
        Some(limit) => wait_with_deadline(&mut child, limit)?,
        None => child.wait()?,
    };

    Ok(CommandOutput {
        status,
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    })
}

/// 运行命令，要求退出码为 0
pub fn run_checked(
    program: &Path,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<CommandOutput, DeviceError> {
    let output = run_captured(program, args, timeout)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(DeviceError::Failed {
            program: PathBuf::from(program),
            status: output.status,
            output: output.combined().trim().to_string(),
        })
    }
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<ExitStatus, DeviceError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DeviceError::Timeout(limit));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams() {
        let out = run_captured(
            Path::new("sh"),
            &["-c", "echo out; echo err >&2"],
            Some(Duration::from_secs(10)),
        )
        .unwrap();
        assert!(out.status.success());
        assert_eq!(out.combined(), "err\nout\n");
    }

    #[test]
    fn times_out() {
        let started = Instant::now();
        let err = run_captured(Path::new("sleep"), &["5"], Some(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_launch_error() {
        let err = run_captured(Path::new("/nonexistent/fastboot"), &["devices"], None).unwrap_err();
        assert!(matches!(err, DeviceError::Launch { .. }));
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let err = run_checked(Path::new("sh"), &["-c", "echo nope; exit 3"], None).unwrap_err();
        match err {
            DeviceError::Failed { output, .. } => assert_eq!(output, "nope"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
