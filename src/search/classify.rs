/// 正常失败时 bootloader 的提示
pub const FAILURE_PHRASE: &str = "check password failed";

/// bootloader 对一次解锁尝试的应答分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// 解锁成功
    Success,
    /// 触发了重启保护
    Protection,
    /// 密码错误
    Failure,
    /// 无法识别
    Unknown,
}

/// 按优先级分类（不区分大小写）: 成功 > 重启保护 > 失败 > 未知
pub fn classify(output: &str) -> Response {
    let output = output.to_lowercase();
    if output.contains("success") || output.contains("unlock") {
        Response::Success
    } else if output.contains("reboot") {
        Response::Protection
    } else if output.contains(FAILURE_PHRASE) {
        Response::Failure
    } else {
        Response::Unknown
    }
}
