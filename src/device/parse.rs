/// 解析 `adb devices` 输出，返回状态为 `device` 的序列号
pub fn parse_device_list(output: &str) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();
    // 没有标题行时按第一行是标题处理
    let body = match lines.iter().position(|line| line.starts_with("List of devices")) {
        Some(header) => &lines[header + 1..],
        None => lines.get(1..).unwrap_or_default(),
    };

    body.iter()
        .filter(|line| line.contains("\tdevice"))
        .filter_map(|line| line.split('\t').next())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// 合并 stderr 与 stdout（bootloader 的应答通常在 stderr）
pub fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stderr).into_owned();
    text.push_str(&String::from_utf8_lossy(stdout));
    text
}
