use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// IMEI 长度
pub const IMEI_LEN: usize = 15;

/// IMEI 校验错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImeiError {
    #[error("IMEI must be 15 digits")]
    WrongLength,

    #[error("IMEI must contain only numbers")]
    NotNumeric,

    #[error("Invalid IMEI checksum")]
    BadChecksum,
}

/// 已通过校验的 IMEI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Imei(String);

impl Imei {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// IMEI 的整数值（15 位十进制，必然小于 2^53）
    pub fn value(&self) -> u64 {
        self.0.bytes().fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'))
    }

    /// 由 IMEI 推导的步长: floor(sqrt(imei) * 1024)
    pub fn increment(&self) -> u64 {
        increment(self.value())
    }
}

impl fmt::Display for Imei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Imei {
    type Err = ImeiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_imei(s)
    }
}

impl TryFrom<String> for Imei {
    type Error = ImeiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_imei(&value)
    }
}

impl From<Imei> for String {
    fn from(imei: Imei) -> Self {
        imei.0
    }
}

/// 校验 IMEI：必须是 15 位数字且通过 Luhn 校验
pub fn validate_imei(input: &str) -> Result<Imei, ImeiError> {
    if input.chars().count() != IMEI_LEN {
        return Err(ImeiError::WrongLength);
    }
    if !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ImeiError::NotNumeric);
    }
    if !luhn_valid(input) {
        return Err(ImeiError::BadChecksum);
    }
    Ok(Imei(input.to_string()))
}

/// Luhn 校验，`digits` 必须全部为 ASCII 数字
#[must_use]
pub fn luhn_valid(digits: &str) -> bool {
    let total: u32 = digits
        .bytes()
        .rev()
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 0 {
                d
            } else {
                let doubled = d * 2;
                doubled / 10 + doubled % 10
            }
        })
        .sum();
    total % 10 == 0
}

/// 步长计算，向下取整而非四舍五入
#[must_use]
pub fn increment(imei: u64) -> u64 {
    ((imei as f64).sqrt() * 1024.0).floor() as u64
}

static PARCEL_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']*)'").expect("静态正则"));
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("静态正则"));

/// 从 `service call iphonesubinfo 1` 的 Parcel 转储中提取 IMEI
///
/// 转储每行末尾的引号列是 UTF-16 字符，数字之间夹着 `.`
pub fn imei_from_parcel(output: &str) -> Option<Imei> {
    let text: String = PARCEL_TEXT
        .captures_iter(output)
        .filter_map(|c| c.get(1))
        .flat_map(|m| m.as_str().chars())
        .filter(|c| *c != '.')
        .collect();
    imei_from_text(&text)
}

/// 在任意文本中查找第一个合法的 15 位 IMEI
pub fn imei_from_text(output: &str) -> Option<Imei> {
    DIGIT_RUN
        .find_iter(output)
        .map(|m| m.as_str())
        .filter(|run| run.len() >= IMEI_LEN)
        .flat_map(|run| {
            (0..=run.len() - IMEI_LEN).map(move |start| &run[start..start + IMEI_LEN])
        })
        .find_map(|window| validate_imei(window).ok())
}
