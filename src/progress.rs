use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::code::UnlockCode;
use crate::device::DeviceInfo;
use crate::imei::Imei;

/// 进度文件名
pub const CHECKPOINT_FILE: &str = "unlock_progress.json";
/// 结果文件名
pub const RESULT_FILE: &str = "unlock_result.json";

/// 进度存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("文件读写失败 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON 解析失败 {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 检查点记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 最后一个测试过的候选码（16 位）
    pub last_code: String,
    /// 截至 `last_code`（含）的尝试次数
    pub attempts: u64,
    /// 进度百分比
    pub progress: f64,
    /// 本次运行的步长，用于判断能否继续
    pub increment: u64,
    pub timestamp: DateTime<Local>,
}

impl Checkpoint {
    pub fn last_code(&self) -> Option<UnlockCode> {
        UnlockCode::parse(&self.last_code)
    }
}

/// 成功结果记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockRecord {
    /// 解锁码（16 位）
    pub unlock_code: String,
    pub imei: Imei,
    pub attempts: u64,
    /// 耗时（秒）
    pub time_elapsed: f64,
    pub timestamp: DateTime<Local>,
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
}

/// 进度与结果的持久化
pub trait ProgressStore {
    /// 覆盖写入检查点
    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// 读取检查点，不存在时返回 `None`
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError>;

    /// 写入成功结果
    fn save_result(&mut self, record: &UnlockRecord) -> Result<(), StoreError>;

    /// 检查点所在位置（用于提示）
    fn checkpoint_location(&self) -> String;

    /// 结果所在位置（用于提示）
    fn result_location(&self) -> String;
}

/// 以 JSON 文件保存在数据目录中
#[derive(Debug, Clone)]
pub struct JsonProgressStore {
    checkpoint_path: PathBuf,
    result_path: PathBuf,
}

impl JsonProgressStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            checkpoint_path: dir.join(CHECKPOINT_FILE),
            result_path: dir.join(RESULT_FILE),
        }
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn result_path(&self) -> &Path {
        &self.result_path
    }

    /// 读取已保存的结果
    pub fn load_result(&self) -> Result<Option<UnlockRecord>, StoreError> {
        read_json(&self.result_path)
    }
}

impl ProgressStore for JsonProgressStore {
    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        write_json_atomic(&self.checkpoint_path, checkpoint)
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        read_json(&self.checkpoint_path)
    }

    fn save_result(&mut self, record: &UnlockRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.result_path, record)
    }

    fn checkpoint_location(&self) -> String {
        self.checkpoint_path.display().to_string()
    }

    fn result_location(&self) -> String {
        self.result_path.display().to_string()
    }
}

/// 写入临时文件后重命名，中断时不会留下半截文件
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut file = NamedTempFile::new_in(dir).map_err(io_err)?;
    writeln!(file, "{json}").map_err(io_err)?;
    file.as_file().sync_all().map_err(io_err)?;
    file.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}
