//! 追記ログ形式の訂正ストア
//!
//! 1行に `誤ラベル -> 正ラベル` を記録します。読み込み時は先頭から再生し、
//! 同じキーが複数回現れた場合は最後の行が有効です。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{read_optional, write_atomic, CorrectionBackend, CorrectionMap};
use crate::error::StorageError;

/// 区切り文字列
pub const SEPARATOR: &str = "->";

#[derive(Debug, Clone)]
pub struct AppendLogBackend {
    path: PathBuf,
}

impl AppendLogBackend {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 1行を解析する。誤ラベル側は最初の区切りまで。
pub fn parse_line(line: &str) -> Option<(String, String)> {
    let (wrong, correct) = line.split_once(SEPARATOR)?;
    let (wrong, correct) = (wrong.trim(), correct.trim());
    if wrong.is_empty() || correct.is_empty() {
        return None;
    }
    Some((wrong.to_string(), correct.to_string()))
}

pub fn format_line(wrong: &str, correct: &str) -> String {
    format!("{} {} {}\n", wrong, SEPARATOR, correct)
}

impl CorrectionBackend for AppendLogBackend {
    fn load_all(&self) -> Result<CorrectionMap, StorageError> {
        let mut map = CorrectionMap::new();
        let Some(text) = read_optional(&self.path)? else {
            return Ok(map);
        };

        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((wrong, correct)) => {
                    map.insert(wrong, correct);
                }
                None => tracing::warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    "skipping malformed correction line"
                ),
            }
        }
        Ok(map)
    }

    /// ログを現在のマップで書き直す（圧縮）
    fn persist(&self, map: &CorrectionMap) -> Result<(), StorageError> {
        let text: String = map
            .iter()
            .map(|(wrong, correct)| format_line(wrong, correct))
            .collect();
        write_atomic(&self.path, text.as_bytes())
    }

    fn record(&self, _map: &CorrectionMap, wrong: &str, correct: &str) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;

        // 1回の書き込みで1行を追記する
        file.write_all(format_line(wrong, correct).as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| StorageError::io(&self.path, e))
    }

    fn describe(&self) -> String {
        format!("log:{}", self.path.display())
    }
}
