//! プリファレンスファイル形式の訂正ストア
//!
//! アプリの他の設定と同じキー・バリューファイルを共有し、訂正は
//! `correction.<誤ラベル>` キーに保存します。訂正以外のキーは書き込み時に保持されます。

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use super::{read_optional, write_atomic, CorrectionBackend, CorrectionMap};
use crate::error::StorageError;

/// 訂正キーの接頭辞
pub const KEY_PREFIX: &str = "correction.";

#[derive(Debug, Clone)]
pub struct PreferenceBackend {
    path: PathBuf,
}

impl PreferenceBackend {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>, StorageError> {
        match read_optional(&self.path)? {
            Some(text) if !text.trim().is_empty() => {
                serde_json::from_str(&text).map_err(|e| StorageError::json(&self.path, e))
            }
            _ => Ok(Map::new()),
        }
    }
}

impl CorrectionBackend for PreferenceBackend {
    fn load_all(&self) -> Result<CorrectionMap, StorageError> {
        let document = self.read_document()?;
        let map = document
            .into_iter()
            .filter_map(|(key, value)| {
                let wrong = key.strip_prefix(KEY_PREFIX)?.to_string();
                match value {
                    Value::String(correct) => Some((wrong, correct)),
                    _ => None,
                }
            })
            .collect();
        Ok(map)
    }

    fn persist(&self, map: &CorrectionMap) -> Result<(), StorageError> {
        // 既存の訂正キーを入れ替え、それ以外の設定は残す
        let mut document = self.read_document()?;
        document.retain(|key, _| !key.starts_with(KEY_PREFIX));
        for (wrong, correct) in map {
            document.insert(format!("{}{}", KEY_PREFIX, wrong), Value::String(correct.clone()));
        }

        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| StorageError::json(&self.path, e))?;
        write_atomic(&self.path, json.as_bytes())
    }

    fn describe(&self) -> String {
        format!("prefs:{}", self.path.display())
    }
}
