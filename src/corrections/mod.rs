//! ラベル訂正の保存と参照
//!
//! ユーザーが訂正したラベル（誤ラベル → 正ラベル）を保持し、次回以降の分類結果に適用します。
//! 永続化方式は `CorrectionBackend` で差し替え可能です。

pub mod append_log;
pub mod json_document;
pub mod preferences;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub use append_log::AppendLogBackend;
pub use json_document::JsonDocumentBackend;
pub use preferences::PreferenceBackend;
pub use store::CorrectionStore;

/// 誤ラベル → 正ラベル
pub type CorrectionMap = BTreeMap<String, String>;

/// ランキング時の訂正参照
pub trait CorrectionLookup {
    fn corrected_label(&self, label: &str) -> Option<String>;
}

impl CorrectionLookup for CorrectionMap {
    fn corrected_label(&self, label: &str) -> Option<String> {
        self.get(label).cloned()
    }
}

/// 訂正マップの永続化方式
pub trait CorrectionBackend: Send + Sync {
    /// 保存済みのマップをすべて読み込む（保存先が存在しなければ空）
    fn load_all(&self) -> Result<CorrectionMap, StorageError>;

    /// マップ全体を保存する
    fn persist(&self, map: &CorrectionMap) -> Result<(), StorageError>;

    /// 1件の訂正を記録する（`map` は記録後のマップ全体）
    fn record(&self, map: &CorrectionMap, _wrong: &str, _correct: &str) -> Result<(), StorageError> {
        self.persist(map)
    }

    /// ログ用の説明
    fn describe(&self) -> String;
}

/// 設定で選択する永続化方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionBackendKind {
    /// JSONドキュメントを丸ごと置き換える
    #[default]
    JsonDocument,
    /// `誤 -> 正` 形式の行を追記する
    AppendLog,
    /// 他の設定と共有するキー・バリュー形式のプリファレンスファイル
    Preferences,
}

impl CorrectionBackendKind {
    pub fn open<P: Into<PathBuf>>(self, path: P) -> Box<dyn CorrectionBackend> {
        match self {
            CorrectionBackendKind::JsonDocument => Box::new(JsonDocumentBackend::new(path)),
            CorrectionBackendKind::AppendLog => Box::new(AppendLogBackend::new(path)),
            CorrectionBackendKind::Preferences => Box::new(PreferenceBackend::new(path)),
        }
    }
}

/// 一時ファイルに書き込んでからリネームする
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        fs::remove_file(&tmp).ok();
        StorageError::io(path, e)
    })
}

/// 保存先が無ければ `None`
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}
