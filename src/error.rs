//! エラー型の定義
//!
//! 分類パイプライン本体は型付きエラーを返します。
//! 設定ファイルやモデルバンドルの読み込みは `anyhow` を使用します。

use std::path::PathBuf;
use thiserror::Error;

/// 分類処理（前処理・推論・ランキング）のエラー
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// 画像が空、またはバッファサイズが不正
    #[error("invalid image: {message}")]
    InvalidImage { message: String },

    /// 入力テンソルの形状がモデルの宣言と一致しない
    #[error("input shape mismatch: model expects {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// モデル出力の長さが宣言と一致しない
    #[error("output length mismatch: model declares {expected}, produced {actual}")]
    OutputMismatch { expected: usize, actual: usize },

    /// ラベル表とスコアの長さが一致しない
    #[error("label table has {labels} entries but score vector has {scores}")]
    LabelTableMismatch { labels: usize, scores: usize },

    /// モデルランタイム内部のエラー
    #[error("inference")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// 非同期分類タスクの異常終了
    #[error("classification task failed: {0}")]
    TaskJoin(String),
}

impl ClassifyError {
    pub(crate) fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage {
            message: message.into(),
        }
    }
}

/// 訂正ストアの永続化エラー
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path:?}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// ラベル訂正のエラー
///
/// `Persist` 以外は入力検証エラーで、ストアの状態は変化しません。
#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("corrected label is empty")]
    EmptyCorrection,

    #[error("no prediction is pending correction")]
    NoPendingPrediction,

    #[error("label {label:?} cannot be corrected to itself")]
    NoOpCorrection { label: String },

    /// 改行や区切り文字列を含み、1行1件の形式で保存できない
    #[error("label {label:?} contains a line break or separator")]
    InvalidLabel { label: String },

    /// メモリ上には反映済みだが永続化に失敗した
    #[error("correction applied for this session but could not be persisted")]
    Persist(#[source] StorageError),
}

impl CorrectionError {
    /// 入力のやり直しで回復できるエラーかどうか
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Persist(_))
    }
}
