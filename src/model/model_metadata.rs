//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//!
//! ## 入力テンソルの仕様
//! - 形状: `[1, input_height, input_width, 3]`（NHWC）
//! - チャネル順: R, G, B（行優先、画素ごとにインターリーブ）
//! - 正規化: `normalization` に記録された方式（学習時の前処理と一致）

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::Normalization;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
/// - labels.txt: クラスラベル（1行1クラス）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// モデル名（例: "mobilenet_v1_1.0_224"）
    pub model_name: String,

    /// モデル入力幅（ピクセル）
    pub input_width: u32,

    /// モデル入力高さ（ピクセル）
    pub input_height: u32,

    /// 出力クラス数（labels.txtの行数と一致する）
    pub num_classes: usize,

    /// 入力画素の正規化方式
    #[serde(default)]
    pub normalization: Normalization,

    /// パッケージング時刻（ISO8601形式）
    pub packaged_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        input_width: u32,
        input_height: u32,
        num_classes: usize,
        normalization: Normalization,
        model_name: String,
    ) -> Self {
        let packaged_at = chrono::Local::now().to_rfc3339();

        Self {
            model_name,
            input_width,
            input_height,
            num_classes,
            normalization,
            packaged_at,
        }
    }

    /// 宣言された入力形状 `[1, H, W, 3]`
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.input_height as usize, self.input_width as usize, 3]
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
