use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 1件の予測結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 表示用ラベル（訂正後、または不確実時のセンチネル）
    pub label: String,
    /// モデルのスコア（訂正しても変化しない）
    pub confidence: f32,
    /// ラベル表でのインデックス
    pub class_index: usize,
    /// 訂正が適用された場合の元ラベル
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_from: Option<String>,
}

impl Prediction {
    /// モデルが出力した元のラベル
    pub fn original_label(&self) -> &str {
        self.corrected_from.as_deref().unwrap_or(&self.label)
    }

    pub fn is_corrected(&self) -> bool {
        self.corrected_from.is_some()
    }
}

/// 1回の分類結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// スコア降順の予測
    pub predictions: Vec<Prediction>,
    /// 上位1件の信頼度が閾値未満
    pub low_confidence: bool,
}

impl Classification {
    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }
}

/// モデル出力のスコア列（インデックスはラベル表と対応）
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(scores: Vec<f32>) -> Self {
        Self(scores)
    }
}

/// モデル入力テンソル `[1, H, W, 3]`（NHWC、RGB順）
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl InputTensor {
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// クラス名の一覧
///
/// 改行区切りのテキストから読み込み、N行目がモデル出力のインデックスNに対応します。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// 前後の空白は取り除く（訂正のキーと揃えるため）
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels: labels
                .into_iter()
                .map(|label| label.trim().to_string())
                .collect(),
        }
    }

    /// 改行区切りテキストから生成（空行もインデックスを保つため保持）
    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines().map(str::to_string).collect())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .context(format!("Failed to read label file: {:?}", path))?;
        Ok(Self::from_text(&text))
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn to_text(&self) -> String {
        let mut text = self.labels.join("\n");
        text.push('\n');
        text
    }
}

/// 画素の並び
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Rgba8,
    Rgb8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgba8 => 4,
            PixelLayout::Rgb8 => 3,
        }
    }
}

/// キャプチャ元から渡されるデコード済みの生画像
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub pixels: Vec<u8>,
}
