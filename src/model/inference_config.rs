//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータとラベル表から推論に必要な情報をまとめます。

use anyhow::Result;

use crate::error::ClassifyError;
use crate::ml::{Normalization, TensorCodec};
use crate::model::model_metadata::ModelMetadata;
use crate::types::LabelTable;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// モデル名
    pub model_name: String,

    /// モデル入力解像度
    pub input_width: u32,
    pub input_height: u32,

    /// 入力画素の正規化方式
    pub normalization: Normalization,

    /// クラスラベル（出力インデックスと対応）
    pub labels: LabelTable,
}

impl InferenceConfig {
    /// メタデータとラベル表からInferenceConfigを作成
    ///
    /// ラベル数と出力クラス数が一致しない場合は起動時エラーにする。
    pub fn from_metadata(metadata: &ModelMetadata, labels: LabelTable) -> Result<Self> {
        if labels.len() != metadata.num_classes {
            return Err(ClassifyError::LabelTableMismatch {
                labels: labels.len(),
                scores: metadata.num_classes,
            }
            .into());
        }

        Ok(Self {
            model_name: metadata.model_name.clone(),
            input_width: metadata.input_width,
            input_height: metadata.input_height,
            normalization: metadata.normalization,
            labels,
        })
    }

    /// クラス数を取得
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// 入力形状 `[1, H, W, 3]`
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.input_height as usize, self.input_width as usize, 3]
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.labels.get(index)
    }

    /// このモデル用のテンソルコーデック
    pub fn tensor_codec(&self) -> TensorCodec {
        TensorCodec::new(self.input_width, self.input_height, self.normalization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_label_count_mismatch() {
        let metadata = ModelMetadata::new(224, 224, 3, Normalization::Signed, "m".into());
        let labels = LabelTable::new(vec!["dog".into(), "cat".into()]);
        let err = InferenceConfig::from_metadata(&metadata, labels).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClassifyError>(),
            Some(ClassifyError::LabelTableMismatch { labels: 2, scores: 3 })
        ));
    }

    #[test]
    fn test_codec_matches_metadata() {
        let metadata = ModelMetadata::new(160, 128, 2, Normalization::Unsigned, "m".into());
        let labels = LabelTable::new(vec!["dog".into(), "cat".into()]);
        let config = InferenceConfig::from_metadata(&metadata, labels).unwrap();
        let codec = config.tensor_codec();
        assert_eq!(codec.shape(), config.input_shape());
        assert_eq!(codec.shape(), [1, 128, 160, 3]);
        assert_eq!(config.class_index_to_label(1), Some("cat"));
    }
}
