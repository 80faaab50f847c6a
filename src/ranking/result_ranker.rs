//! スコアのランキングと信頼度ゲート
//!
//! スコアをラベルと対応付けて降順に並べ、上位N件に訂正を適用します。
//! 副作用はなく、同じ入力と同じ訂正状態に対して常に同じ結果を返します。

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::corrections::CorrectionLookup;
use crate::error::ClassifyError;
use crate::types::{Classification, LabelTable, Prediction, ScoreVector};

/// 不確実時ラベルの既定値
pub const UNCERTAIN_LABEL: &str = "Uncertain";

/// 上位1件の信頼度が閾値未満だった場合の扱い
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UncertainPolicy {
    /// ラベルをセンチネル文字列に置き換える（訂正は適用しない）
    Relabel { sentinel: String },
    /// ラベルを空文字にする（訂正は適用しない）
    Blank,
    /// ラベルと訂正はそのまま、`low_confidence` だけを立てる
    FlagOnly,
}

impl Default for UncertainPolicy {
    fn default() -> Self {
        UncertainPolicy::Relabel {
            sentinel: UNCERTAIN_LABEL.to_string(),
        }
    }
}

impl UncertainPolicy {
    fn masked_label(&self) -> Option<&str> {
        match self {
            UncertainPolicy::Relabel { sentinel } => Some(sentinel),
            UncertainPolicy::Blank => Some(""),
            UncertainPolicy::FlagOnly => None,
        }
    }
}

/// ランキング設定
#[derive(Debug, Clone, PartialEq)]
pub struct RankerConfig {
    pub top_n: usize,
    pub confidence_floor: f32,
    pub uncertain_policy: UncertainPolicy,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            top_n: 1,
            confidence_floor: 0.5,
            uncertain_policy: UncertainPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultRanker {
    config: RankerConfig,
}

impl ResultRanker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// スコアを順位付けして予測一覧を作る
    pub fn rank(
        &self,
        scores: &ScoreVector,
        labels: &LabelTable,
        corrections: &dyn CorrectionLookup,
    ) -> Result<Classification, ClassifyError> {
        if labels.len() != scores.len() {
            return Err(ClassifyError::LabelTableMismatch {
                labels: labels.len(),
                scores: scores.len(),
            });
        }

        let ranked = top_indices(scores.as_slice(), self.config.top_n);

        // NaN は閾値未満として扱う
        let low_confidence = match ranked.first() {
            Some(&(_, top)) => !(top >= self.config.confidence_floor),
            None => true,
        };
        let mask = if low_confidence {
            self.config.uncertain_policy.masked_label()
        } else {
            None
        };

        let predictions = ranked
            .into_iter()
            .map(|(index, confidence)| {
                let original = labels.get(index).unwrap_or_default();
                match mask {
                    Some(masked) => Prediction {
                        label: masked.to_string(),
                        confidence,
                        class_index: index,
                        corrected_from: None,
                    },
                    None => match corrections.corrected_label(original) {
                        Some(corrected) => Prediction {
                            label: corrected,
                            confidence,
                            class_index: index,
                            corrected_from: Some(original.to_string()),
                        },
                        None => Prediction {
                            label: original.to_string(),
                            confidence,
                            class_index: index,
                            corrected_from: None,
                        },
                    },
                }
            })
            .collect();

        Ok(Classification {
            predictions,
            low_confidence,
        })
    }
}

/// スコア降順（同点はインデックス昇順、NaNは最後）に上位 `n` 件を返す
fn top_indices(scores: &[f32], n: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| compare_desc(*a, *b).then(ia.cmp(ib)));
    indexed.truncate(n);
    indexed
}

fn compare_desc(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
