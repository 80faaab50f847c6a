//! 写真分類とラベル訂正
//!
//! 撮影画像をモデル入力テンソルに変換して推論し、上位の予測を返します。
//! ユーザーが誤ったラベルを訂正すると、次回以降の同じラベルは訂正後の名前で表示されます。
#![recursion_limit = "256"]

mod types;
pub mod error;

pub mod ml;
pub mod model;
pub mod ranking;
pub mod corrections;
pub mod pipeline;

pub use types::{Classification, InputTensor, LabelTable, PixelLayout, Prediction, RawImage, ScoreVector};
pub use error::{ClassifyError, CorrectionError, StorageError};
pub use ml::{InferenceEngine, ModelRuntime, Normalization, ResizeFilter, TensorCodec};
pub use ranking::{RankerConfig, ResultRanker, UncertainPolicy};
pub use corrections::{CorrectionBackend, CorrectionBackendKind, CorrectionLookup, CorrectionMap, CorrectionStore};
pub use pipeline::{ClassificationPipeline, CurrentPrediction};

/// バイナリ用のログ初期化（`RUST_LOG` で出力レベルを指定）
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
