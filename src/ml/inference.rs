//! モデル推論機能
//!
//! `InferenceEngine` はモデルランタイムを「テンソル入力 → スコア出力」の契約で包み、
//! 入出力形状を検証します。

use crate::error::ClassifyError;
use crate::types::{InputTensor, ScoreVector};

/// ランタイム内部のエラー
pub type RuntimeError = Box<dyn std::error::Error + Send + Sync>;

/// 固定形状のニューラルネット実行器
///
/// 実装は共有・読み取り専用のモデルを保持し、`infer` の並行呼び出しに耐えること。
pub trait ModelRuntime: Send + Sync {
    /// 宣言された入力形状 `[1, H, W, 3]`
    fn input_shape(&self) -> [usize; 4];

    /// 宣言された出力長（クラス数）
    fn output_len(&self) -> usize;

    /// 1枚分の推論を実行してスコアを返す
    fn infer(&self, input: &[f32]) -> Result<Vec<f32>, RuntimeError>;

    /// ログ用の名前
    fn name(&self) -> &str {
        "runtime"
    }
}

/// 推論エンジン
pub struct InferenceEngine {
    runtime: Box<dyn ModelRuntime>,
}

impl InferenceEngine {
    pub fn new(runtime: Box<dyn ModelRuntime>) -> Self {
        tracing::info!(
            runtime = runtime.name(),
            input_shape = ?runtime.input_shape(),
            output_len = runtime.output_len(),
            "inference engine ready"
        );
        Self { runtime }
    }

    /// モデルバンドルを読み込んで推論エンジンを初期化
    #[cfg(feature = "ml")]
    pub fn load<P: AsRef<std::path::Path>>(
        model_path: P,
        device_type: crate::model::DeviceType,
        num_threads: Option<usize>,
    ) -> anyhow::Result<(Self, crate::model::InferenceConfig)> {
        let (runtime, config) = burn_runtime::load_runtime(model_path.as_ref(), device_type, num_threads)?;
        Ok((Self::new(runtime), config))
    }

    pub fn input_shape(&self) -> [usize; 4] {
        self.runtime.input_shape()
    }

    pub fn output_len(&self) -> usize {
        self.runtime.output_len()
    }

    /// テンソルを推論してスコアを返す
    pub fn run(&self, tensor: &InputTensor) -> Result<ScoreVector, ClassifyError> {
        let expected = self.runtime.input_shape();
        let shape = tensor.shape();
        let element_count: usize = shape.iter().product();
        if shape != expected || tensor.data().len() != element_count {
            return Err(ClassifyError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: if tensor.data().len() == element_count {
                    shape.to_vec()
                } else {
                    vec![tensor.data().len()]
                },
            });
        }

        let scores = self
            .runtime
            .infer(tensor.data())
            .map_err(ClassifyError::Inference)?;

        if scores.len() != self.runtime.output_len() {
            return Err(ClassifyError::OutputMismatch {
                expected: self.runtime.output_len(),
                actual: scores.len(),
            });
        }

        Ok(ScoreVector::new(scores))
    }

    /// モデルを解放する
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for InferenceEngine {
    fn drop(&mut self) {
        tracing::debug!(runtime = self.runtime.name(), "releasing model");
    }
}

#[cfg(feature = "ml")]
pub use burn_runtime::BurnRuntime;

#[cfg(feature = "ml")]
mod burn_runtime {
    use anyhow::{Context, Result};
    use burn::{
        backend::Wgpu,
        module::Module,
        record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
        tensor::{backend::Backend, Tensor},
    };
    use burn_ndarray::NdArray;
    use std::path::Path;
    use std::sync::{Mutex, PoisonError};

    use super::{ModelRuntime, RuntimeError};
    use crate::ml::{ModelConfig, PhotoClassifier};
    use crate::model::{load_model_with_metadata, DeviceType, InferenceConfig};

    /// burn バックエンド上の分類モデル
    pub struct BurnRuntime<B: Backend> {
        model: Mutex<PhotoClassifier<B>>,
        device: B::Device,
        input_shape: [usize; 4],
        output_len: usize,
        pool: Option<rayon::ThreadPool>,
        name: String,
    }

    impl<B: Backend> BurnRuntime<B> {
        /// 重みバイナリからモデルを復元
        pub fn from_bytes(
            config: &InferenceConfig,
            model_binary: Vec<u8>,
            device: B::Device,
            num_threads: Option<usize>,
        ) -> Result<Self> {
            let model_config = ModelConfig::new(config.num_classes())
                .with_image_size(config.input_height as usize);
            let model = model_config.init::<B>(&device);

            let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
            let record = recorder
                .load(model_binary, &device)
                .map_err(|e| anyhow::anyhow!("failed to load model weights: {:?}", e))?;
            let model = model.load_record(record);

            Self::from_module(model, config, device, num_threads)
        }

        /// 初期化済みモジュールから生成
        pub fn from_module(
            model: PhotoClassifier<B>,
            config: &InferenceConfig,
            device: B::Device,
            num_threads: Option<usize>,
        ) -> Result<Self> {
            let pool = match num_threads {
                Some(threads) => Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(threads)
                        .build()
                        .context("Failed to build inference thread pool")?,
                ),
                None => None,
            };

            Ok(Self {
                model: Mutex::new(model),
                device,
                input_shape: config.input_shape(),
                output_len: config.num_classes(),
                pool,
                name: format!("burn/{}", std::any::type_name::<B>()),
            })
        }

        fn forward(&self, input: &[f32]) -> Result<Vec<f32>, RuntimeError> {
            let tensor = Tensor::<B, 1>::from_floats(input, &self.device).reshape(self.input_shape);
            let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
            let output = model.probabilities(tensor);
            drop(model);

            output
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| format!("failed to read scores: {:?}", e).into())
        }
    }

    impl<B: Backend> ModelRuntime for BurnRuntime<B>
    where
        B::Device: Send + Sync,
        PhotoClassifier<B>: Send,
    {
        fn input_shape(&self) -> [usize; 4] {
            self.input_shape
        }

        fn output_len(&self) -> usize {
            self.output_len
        }

        fn infer(&self, input: &[f32]) -> Result<Vec<f32>, RuntimeError> {
            match &self.pool {
                Some(pool) => pool.install(|| self.forward(input)),
                None => self.forward(input),
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// バンドルからデバイス種別に応じたランタイムを構築
    pub(super) fn load_runtime(
        model_path: &Path,
        device_type: DeviceType,
        num_threads: Option<usize>,
    ) -> Result<(Box<dyn ModelRuntime>, InferenceConfig)> {
        let (metadata, model_binary, labels) = load_model_with_metadata(model_path)
            .context(format!("Failed to load model bundle: {:?}", model_path))?;
        let config = InferenceConfig::from_metadata(&metadata, labels)?;

        tracing::info!(
            path = %model_path.display(),
            device = %device_type,
            classes = config.num_classes(),
            "loading model"
        );

        let runtime: Box<dyn ModelRuntime> = match device_type {
            DeviceType::Wgpu => Box::new(BurnRuntime::<Wgpu>::from_bytes(
                &config,
                model_binary,
                Default::default(),
                num_threads,
            )?),
            DeviceType::Cpu => Box::new(BurnRuntime::<NdArray<f32>>::from_bytes(
                &config,
                model_binary,
                Default::default(),
                num_threads,
            )?),
        };

        Ok((runtime, config))
    }
}
