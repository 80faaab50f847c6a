//! 分類パイプライン
//!
//! 画像 → テンソル → スコア → 訂正適用済みの予測、の順に処理し、
//! 直近の予測を訂正入力のために保持します。

use image::DynamicImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::corrections::CorrectionStore;
use crate::error::{ClassifyError, CorrectionError};
use crate::ml::{InferenceEngine, TensorCodec};
use crate::ranking::ResultRanker;
use crate::types::{Classification, LabelTable, Prediction, RawImage};

/// 訂正対象として保持する直近の予測
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentPrediction {
    /// モデルが出力した元ラベル（訂正のキー）
    pub original_label: String,
    /// 表示中の予測
    pub prediction: Prediction,
}

pub struct ClassificationPipeline {
    codec: TensorCodec,
    engine: InferenceEngine,
    labels: LabelTable,
    ranker: ResultRanker,
    corrections: CorrectionStore,
    current: Mutex<Option<CurrentPrediction>>,
}

impl ClassificationPipeline {
    pub fn new(
        codec: TensorCodec,
        engine: InferenceEngine,
        labels: LabelTable,
        ranker: ResultRanker,
        corrections: CorrectionStore,
    ) -> Self {
        Self {
            codec,
            engine,
            labels,
            ranker,
            corrections,
            current: Mutex::new(None),
        }
    }

    /// 設定ファイルの内容からパイプラインを構築
    ///
    /// モデルバンドルのメタデータにある入力サイズと正規化方式が設定より優先される。
    #[cfg(feature = "ml")]
    pub fn from_config(config: &crate::model::AppConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let (engine, inference_config) = InferenceEngine::load(
            &config.model.model_path,
            config.device_type,
            config.model.num_threads,
        )
        .context("Failed to initialize inference engine")?;

        let preprocess = &config.preprocess;
        if (preprocess.input_width, preprocess.input_height)
            != (inference_config.input_width, inference_config.input_height)
            || preprocess.normalization != inference_config.normalization
        {
            tracing::warn!(
                configured = ?(preprocess.input_width, preprocess.input_height, preprocess.normalization),
                model = ?(inference_config.input_width, inference_config.input_height, inference_config.normalization),
                "preprocess settings differ from model metadata, using model metadata"
            );
        }
        let codec = inference_config
            .tensor_codec()
            .with_filter(preprocess.resize_filter);

        let corrections = CorrectionStore::open(
            config
                .corrections
                .backend
                .open(&config.corrections.path),
        );
        let ranker = ResultRanker::new(config.ranking.to_ranker_config());

        Ok(Self::new(
            codec,
            engine,
            inference_config.labels,
            ranker,
            corrections,
        ))
    }

    /// 画像を分類する
    pub fn classify(&self, image: &DynamicImage) -> Result<Classification, ClassifyError> {
        let tensor = self.codec.encode(image)?;
        self.classify_tensor(tensor)
    }

    /// キャプチャ元の生バッファを分類する
    pub fn classify_raw(&self, raw: RawImage) -> Result<Classification, ClassifyError> {
        let tensor = self.codec.encode_raw(raw)?;
        self.classify_tensor(tensor)
    }

    /// tokio のブロッキングスレッドで分類する
    pub async fn classify_async(
        self: Arc<Self>,
        image: DynamicImage,
    ) -> Result<Classification, ClassifyError> {
        tokio::task::spawn_blocking(move || self.classify(&image))
            .await
            .map_err(|e| ClassifyError::TaskJoin(e.to_string()))?
    }

    fn classify_tensor(&self, tensor: crate::types::InputTensor) -> Result<Classification, ClassifyError> {
        let scores = self.engine.run(&tensor)?;
        let classification = self.ranker.rank(&scores, &self.labels, &self.corrections)?;

        let current = if classification.low_confidence {
            None
        } else {
            classification.top().map(|top| CurrentPrediction {
                original_label: top.original_label().to_string(),
                prediction: top.clone(),
            })
        };
        *self.lock_current() = current;

        match classification.top() {
            Some(top) => tracing::info!(
                label = %top.label,
                confidence = top.confidence,
                corrected = top.is_corrected(),
                low_confidence = classification.low_confidence,
                "classified"
            ),
            None => tracing::info!("classified with no predictions"),
        }

        Ok(classification)
    }

    /// 直近の予測に対する訂正を登録する
    ///
    /// 保存に失敗した場合も表示中の予測は訂正後ラベルに更新される。
    pub fn submit_correction(&self, corrected_text: &str) -> Result<Prediction, CorrectionError> {
        let mut current = self.lock_current();
        let Some(pending) = current.as_mut() else {
            if corrected_text.trim().is_empty() {
                return Err(CorrectionError::EmptyCorrection);
            }
            return Err(CorrectionError::NoPendingPrediction);
        };

        let result = self.corrections.set(&pending.original_label, corrected_text);
        match &result {
            Ok(()) | Err(CorrectionError::Persist(_)) => {
                pending.prediction.label = corrected_text.trim().to_string();
                pending.prediction.corrected_from = Some(pending.original_label.clone());
            }
            Err(_) => {}
        }

        result.map(|()| pending.prediction.clone())
    }

    /// 表示中の予測が正しいことを確認し、訂正待ちを解除する
    pub fn confirm_prediction(&self) -> Option<Prediction> {
        self.lock_current().take().map(|current| current.prediction)
    }

    /// 登録済みの訂正一覧
    pub fn list_corrections(&self) -> Vec<(String, String)> {
        self.corrections.entries()
    }

    pub fn current_prediction(&self) -> Option<CurrentPrediction> {
        self.lock_current().clone()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn corrections(&self) -> &CorrectionStore {
        &self.corrections
    }

    /// モデルを解放する
    pub fn shutdown(self) {
        self.engine.shutdown();
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<CurrentPrediction>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::JsonDocumentBackend;
    use crate::ml::{ModelRuntime, Normalization, RuntimeError};
    use crate::ranking::{RankerConfig, UncertainPolicy, UNCERTAIN_LABEL};
    use image::{Rgb, RgbImage};
    use std::path::Path;

    /// 固定スコアを返すテスト用ランタイム
    struct ScriptedRuntime {
        scores: Vec<f32>,
    }

    impl ModelRuntime for ScriptedRuntime {
        fn input_shape(&self) -> [usize; 4] {
            [1, 4, 4, 3]
        }

        fn output_len(&self) -> usize {
            self.scores.len()
        }

        fn infer(&self, _input: &[f32]) -> Result<Vec<f32>, RuntimeError> {
            Ok(self.scores.clone())
        }
    }

    fn pipeline_with(scores: Vec<f32>, top_n: usize, store_path: &Path) -> ClassificationPipeline {
        let labels = LabelTable::new(vec!["dog".into(), "cat".into(), "bird".into()]);
        ClassificationPipeline::new(
            TensorCodec::new(4, 4, Normalization::Signed),
            InferenceEngine::new(Box::new(ScriptedRuntime { scores })),
            labels,
            ResultRanker::new(RankerConfig {
                top_n,
                confidence_floor: 0.5,
                uncertain_policy: UncertainPolicy::default(),
            }),
            CorrectionStore::open(Box::new(JsonDocumentBackend::new(store_path))),
        )
    }

    fn photo() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb([120, 80, 40])))
    }

    #[test]
    fn test_correction_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json"));

        let first = pipeline.classify(&photo()).unwrap();
        assert_eq!(first.predictions.len(), 1);
        assert_eq!(first.predictions[0].label, "cat");
        assert_eq!(first.predictions[0].confidence, 0.7);

        let updated = pipeline.submit_correction("kitten").unwrap();
        assert_eq!(updated.label, "kitten");
        assert_eq!(updated.confidence, 0.7);
        assert_eq!(
            pipeline.current_prediction().unwrap().prediction.label,
            "kitten"
        );

        let second = pipeline.classify(&photo()).unwrap();
        assert_eq!(second.predictions[0].label, "kitten");
        assert_eq!(second.predictions[0].confidence, 0.7);
        assert_eq!(
            pipeline.list_corrections(),
            vec![("cat".to_string(), "kitten".to_string())]
        );
    }

    #[test]
    fn test_recorrection_uses_model_label_as_key() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json"));

        pipeline.classify(&photo()).unwrap();
        pipeline.submit_correction("kitten").unwrap();
        pipeline.classify(&photo()).unwrap();
        pipeline.submit_correction("lion").unwrap();

        assert_eq!(
            pipeline.list_corrections(),
            vec![("cat".to_string(), "lion".to_string())]
        );
    }

    #[test]
    fn test_uncertain_result_has_no_pending_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.3, 0.3, 0.4], 1, &dir.path().join("c.json"));

        let result = pipeline.classify(&photo()).unwrap();
        assert!(result.low_confidence);
        assert_eq!(result.predictions[0].label, UNCERTAIN_LABEL);
        assert!(pipeline.current_prediction().is_none());
        assert!(matches!(
            pipeline.submit_correction("sparrow"),
            Err(CorrectionError::NoPendingPrediction)
        ));
        assert!(pipeline.list_corrections().is_empty());
    }

    #[test]
    fn test_empty_correction_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json"));
        pipeline.classify(&photo()).unwrap();

        assert!(matches!(
            pipeline.submit_correction("   "),
            Err(CorrectionError::EmptyCorrection)
        ));
        assert_eq!(pipeline.current_prediction().unwrap().prediction.label, "cat");
        assert!(pipeline.list_corrections().is_empty());
    }

    #[test]
    fn test_correction_before_any_classification() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json"));
        assert!(matches!(
            pipeline.submit_correction("kitten"),
            Err(CorrectionError::NoPendingPrediction)
        ));
    }

    #[test]
    fn test_persist_failure_still_updates_display() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 1, &blocker.join("c.json"));

        pipeline.classify(&photo()).unwrap();
        assert!(matches!(
            pipeline.submit_correction("kitten"),
            Err(CorrectionError::Persist(_))
        ));
        assert_eq!(
            pipeline.current_prediction().unwrap().prediction.label,
            "kitten"
        );
        assert_eq!(pipeline.classify(&photo()).unwrap().predictions[0].label, "kitten");
    }

    #[test]
    fn test_confirm_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json"));
        pipeline.classify(&photo()).unwrap();

        let confirmed = pipeline.confirm_prediction().unwrap();
        assert_eq!(confirmed.label, "cat");
        assert!(pipeline.current_prediction().is_none());
    }

    #[test]
    fn test_top5_applies_corrections_to_all_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, r#"{"dog": "puppy"}"#).unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 5, &path);

        let result = pipeline.classify(&photo()).unwrap();
        let names: Vec<_> = result.predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(names, vec!["cat", "puppy", "bird"]);
    }

    #[test]
    fn test_invalid_image_aborts_classification() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json"));
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            pipeline.classify(&empty),
            Err(ClassifyError::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_label_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(vec![0.5, 0.5], 1, &dir.path().join("c.json"));
        assert!(matches!(
            pipeline.classify(&photo()),
            Err(ClassifyError::LabelTableMismatch { labels: 3, scores: 2 })
        ));
    }

    #[test]
    fn test_shared_pipeline_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json")));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let pipeline = Arc::clone(&pipeline);
                std::thread::spawn(move || {
                    for round in 0..10 {
                        let result = pipeline.classify(&photo()).unwrap();
                        assert_eq!(result.predictions[0].original_label(), "cat");
                        pipeline
                            .submit_correction(&format!("kitten-{}-{}", worker, round))
                            .unwrap();
                        let stored = pipeline.corrections().get("cat").unwrap();
                        assert!(stored.starts_with("kitten-"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let entries = pipeline.list_corrections();
        assert_eq!(entries.len(), 1);
        let final_label = pipeline.classify(&photo()).unwrap().predictions[0].label.clone();
        assert_eq!(final_label, entries[0].1);

        let reopened = CorrectionStore::open(Box::new(JsonDocumentBackend::new(dir.path().join("c.json"))));
        assert_eq!(reopened.entries(), entries);
    }

    #[tokio::test]
    async fn test_classify_async() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(pipeline_with(vec![0.2, 0.7, 0.1], 1, &dir.path().join("c.json")));
        let result = pipeline.clone().classify_async(photo()).await.unwrap();
        assert_eq!(result.predictions[0].label, "cat");
        assert!(pipeline.current_prediction().is_some());
    }
}
