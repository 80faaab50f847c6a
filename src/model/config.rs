//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、前処理、ランキング、訂正ストアの設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::corrections::CorrectionBackendKind;
use crate::ml::{Normalization, ResizeFilter};
use crate::ranking::{RankerConfig, UncertainPolicy};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルバンドル（tar.gz）のパス
    pub model_path: String,
    /// CPUバックエンドの推論スレッド数（未指定時はランタイム既定）
    #[serde(default)]
    pub num_threads: Option<usize>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/mobilenet_v1_1.0_224.tar.gz".to_string(),
            num_threads: None,
        }
    }
}

/// 前処理設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSettings {
    /// モデル入力幅
    pub input_width: u32,
    /// モデル入力高さ
    pub input_height: u32,
    /// 画素値の正規化方式（学習時の前処理と一致させる必要がある）
    #[serde(default)]
    pub normalization: Normalization,
    /// リサイズフィルタ
    #[serde(default)]
    pub resize_filter: ResizeFilter,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            input_width: 224,
            input_height: 224,
            normalization: Normalization::default(),
            resize_filter: ResizeFilter::default(),
        }
    }
}

/// ランキング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSettings {
    /// 表示する上位件数
    pub top_n: usize,
    /// 上位1件に要求する最低信頼度
    pub confidence_floor: f32,
    /// 信頼度不足時の表示方針
    #[serde(default)]
    pub uncertain_policy: UncertainPolicy,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            top_n: 1,
            confidence_floor: 0.5,
            uncertain_policy: UncertainPolicy::default(),
        }
    }
}

impl RankingSettings {
    pub fn to_ranker_config(&self) -> RankerConfig {
        RankerConfig {
            top_n: self.top_n,
            confidence_floor: self.confidence_floor,
            uncertain_policy: self.uncertain_policy.clone(),
        }
    }
}

/// 訂正ストア設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionSettings {
    /// 永続化方式
    pub backend: CorrectionBackendKind,
    /// 保存先ファイル
    pub path: String,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            backend: CorrectionBackendKind::JsonDocument,
            path: "corrections.json".to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// 前処理設定
    #[serde(default)]
    pub preprocess: PreprocessSettings,
    /// ランキング設定
    #[serde(default)]
    pub ranking: RankingSettings,
    /// 訂正ストア設定
    #[serde(default)]
    pub corrections: CorrectionSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しないか読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded config");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to read config, using defaults"
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// モデルパスを設定
    pub fn set_model_path(&mut self, path: String) {
        self.model.model_path = path;
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("モデルパス: {}", self.model.model_path);
        if let Some(threads) = self.model.num_threads {
            println!("推論スレッド数: {}", threads);
        }
        println!("\n--- 前処理設定 ---");
        println!(
            "入力サイズ: {}x{}",
            self.preprocess.input_width, self.preprocess.input_height
        );
        println!("正規化: {:?}", self.preprocess.normalization);
        println!("\n--- ランキング設定 ---");
        println!("表示件数: {}", self.ranking.top_n);
        println!("信頼度閾値: {:.2}", self.ranking.confidence_floor);
        println!("\n--- 訂正ストア ---");
        println!("方式: {:?}", self.corrections.backend);
        println!("保存先: {}", self.corrections.path);
        println!("========================\n");
    }
}
