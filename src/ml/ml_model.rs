//! 機械学習モデルの共通定義
//!
//! 写真分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// 既定の入力画像サイズ
pub const IMAGE_SIZE: usize = 224;

/// 既定のクラス数（ImageNet 1000クラス + background）
pub const NUM_CLASSES: usize = 1001;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    ///
    /// バンドルのメタデータと揃えて記録するだけの値。全体平均プーリングで
    /// 空間方向を畳むため、層の形状はこの値に依存しない。
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> PhotoClassifier<B> {
        tracing::debug!(
            image_size = self.image_size,
            num_classes = self.num_classes,
            "initializing classifier module"
        );

        PhotoClassifier {
            // Conv1: 3x3 (same padding)
            conv1: Conv2dConfig::new([3, 32], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            // Conv2: 3x3 (same padding)
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            // Conv3: 3x3 (same padding)
            conv3: Conv2dConfig::new([64, 128], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),

            // 入力サイズに依存しない特徴ベクトルにする
            gap: AdaptiveAvgPool2dConfig::new([1, 1]).init(),

            // 全結合層
            fc1: LinearConfig::new(128, 256).init(device),
            fc2: LinearConfig::new(256, self.num_classes).init(device),

            activation: Relu::new(),
        }
    }
}

/// 写真分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 + ReLU
/// - Global Average Pooling → 128次元
/// - FC: 128 -> 256 + ReLU
/// - FC: 256 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct PhotoClassifier<B: Backend> {
    conv1: Conv2d<B>,  // 3 -> 32
    pool1: MaxPool2d,  // 2x2
    conv2: Conv2d<B>,  // 32 -> 64
    pool2: MaxPool2d,  // 2x2
    conv3: Conv2d<B>,  // 64 -> 128
    gap: AdaptiveAvgPool2d,

    fc1: Linear<B>, // 128 -> 256
    fc2: Linear<B>, // 256 -> num_classes

    activation: Relu,
}

impl<B: Backend> PhotoClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, H, W, 3]（NHWC）
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        // NHWC -> NCHW
        let x = images.permute([0, 3, 1, 2]);

        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        // [b, 128, 1, 1] -> [b, 128]
        let x = self.gap.forward(x);
        let x = x.reshape([batch_size, 128]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_output_shape() {
        let device = Default::default();
        let model = ModelConfig::new(5)
            .with_image_size(16)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 16, 16, 3], &device);
        let output = model.forward(images);
        assert_eq!(output.dims(), [2, 5]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let model = ModelConfig::new(4)
            .with_image_size(12)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::ones([1, 12, 12, 3], &device);
        let probs = model
            .probabilities(images)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(probs.len(), 4);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }
}
