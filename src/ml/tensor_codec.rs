//! 画像からモデル入力テンソルへの変換
//!
//! 出力は `[1, H, W, 3]` の行優先・チャネルインターリーブ（R,G,B）順です。
//! この並びはモデルの学習時入力と一致している必要があります。

use image::{imageops, imageops::FilterType, DynamicImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::types::{InputTensor, PixelLayout, RawImage};

/// 画素値の正規化方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Normalization {
    /// `(v - 127.5) / 127.5` → [-1, 1]
    #[default]
    Signed,
    /// `v / 255.0` → [0, 1]
    Unsigned,
}

impl Normalization {
    #[inline]
    pub fn apply(self, value: u8) -> f32 {
        match self {
            Normalization::Signed => (value as f32 - 127.5) / 127.5,
            Normalization::Unsigned => value as f32 / 255.0,
        }
    }

    /// 正規化後の値域
    pub fn range(self) -> (f32, f32) {
        match self {
            Normalization::Signed => (-1.0, 1.0),
            Normalization::Unsigned => (0.0, 1.0),
        }
    }
}

/// リサイズフィルタ（最近傍補間はエイリアシングで信頼度が変わるため提供しない）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    #[default]
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Bilinear => FilterType::Triangle,
            ResizeFilter::Bicubic => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// 画像をモデル入力テンソルに変換するコーデック
#[derive(Debug, Clone)]
pub struct TensorCodec {
    width: u32,
    height: u32,
    normalization: Normalization,
    filter: ResizeFilter,
}

impl TensorCodec {
    pub fn new(width: u32, height: u32, normalization: Normalization) -> Self {
        Self {
            width,
            height,
            normalization,
            filter: ResizeFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// テンソル形状 `[1, H, W, 3]`
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }

    /// デコード済み画像をテンソルに変換
    pub fn encode(&self, image: &DynamicImage) -> Result<InputTensor, ClassifyError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifyError::invalid_image(format!(
                "image has zero extent: {}x{}",
                image.width(),
                image.height()
            )));
        }

        // アルファは無視
        let rgb = image.to_rgb8();
        Ok(self.encode_rgb(&rgb))
    }

    /// キャプチャ元の生バッファをテンソルに変換
    pub fn encode_raw(&self, raw: RawImage) -> Result<InputTensor, ClassifyError> {
        let image = raw_to_dynamic(raw)?;
        self.encode(&image)
    }

    fn encode_rgb(&self, rgb: &RgbImage) -> InputTensor {
        let resized;
        let source = if rgb.dimensions() == (self.width, self.height) {
            rgb
        } else {
            resized = imageops::resize(rgb, self.width, self.height, self.filter.into());
            &resized
        };

        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        // pixels() は行優先で走査する
        for pixel in source.pixels() {
            for channel in 0..3 {
                data.push(self.normalization.apply(pixel[channel]));
            }
        }

        InputTensor::new(self.shape(), data)
    }
}

fn raw_to_dynamic(raw: RawImage) -> Result<DynamicImage, ClassifyError> {
    let RawImage {
        width,
        height,
        layout,
        pixels,
    } = raw;

    if width == 0 || height == 0 {
        return Err(ClassifyError::invalid_image(format!(
            "image has zero extent: {}x{}",
            width, height
        )));
    }

    let expected = width as usize * height as usize * layout.channels();
    if pixels.len() != expected {
        return Err(ClassifyError::invalid_image(format!(
            "{:?} buffer for {}x{} must be {} bytes, got {}",
            layout,
            width,
            height,
            expected,
            pixels.len()
        )));
    }

    let image = match layout {
        PixelLayout::Rgba8 => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        PixelLayout::Rgb8 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
    };
    image.ok_or_else(|| ClassifyError::invalid_image("pixel buffer does not fit image dimensions"))
}
