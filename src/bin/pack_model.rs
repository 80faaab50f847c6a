//! モデルの重み・ラベル・メタデータを1つのバンドルにまとめるツール
//!
//! `--weights` を省略すると初期化直後の重みで動作確認用のバンドルを作ります。

use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn_ndarray::NdArray;
use photo_classifier_lib::ml::{ModelConfig, IMAGE_SIZE};
use photo_classifier_lib::model::{print_metadata_info, save_model_with_metadata, ModelMetadata};
use photo_classifier_lib::{LabelTable, Normalization};
use std::path::PathBuf;

struct Args {
    labels: PathBuf,
    output: PathBuf,
    weights: Option<PathBuf>,
    size: u32,
    normalization: Normalization,
    name: String,
}

fn parse_args() -> Result<Args> {
    let mut labels = None;
    let mut output = None;
    let mut weights = None;
    let mut size = IMAGE_SIZE as u32;
    let mut normalization = Normalization::Signed;
    let mut name = "photo_classifier".to_string();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| anyhow::anyhow!("{} requires a value", arg));
        match arg.as_str() {
            "--labels" => labels = Some(PathBuf::from(value()?)),
            "--output" => output = Some(PathBuf::from(value()?)),
            "--weights" => weights = Some(PathBuf::from(value()?)),
            "--size" => size = value()?.parse().context("--size must be an integer")?,
            "--name" => name = value()?,
            "--normalization" => {
                normalization = match value()?.as_str() {
                    "signed" => Normalization::Signed,
                    "unsigned" => Normalization::Unsigned,
                    other => anyhow::bail!("unknown normalization: {}", other),
                }
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    Ok(Args {
        labels: labels.ok_or_else(|| anyhow::anyhow!("--labels is required"))?,
        output: output.ok_or_else(|| anyhow::anyhow!("--output is required"))?,
        weights,
        size,
        normalization,
        name,
    })
}

fn main() -> Result<()> {
    photo_classifier_lib::init_tracing();
    let args = parse_args()?;

    let labels = LabelTable::load(&args.labels)?;
    if labels.is_empty() {
        anyhow::bail!("label file {} is empty", args.labels.display());
    }

    let model_binary = match &args.weights {
        Some(path) => std::fs::read(path)
            .context(format!("Failed to read weights: {:?}", path))?,
        None => {
            println!("重みが指定されていないため初期化直後のモデルを使用します");
            let device = Default::default();
            let model = ModelConfig::new(labels.len())
                .with_image_size(args.size as usize)
                .init::<NdArray<f32>>(&device);
            BinBytesRecorder::<FullPrecisionSettings>::default()
                .record(model.into_record(), ())
                .map_err(|e| anyhow::anyhow!("failed to serialize weights: {:?}", e))?
        }
    };

    let metadata = ModelMetadata::new(args.size, args.size, labels.len(), args.normalization, args.name);
    let path = save_model_with_metadata(&args.output, &metadata, &model_binary, &labels)?;

    print_metadata_info(&metadata);
    println!("✓ バンドルを保存しました: {}", path.display());
    Ok(())
}
