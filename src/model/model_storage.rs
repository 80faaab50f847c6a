//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデル・メタデータ・ラベルを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（入力形状、クラス数、正規化方式など）
//! - model.bin       - モデルの重み（バイナリ）
//! - labels.txt      - クラスラベル（1行1クラス）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;
use crate::types::LabelTable;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";
const LABELS_ENTRY: &str = "labels.txt";

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .context(format!("Failed to add {} to tar", name))
}

/// メタデータ・ラベルと共にモデルをTar.gz形式で保存
///
/// 保存先のパスを返す。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
    labels: &LabelTable,
) -> Result<PathBuf> {
    if labels.len() != metadata.num_classes {
        anyhow::bail!(
            "label count {} does not match num_classes {}",
            labels.len(),
            metadata.num_classes
        );
    }

    // output_pathがすでに.gzで終わっている場合はそのまま、そうでなければ拡張子を追加
    let tar_gz_path = if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    };

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    append_entry(&mut tar_builder, METADATA_ENTRY, metadata.to_json_string()?.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;
    append_entry(&mut tar_builder, LABELS_ENTRY, labels.to_text().as_bytes())?;

    // gzipストリームまで確実に閉じる
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    tracing::info!(path = %tar_gz_path.display(), classes = labels.len(), "model bundle saved");
    Ok(tar_gz_path)
}

/// 指定したエントリだけを読み込む
fn read_entry(tar_gz_path: &Path, name: &str) -> Result<Vec<u8>> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        if path.to_str() == Some(name) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            return Ok(buffer);
        }
    }

    Err(anyhow::anyhow!("{} not found in tar.gz archive", name))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let bytes = read_entry(tar_gz_path, METADATA_ENTRY)?;
    let json_str = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

/// Tar.gzからラベル表を読み込む
pub fn load_labels(tar_gz_path: &Path) -> Result<LabelTable> {
    let bytes = read_entry(tar_gz_path, LABELS_ENTRY)?;
    let text = String::from_utf8(bytes).context("labels.txt is not valid UTF-8")?;
    Ok(LabelTable::from_text(&text))
}

/// メタデータ・モデルバイナリ・ラベルを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>, LabelTable)> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;
    let mut labels_opt: Option<LabelTable> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            Some(LABELS_ENTRY) => {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                labels_opt = Some(LabelTable::from_text(&text));
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt, labels_opt) {
        (Some(metadata), Some(binary), Some(labels)) => Ok((metadata, binary, labels)),
        (None, _, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None, _) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
        (_, _, None) => Err(anyhow::anyhow!("labels.txt not found in tar.gz archive")),
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("モデル名: {}", metadata.model_name);
    println!("入力サイズ: {}x{}", metadata.input_width, metadata.input_height);
    println!("クラス数: {}", metadata.num_classes);
    println!("正規化: {:?}", metadata.normalization);
    println!("パッケージ日時: {}", metadata.packaged_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::Normalization;

    fn sample() -> (ModelMetadata, LabelTable) {
        let labels = LabelTable::new(vec!["dog".into(), "cat".into(), "bird".into()]);
        let metadata = ModelMetadata::new(8, 8, 3, Normalization::Unsigned, "tiny".into());
        (metadata, labels)
    }

    #[test]
    fn test_bundle_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (metadata, labels) = sample();
        let path = save_model_with_metadata(
            &dir.path().join("tiny"),
            &metadata,
            &[1, 2, 3, 4],
            &labels,
        )
        .unwrap();
        assert!(path.to_string_lossy().ends_with("tiny.tar.gz"));

        let (restored, binary, restored_labels) = load_model_with_metadata(&path).unwrap();
        assert_eq!(restored.model_name, "tiny");
        assert_eq!(restored.num_classes, 3);
        assert_eq!(binary, vec![1, 2, 3, 4]);
        assert_eq!(restored_labels, labels);

        assert_eq!(load_metadata(&path).unwrap().input_width, 8);
        assert_eq!(load_labels(&path).unwrap().get(2), Some("bird"));
    }

    #[test]
    fn test_save_rejects_label_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (metadata, _) = sample();
        let labels = LabelTable::new(vec!["dog".into()]);
        assert!(save_model_with_metadata(&dir.path().join("m.tar.gz"), &metadata, &[], &labels).is_err());
    }

    #[test]
    fn test_missing_bundle_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_metadata(&dir.path().join("absent.tar.gz")).is_err());
    }
}
