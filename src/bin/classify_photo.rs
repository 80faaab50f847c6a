//! 写真を分類して結果を表示するコマンド
//!
//! 使い方:
//!   classify_photo [--config config.json] <image>            分類
//!   classify_photo [--config config.json] <image> --correct <label>
//!                                                            分類して訂正を登録
//!   classify_photo [--config config.json] --list             訂正一覧

use photo_classifier_lib::model::AppConfig;
use photo_classifier_lib::{ClassificationPipeline, CorrectionStore, Prediction};
use std::path::PathBuf;
use std::process::ExitCode;

struct Args {
    config_path: PathBuf,
    image_path: Option<PathBuf>,
    correction: Option<String>,
    list: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config_path: AppConfig::default_path(),
        image_path: None,
        correction: None,
        list: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                args.config_path = iter
                    .next()
                    .map(PathBuf::from)
                    .ok_or("--config にはパスが必要です")?;
            }
            "--correct" => {
                args.correction = Some(iter.next().ok_or("--correct にはラベルが必要です")?);
            }
            "--list" => args.list = true,
            other if args.image_path.is_none() && !other.starts_with("--") => {
                args.image_path = Some(PathBuf::from(other));
            }
            other => return Err(format!("不明な引数: {}", other)),
        }
    }

    if !args.list && args.image_path.is_none() {
        return Err("画像ファイルを指定してください".to_string());
    }
    Ok(args)
}

fn format_prediction(prediction: &Prediction) -> String {
    let mut line = format!(
        "Label: {}, Confidence: {:.2}%",
        prediction.label,
        prediction.confidence * 100.0
    );
    if let Some(original) = &prediction.corrected_from {
        line.push_str(&format!(" (Corrected from {})", original));
    }
    line
}

fn print_corrections(entries: &[(String, String)]) {
    if entries.is_empty() {
        println!("訂正はまだありません");
        return;
    }
    for (wrong, correct) in entries {
        println!("{} -> {}", wrong, correct);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(&args.config_path);

    // 一覧表示だけならモデルは読み込まない
    if args.list && args.image_path.is_none() {
        let store = CorrectionStore::open(
            config.corrections.backend.open(&config.corrections.path),
        );
        print_corrections(&store.entries());
        return Ok(());
    }

    let pipeline = ClassificationPipeline::from_config(&config)?;

    if let Some(image_path) = &args.image_path {
        let image = image::open(image_path)
            .map_err(|e| anyhow::anyhow!("画像の読み込みに失敗しました {}: {}", image_path.display(), e))?;
        let result = pipeline.classify(&image)?;

        for (rank, prediction) in result.predictions.iter().enumerate() {
            println!("{}. {}", rank + 1, format_prediction(prediction));
        }
        if result.low_confidence {
            println!("信頼度が低いため訂正は受け付けません");
        }
    }

    if let Some(correction) = &args.correction {
        match pipeline.submit_correction(correction) {
            Ok(prediction) => println!("訂正を登録しました: {}", format_prediction(&prediction)),
            Err(e) if e.is_validation() => eprintln!("訂正できません: {}", e),
            Err(e) => {
                eprintln!("警告: {}", e);
                eprintln!("この訂正は再起動後に失われる可能性があります");
            }
        }
    }

    if args.list {
        print_corrections(&pipeline.list_corrections());
    }

    pipeline.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    photo_classifier_lib::init_tracing();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("使い方: classify_photo [--config <path>] <image> [--correct <label>] [--list]");
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
