use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use emoflix_core::classifier::TensorLayout;
use emoflix_core::decode;
use emoflix_core::{ClaheParams, Emotion, FusionPolicy, GenreMap, ModelPaths, OnnxEmotionModel, Pipeline};
use image::ImageFormat;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const DEFAULT_URL: &str = "http://127.0.0.1:5000";

#[derive(Parser)]
#[command(name = "emoflix", version, about = "EmoFlix emotion detection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze image files locally with the ONNX models (no daemon needed)
    Analyze {
        /// One file for a single-frame decision, several for a multi-frame one
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Directory containing the ONNX model files
        #[arg(long, env = "EMOFLIX_MODEL_DIR")]
        model_dir: Option<PathBuf>,
        /// Classifier input tensor layout (nchw or nhwc)
        #[arg(long, env = "EMOFLIX_CLASSIFIER_LAYOUT", default_value = "nchw")]
        layout: TensorLayout,
        /// Minimum face detection confidence
        #[arg(long, env = "EMOFLIX_DETECTION_THRESHOLD", default_value_t = 0.7)]
        threshold: f32,
        /// Face detector file name inside the model directory
        #[arg(long, env = "EMOFLIX_DETECTOR_MODEL")]
        detector_model: Option<String>,
        /// Expression classifier file name inside the model directory
        #[arg(long, env = "EMOFLIX_CLASSIFIER_MODEL")]
        classifier_model: Option<String>,
        #[arg(long, env = "EMOFLIX_CLAHE_CLIP_LIMIT")]
        clahe_clip_limit: Option<f32>,
        /// CLAHE tiles per axis
        #[arg(long, env = "EMOFLIX_CLAHE_TILES")]
        clahe_tiles: Option<u32>,
        /// Single frame: a neutral top score below this may be overridden
        #[arg(long, env = "EMOFLIX_NEUTRAL_CEILING")]
        neutral_ceiling: Option<f32>,
        /// Single frame: the runner-up must score above this to replace neutral
        #[arg(long, env = "EMOFLIX_RUNNER_UP_FLOOR")]
        runner_up_floor: Option<f32>,
        /// Multi frame: the best average must exceed this to overturn a neutral majority
        #[arg(long, env = "EMOFLIX_AVERAGE_OVERRIDE_FLOOR")]
        average_override_floor: Option<f32>,
    },
    /// Send image files to a running emoflixd
    Detect {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Base URL of the daemon
        #[arg(long, env = "EMOFLIX_URL", default_value = DEFAULT_URL)]
        url: String,
    },
    /// Show daemon status
    Status {
        #[arg(long, env = "EMOFLIX_URL", default_value = DEFAULT_URL)]
        url: String,
    },
    /// Print the TMDB genre id recommended for an emotion
    Genre {
        emotion: Emotion,
        /// Overrides in the form label=id,label=id
        #[arg(long, env = "EMOFLIX_GENRE_MAP")]
        genre_map: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            files,
            model_dir,
            layout,
            threshold,
            detector_model,
            classifier_model,
            clahe_clip_limit,
            clahe_tiles,
            neutral_ceiling,
            runner_up_floor,
            average_override_floor,
        } => {
            let model_dir = model_dir.unwrap_or_else(emoflix_core::default_model_dir);
            let mut paths = ModelPaths {
                layout,
                detection_threshold: threshold,
                ..ModelPaths::in_dir(&model_dir)
            };
            if let Some(name) = detector_model {
                paths.detector = model_dir.join(name);
            }
            if let Some(name) = classifier_model {
                paths.classifier = model_dir.join(name);
            }

            let defaults = ClaheParams::default();
            let clahe = ClaheParams {
                clip_limit: clahe_clip_limit.unwrap_or(defaults.clip_limit),
                tiles: clahe_tiles.unwrap_or(defaults.tiles),
            };
            let defaults = FusionPolicy::default();
            let policy = FusionPolicy {
                neutral_ceiling: neutral_ceiling.unwrap_or(defaults.neutral_ceiling),
                runner_up_floor: runner_up_floor.unwrap_or(defaults.runner_up_floor),
                average_override_floor: average_override_floor.unwrap_or(defaults.average_override_floor),
            };
            tracing::debug!(?paths, ?clahe, ?policy, "local analysis settings");

            let payloads = files.iter().map(|f| encode_file(f)).collect::<Result<Vec<_>>>()?;
            let output =
                tokio::task::spawn_blocking(move || analyze_locally(&paths, clahe, policy, &payloads)).await??;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Detect { files, url } => {
            let payloads = files.iter().map(|f| encode_file(f)).collect::<Result<Vec<_>>>()?;
            let client = reqwest::Client::new();
            let request = if let [image] = payloads.as_slice() {
                client
                    .post(format!("{}/detect-emotion", url.trim_end_matches('/')))
                    .json(&json!({ "image": image }))
            } else {
                client
                    .post(format!("{}/detect-emotion-multi", url.trim_end_matches('/')))
                    .json(&json!({ "images": payloads }))
            };
            let body: Value = request
                .send()
                .await
                .with_context(|| format!("could not reach emoflixd at {url}"))?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            if let Some(error) = body.get("error").and_then(Value::as_str) {
                bail!("emoflixd: {error}");
            }
        }
        Commands::Status { url } => match reqwest::get(format!("{}/", url.trim_end_matches('/'))).await {
            Ok(response) => {
                let body: Value = response.json().await?;
                println!(
                    "{}: {} (version {})",
                    body["service"].as_str().unwrap_or("emoflixd"),
                    body["status"].as_str().unwrap_or("unknown"),
                    body["version"].as_str().unwrap_or("?"),
                );
            }
            Err(e) => {
                println!("emoflixd: not reachable at {url}");
                tracing::debug!(error = %e, "status request failed");
            }
        },
        Commands::Genre { emotion, genre_map } => {
            let map = match genre_map {
                Some(spec) => GenreMap::default().with_overrides(&spec)?,
                None => GenreMap::default(),
            };
            println!("{}", map.genre_for(emotion));
        }
    }

    Ok(())
}

/// Read an image file into a data URI, the same form the browser client sends.
fn encode_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mime = ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(decode::to_data_uri(mime, &bytes))
}

fn analyze_locally(
    paths: &ModelPaths,
    clahe: ClaheParams,
    policy: FusionPolicy,
    payloads: &[String],
) -> Result<Value> {
    if clahe.tiles == 0 || !(clahe.clip_limit > 0.0) {
        bail!("CLAHE needs a positive clip limit and at least one tile");
    }
    let model = OnnxEmotionModel::load(paths).context("failed to load models")?;
    let mut pipeline = Pipeline::new(model, clahe, policy);

    let output = if let [image] = payloads {
        serde_json::to_value(pipeline.detect_single(image)?)?
    } else {
        serde_json::to_value(pipeline.detect_batch(payloads)?)?
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_genre_command() {
        let cli = Cli::try_parse_from(["emoflix", "genre", "Surprise"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Genre {
                emotion: Emotion::Surprise,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_emotion() {
        assert!(Cli::try_parse_from(["emoflix", "genre", "bored"]).is_err());
    }

    #[test]
    fn test_parse_analyze_layout() {
        let cli = Cli::try_parse_from(["emoflix", "analyze", "--layout", "nhwc", "a.jpg", "b.jpg"]).unwrap();
        match cli.command {
            Commands::Analyze { files, layout, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(layout, TensorLayout::Nhwc);
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_parse_analyze_tuning_flags() {
        let cli = Cli::try_parse_from([
            "emoflix",
            "analyze",
            "--classifier-model",
            "fer-keras.onnx",
            "--clahe-tiles",
            "4",
            "--clahe-clip-limit",
            "3.5",
            "--neutral-ceiling",
            "60",
            "--average-override-floor",
            "25",
            "a.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze {
                detector_model,
                classifier_model,
                clahe_tiles,
                clahe_clip_limit,
                neutral_ceiling,
                runner_up_floor,
                average_override_floor,
                ..
            } => {
                assert_eq!(detector_model, None);
                assert_eq!(classifier_model.as_deref(), Some("fer-keras.onnx"));
                assert_eq!(clahe_tiles, Some(4));
                assert_eq!(clahe_clip_limit, Some(3.5));
                assert_eq!(neutral_ceiling, Some(60.0));
                assert_eq!(runner_up_floor, None);
                assert_eq!(average_override_floor, Some(25.0));
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_analyze_rejects_zero_tiles() {
        let clahe = ClaheParams {
            clip_limit: 2.0,
            tiles: 0,
        };
        let paths = ModelPaths::in_dir(Path::new("/nonexistent"));
        let err = analyze_locally(&paths, clahe, FusionPolicy::default(), &[]).unwrap_err();
        assert!(err.to_string().contains("CLAHE"));
    }

    #[test]
    fn test_encode_file_uses_extension_mime() {
        let path = std::env::temp_dir().join(format!("emoflix-cli-{}.png", std::process::id()));
        std::fs::write(&path, b"\x89PNG").unwrap();
        let uri = encode_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(uri, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_encode_file_missing() {
        assert!(encode_file(Path::new("/nonexistent/face.jpg")).is_err());
    }
}
