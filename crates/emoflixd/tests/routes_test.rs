use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use emoflix_core::{
    AnalysisError, ClaheParams, EmotionModel, EmotionScores, FrameAnalysis, FusionPolicy, Pipeline,
};
use emoflixd::engine::spawn_engine;
use emoflixd::routes::{router, AppState};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Cursor;

/// Model that replays queued score vectors, one per analyzed frame.
struct ScriptedModel {
    script: VecDeque<[f32; 7]>,
}

impl ScriptedModel {
    fn new(script: &[[f32; 7]]) -> Self {
        Self {
            script: script.iter().copied().collect(),
        }
    }
}

impl EmotionModel for ScriptedModel {
    fn analyze(&mut self, _frame: &RgbImage) -> Result<FrameAnalysis, AnalysisError> {
        let values = self.script.pop_front().unwrap_or([0.0; 7]);
        Ok(FrameAnalysis::new(EmotionScores::new(values), None))
    }
}

fn server(script: &[[f32; 7]]) -> TestServer {
    server_with_limit(script, 32 * 1024 * 1024)
}

fn server_with_limit(script: &[[f32; 7]], max_body_bytes: usize) -> TestServer {
    let pipeline = Pipeline::new(
        ScriptedModel::new(script),
        ClaheParams::default(),
        FusionPolicy::default(),
    );
    let engine = spawn_engine(pipeline).unwrap();
    TestServer::new(router(AppState { engine }, max_body_bytes)).unwrap()
}

fn jpeg_data_uri() -> String {
    let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 90]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg).unwrap();
    format!("data:image/jpeg;base64,{}", STANDARD.encode(&buf))
}

fn png_base64() -> String {
    let img = RgbImage::from_pixel(24, 24, Rgb([120, 110, 100]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    STANDARD.encode(&buf)
}

//                                angry disgust fear happy sad surprise neutral
const HAPPY: [f32; 7] = [1.0, 0.0, 2.0, 82.0, 3.0, 2.0, 10.0];
const STRONG_NEUTRAL: [f32; 7] = [2.0, 0.0, 3.0, 30.0, 5.0, 0.0, 60.0];
const WEAK_NEUTRAL: [f32; 7] = [3.0, 0.0, 2.0, 10.0, 28.0, 12.0, 45.0];

#[tokio::test]
async fn test_health_endpoint() {
    let response = server(&[]).get("/").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "AI service is running");
    assert_eq!(body["service"], "emoflixd");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_detect_emotion_returns_scores() {
    let response = server(&[HAPPY])
        .post("/detect-emotion")
        .json(&json!({ "image": jpeg_data_uri() }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["emotion"], "happy");
    assert_eq!(body["scores"]["happy"], 82.0);

    let keys: Vec<&str> = body["scores"].as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 7);
    assert!(keys.contains(&"disgust"));
}

#[tokio::test]
async fn test_detect_emotion_accepts_raw_base64() {
    let response = server(&[STRONG_NEUTRAL])
        .post("/detect-emotion")
        .json(&json!({ "image": png_base64() }))
        .await;

    response.assert_status_ok();
    response.assert_json_contains(&json!({ "emotion": "neutral" }));
}

#[tokio::test]
async fn test_detect_emotion_weak_neutral_overridden() {
    let response = server(&[WEAK_NEUTRAL])
        .post("/detect-emotion")
        .json(&json!({ "image": jpeg_data_uri() }))
        .await;

    response.assert_json_contains(&json!({ "emotion": "sad" }));
}

#[tokio::test]
async fn test_detect_emotion_invalid_image_is_200_with_error() {
    let response = server(&[HAPPY])
        .post("/detect-emotion")
        .json(&json!({ "image": "data:image/jpeg;base64,bm90IGFuIGltYWdl" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body.get("emotion").is_none());
    assert!(body["error"].as_str().unwrap().contains("could not decode image"));
}

#[tokio::test]
async fn test_detect_emotion_malformed_json_is_200_with_error() {
    let response = server(&[HAPPY])
        .post("/detect-emotion")
        .text("{ not json")
        .content_type("application/json")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_detect_emotion_missing_field_is_200_with_error() {
    let response = server(&[HAPPY])
        .post("/detect-emotion")
        .json(&json!({ "picture": "x" }))
        .await;

    response.assert_status_ok();
    assert!(response.json::<Value>()["error"].is_string());
}

#[tokio::test]
async fn test_detect_multi_majority_with_override() {
    // neutral, neutral, happy: happy averages 35, neutral 25
    let leaning_neutral = [0.0, 0.0, 0.0, 30.0, 0.0, 0.0, 35.0];
    let happy = [0.0, 0.0, 0.0, 45.0, 0.0, 0.0, 5.0];
    let image = jpeg_data_uri();

    let response = server(&[leaning_neutral, leaning_neutral, happy])
        .post("/detect-emotion-multi")
        .json(&json!({ "images": [image, image, image] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["emotion"], "happy");
    assert_eq!(body["votes"], json!({ "neutral": 2, "happy": 1 }));
    assert_eq!(body["scores"]["happy"], 35.0);
    assert_eq!(body["scores"]["neutral"], 25.0);
}

#[tokio::test]
async fn test_detect_multi_skips_bad_frames() {
    let image = jpeg_data_uri();
    let response = server(&[HAPPY, HAPPY])
        .post("/detect-emotion-multi")
        .json(&json!({ "images": [image, "data:image/png;base64,!!", image] }))
        .await;

    let body: Value = response.json();
    assert_eq!(body["emotion"], "happy");
    assert_eq!(body["votes"], json!({ "happy": 2 }));
}

#[tokio::test]
async fn test_detect_multi_non_string_entries_fail_alone() {
    let image = jpeg_data_uri();
    let response = server(&[HAPPY, HAPPY])
        .post("/detect-emotion-multi")
        .json(&json!({ "images": [image, 42, null, { "src": "x" }, image] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["emotion"], "happy");
    assert_eq!(body["votes"], json!({ "happy": 2 }));
}

#[tokio::test]
async fn test_detect_multi_only_non_string_entries() {
    let response = server(&[HAPPY])
        .post("/detect-emotion-multi")
        .json(&json!({ "images": [1, true] }))
        .await;

    response.assert_json(&json!({ "error": "Could not analyze any frames" }));
}

#[tokio::test]
async fn test_detect_multi_null_images() {
    let response = server(&[])
        .post("/detect-emotion-multi")
        .json(&json!({ "images": null }))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({ "error": "No images provided" }));
}

#[tokio::test]
async fn test_detect_multi_empty_list() {
    let response = server(&[])
        .post("/detect-emotion-multi")
        .json(&json!({ "images": [] }))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({ "error": "No images provided" }));
}

#[tokio::test]
async fn test_detect_multi_missing_images_field() {
    let response = server(&[])
        .post("/detect-emotion-multi")
        .json(&json!({}))
        .await;

    response.assert_json(&json!({ "error": "No images provided" }));
}

#[tokio::test]
async fn test_detect_multi_all_frames_fail() {
    let response = server(&[HAPPY])
        .post("/detect-emotion-multi")
        .json(&json!({ "images": ["", "garbage"] }))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({ "error": "Could not analyze any frames" }));
}

#[tokio::test]
async fn test_body_limit_is_reported_as_error() {
    let response = server_with_limit(&[HAPPY], 1024)
        .post("/detect-emotion")
        .json(&json!({ "image": "A".repeat(4096) }))
        .await;

    response.assert_status_ok();
    assert!(response.json::<Value>()["error"].is_string());
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let response = server(&[])
        .get("/")
        .add_header(
            HeaderName::from_static("origin"),
            HeaderValue::from_static("http://localhost:3000"),
        )
        .await;

    response.assert_status_ok();
    assert_eq!(response.header(HeaderName::from_static("access-control-allow-origin")), "*");
}
