use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbImage;
use report::MriReport;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Cursor;
use tower_http::cors::CorsLayer;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/gradcam", post(gradcam))
        .route("/predict_full", post(predict_full))
        .route("/predict-lungs", post(predict_lungs))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Pull the named file field out of a multipart upload.
async fn read_upload(
    mut multipart: Multipart,
    field: &str,
    missing_message: &str,
    reject_empty_filename: bool,
) -> Result<Vec<u8>, ApiError> {
    while let Some(part) = multipart.next_field().await? {
        if part.name() == Some(field) {
            if reject_empty_filename && part.file_name().is_none_or(|n| n.is_empty()) {
                return Err(ApiError::BadRequest("File name is empty".into()));
            }
            return Ok(part.bytes().await?.to_vec());
        }
    }
    Err(ApiError::BadRequest(missing_message.into()))
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>, ApiError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(buf.into_inner())
}

#[derive(Serialize)]
struct MriPrediction {
    prediction: String,
    confidence: f32,
    report: MriReport,
}

fn run_predict_mri(state: &AppState, bytes: &[u8]) -> Result<MriPrediction, ApiError> {
    let model = state.0.mri.model();
    let (tensor, _resized) = model.prepare_image(bytes)?;
    let probs = model.classify(&tensor)?;
    let (idx, p) = model::argmax(&probs)
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("empty probability vector")))?;
    let prediction = model.labels()[idx].clone();
    let confidence = p * 100.0;
    let report = state.0.mri_guide.generate(&prediction, confidence)?;
    Ok(MriPrediction {
        prediction,
        confidence,
        report,
    })
}

/// Original scan, rendered heatmap and the blended overlay side by side.
fn run_gradcam_mri(state: &AppState, bytes: &[u8]) -> Result<Vec<u8>, ApiError> {
    let inner = &state.0;
    let model = inner.mri.model();
    let (tensor, resized) = model.prepare_image(bytes)?;
    let probs = model.classify(&tensor)?;
    let (idx, _) = model::argmax(&probs)
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("empty probability vector")))?;

    let heatmap = inner.mri.engine().heatmap_tta(&tensor, idx)?;
    let heat_img = overlay::colorize(&heatmap);
    let blended = overlay::blend(&resized, &heat_img, inner.mri_overlay_alpha)?;
    let combined = overlay::hstack(&[resized, heat_img, blended])?;
    encode_png(&combined)
}

#[derive(Serialize)]
struct LungsResponse {
    labels: Vec<String>,
    report: String,
    gradcam_images: BTreeMap<String, String>,
}

fn run_predict_lungs(state: &AppState, bytes: &[u8]) -> Result<LungsResponse, ApiError> {
    let inner = &state.0;
    let model = inner.chest.model();
    let (tensor, resized) = model.prepare_image(bytes)?;
    let probs = model.classify(&tensor)?;

    let detected = model::detect_labels(&probs, model.labels(), inner.chest_threshold);
    let report = inner.chest_guide.render_report(&detected);

    let mut gradcam_images = BTreeMap::new();
    for label in &detected {
        let idx = model
            .labels()
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("label disappeared: {label}")))?;
        let map = inner.chest.engine().heatmap_label(&tensor, idx)?;
        let blended = overlay::overlay(&resized, &map, inner.chest_overlay_alpha)?;
        gradcam_images.insert(label.to_string(), BASE64.encode(encode_png(&blended)?));
    }

    Ok(LungsResponse {
        labels: detected.iter().map(|s| s.to_string()).collect(),
        report,
        gradcam_images,
    })
}

async fn predict(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_upload(multipart, "file", "No image file provided", true).await?;
    let result = tokio::task::spawn_blocking(move || run_predict_mri(&state, &bytes)).await??;
    Ok(Json(result))
}

async fn gradcam(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_upload(multipart, "image", "No image uploaded", false).await?;
    let png = tokio::task::spawn_blocking(move || run_gradcam_mri(&state, &bytes)).await??;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

async fn predict_full(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_upload(multipart, "image", "No image uploaded", true).await?;
    let (report, png) = tokio::task::spawn_blocking(move || {
        let report = run_predict_mri(&state, &bytes)?;
        let png = run_gradcam_mri(&state, &bytes)?;
        Ok::<_, ApiError>((report, png))
    })
    .await??;
    Ok(Json(json!({
        "report": report,
        "gradcam_image": BASE64.encode(png),
    })))
}

async fn predict_lungs(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_upload(multipart, "image", "Image file missing", false).await?;
    let result = tokio::task::spawn_blocking(move || run_predict_lungs(&state, &bytes)).await??;
    Ok(Json(result))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "models": [
            state.0.mri.model().name(),
            state.0.chest.model().name(),
        ],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::state::ModelService;
    use attribution::AttributionEngine;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use model::{
        Backbone, ClassifierModel, Head, HeadLayerSpec, HeadOp, ModelError, ModelSpec,
        Preprocessing, TaskKind,
    };
    use ndarray::{Array1, Array2, ArrayD};
    use report::{DiseaseGuide, TumorGuide};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct PoolBackbone {
        channels: usize,
    }

    impl Backbone for PoolBackbone {
        fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
            let shape = input.shape();
            let (c_in, h, w) = (shape[1], shape[2], shape[3]);
            let (bh, bw) = (h / 4, w / 4);
            let mut out = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, self.channels, 4, 4]));
            for c in 0..self.channels {
                for gy in 0..4 {
                    for gx in 0..4 {
                        let mut sum = 0.0f32;
                        for y in gy * bh..(gy + 1) * bh {
                            for x in gx * bw..(gx + 1) * bw {
                                sum += input[[0, c % c_in, y, x]];
                            }
                        }
                        out[[0, c, gy, gx]] = sum / (bh * bw) as f32 + c as f32 * 0.1;
                    }
                }
            }
            Ok(out)
        }
    }

    fn build_model(
        name: &str,
        task: TaskKind,
        preprocessing: Preprocessing,
        labels: Vec<String>,
    ) -> Arc<ClassifierModel> {
        let count = labels.len();
        let tail_spec = match task {
            TaskKind::SingleLabel => HeadLayerSpec::Softmax,
            TaskKind::MultiLabel => HeadLayerSpec::Sigmoid,
        };
        let spec = ModelSpec {
            name: name.into(),
            task,
            input_width: 16,
            input_height: 16,
            preprocessing,
            backbone: "unused.onnx".into(),
            activation_layer: "top_conv".into(),
            head: vec![tail_spec],
            labels,
            threshold: 0.5,
        };
        let w = Array2::from_shape_fn((count, 3), |(o, i)| {
            ((o * 7 + i * 3) % 5) as f32 * 0.1 - 0.2
        });
        let tail = match task {
            TaskKind::SingleLabel => HeadOp::Softmax,
            TaskKind::MultiLabel => HeadOp::Sigmoid,
        };
        let head = Head::new(vec![
            HeadOp::Relu,
            HeadOp::GlobalAvgPool,
            HeadOp::Dense {
                weights: Arc::new(w),
                bias: Array1::zeros(count),
            },
            tail,
        ]);
        Arc::new(
            ClassifierModel::from_parts(spec, head, Box::new(PoolBackbone { channels: 3 }))
                .unwrap(),
        )
    }

    fn test_state() -> AppState {
        let mri_labels = vec![
            "glioma".to_string(),
            "meningioma".to_string(),
            "notumor".to_string(),
            "pituitary".to_string(),
        ];
        let chest_labels: Vec<String> = [
            "Cardiomegaly",
            "Emphysema",
            "Effusion",
            "Hernia",
            "Infiltration",
            "Mass",
            "Nodule",
            "Atelectasis",
            "Pneumothorax",
            "Pleural_Thickening",
            "Pneumonia",
            "Fibrosis",
            "Edema",
            "Consolidation",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mri_model = build_model(
            "brain-mri",
            TaskKind::SingleLabel,
            Preprocessing::Rescale,
            mri_labels,
        );
        let chest_model = build_model(
            "chest-xray",
            TaskKind::MultiLabel,
            Preprocessing::Standardize,
            chest_labels,
        );

        let config = GatewayConfig::test_default();
        AppState::from_parts(
            ModelService::new(AttributionEngine::with_options(mri_model, false).unwrap()),
            ModelService::new(AttributionEngine::with_options(chest_model, false).unwrap()),
            TumorGuide::builtin().unwrap(),
            DiseaseGuide::builtin().unwrap(),
            &config,
        )
    }

    fn png_upload() -> Vec<u8> {
        let img = RgbImage::from_fn(24, 24, |x, y| {
            image::Rgb([(x * 10) as u8, (y * 10) as u8, ((x + y) * 5) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

    fn multipart_request(uri: &str, field: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
                 filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_models() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["models"][0], "brain-mri");
    }

    #[tokio::test]
    async fn test_predict_returns_prediction_and_report() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request("/predict", "file", "scan.png", &png_upload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let prediction = json["prediction"].as_str().unwrap();
        assert!(["glioma", "meningioma", "notumor", "pituitary"].contains(&prediction));
        assert!(json["confidence"].as_f64().unwrap() > 0.0);
        assert!(json["report"]["stage"].is_string());
        assert!(json["report"]["treatments"].is_array());
    }

    #[tokio::test]
    async fn test_predict_without_file_field_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request("/predict", "image", "scan.png", &png_upload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "No image file provided");
    }

    #[tokio::test]
    async fn test_predict_with_empty_filename_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request("/predict", "file", "", &png_upload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "File name is empty");
    }

    #[tokio::test]
    async fn test_predict_with_garbage_payload_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request("/predict", "file", "scan.png", b"not an image"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_gradcam_returns_png_strip() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request("/gradcam", "image", "scan.png", &png_upload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let img = image::load_from_memory(&bytes).unwrap().to_rgb8();
        // Three panels side by side at the model's input resolution.
        assert_eq!(img.dimensions(), (48, 16));
    }

    #[tokio::test]
    async fn test_predict_full_bundles_report_and_image() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request(
                "/predict_full",
                "image",
                "scan.png",
                &png_upload(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["report"]["prediction"].is_string());
        let b64 = json["gradcam_image"].as_str().unwrap();
        let png = BASE64.decode(b64).unwrap();
        assert!(image::load_from_memory(&png).is_ok());
    }

    #[tokio::test]
    async fn test_predict_lungs_reports_findings_with_heatmaps() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request(
                "/predict-lungs",
                "image",
                "xray.png",
                &png_upload(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let labels = json["labels"].as_array().unwrap();
        // The 0.001 threshold on sigmoid outputs flags essentially everything.
        assert!(!labels.is_empty());
        assert!(
            json["report"]
                .as_str()
                .unwrap()
                .starts_with("===== LUNG XRAY ANALYSIS REPORT =====")
        );
        let first = labels[0].as_str().unwrap();
        let b64 = json["gradcam_images"][first].as_str().unwrap();
        assert!(image::load_from_memory(&BASE64.decode(b64).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_predict_lungs_missing_field_message() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request(
                "/predict-lungs",
                "file",
                "xray.png",
                &png_upload(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Image file missing");
    }
}
