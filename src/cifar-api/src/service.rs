use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use cifar_serve::{Classification, ImageClassifier};
use hyper::body::Bytes;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, CONTENT_TYPE, COOKIE, ORIGIN, VARY,
};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

const ALLOWED_METHODS: &str = "DELETE, GET, HEAD, OPTIONS, PATCH, POST, PUT";

/// Process-wide state handed to every request: the classifier, or nothing if
/// it failed to load at startup.
pub struct ServiceState {
    classifier: Option<ImageClassifier>,
}

impl ServiceState {
    pub fn new(classifier: Option<ImageClassifier>) -> Self {
        ServiceState { classifier }
    }

    /// Load the model once. A failure is logged and leaves the service
    /// running without a model.
    pub fn load(model_dir: &Path) -> Self {
        info!("Attempting to load model from {}...", model_dir.display());

        match ImageClassifier::load(model_dir) {
            Ok(classifier) => {
                info!("Model loaded successfully: {:?}", classifier.summary());
                Self::new(Some(classifier))
            }
            Err(err) => {
                error!("CRITICAL ERROR: Failed to load model: {}", err);
                Self::new(None)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    fn classify(&self, data: &[u8]) -> Result<Classification, PredictError> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or(PredictError::ModelNotLoaded)?;

        Ok(classifier.classify_from_raw(data)?)
    }
}

/// Why a prediction request produced no class.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Model is not loaded. Check server logs.")]
    ModelNotLoaded,

    #[error("Invalid upload: {0}")]
    BadUpload(String),

    #[error("Invalid image file: {0}")]
    InvalidImage(String),

    #[error("Prediction failed: {0}")]
    Failed(String),
}

impl From<cifar_serve::Error> for PredictError {
    fn from(err: cifar_serve::Error) -> Self {
        if err.is_invalid_image() {
            PredictError::InvalidImage(err.to_string())
        } else {
            PredictError::Failed(err.to_string())
        }
    }
}

#[derive(Serialize)]
struct Liveness {
    message: &'static str,
    model_status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Prediction {
    class: &'static str,
    confidence: f32,
}

impl From<Classification> for Prediction {
    fn from(c: Classification) -> Self {
        Prediction {
            class: c.label,
            confidence: c.confidence,
        }
    }
}

/// Body of every `/predict` answer.
#[derive(Serialize)]
#[serde(untagged)]
enum PredictBody {
    Success(Prediction),
    Failure { error: String },
}

impl From<Result<Prediction, PredictError>> for PredictBody {
    fn from(result: Result<Prediction, PredictError>) -> Self {
        match result {
            Ok(prediction) => PredictBody::Success(prediction),
            Err(err) => PredictBody::Failure {
                error: err.to_string(),
            },
        }
    }
}

pub async fn handle(
    req: Request<Body>,
    state: Arc<ServiceState>,
) -> Result<Response<Body>, Infallible> {
    let origin = req.headers().get(ORIGIN).cloned();
    let credentialed = *req.method() == Method::OPTIONS || req.headers().contains_key(COOKIE);

    let mut response = route(req, state).await;
    allow_origin(response.headers_mut(), origin.as_ref(), credentialed);

    Ok(response)
}

async fn route(req: Request<Body>, state: Arc<ServiceState>) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::OPTIONS, _) => preflight(req.headers()),
        (&Method::GET, "/") => to_json(StatusCode::OK, &liveness(&state)),
        (&Method::POST, "/predict") => {
            let result = predict(req, state).await;
            if let Err(err) = &result {
                warn!("{}", err);
            }
            to_json(StatusCode::OK, &PredictBody::from(result))
        }
        (&Method::GET, "/openapi.json") => to_json(StatusCode::OK, &openapi()),
        (_, "/") | (_, "/predict") | (_, "/openapi.json") => to_json(
            StatusCode::METHOD_NOT_ALLOWED,
            &json!({ "detail": "Method Not Allowed" }),
        ),
        _ => to_json(StatusCode::NOT_FOUND, &json!({ "detail": "Not Found" })),
    }
}

fn liveness(state: &ServiceState) -> Liveness {
    Liveness {
        message: "Image Classification API is running",
        model_status: if state.is_loaded() {
            "Model loaded"
        } else {
            "Model NOT loaded"
        },
    }
}

async fn predict(req: Request<Body>, state: Arc<ServiceState>) -> Result<Prediction, PredictError> {
    if !state.is_loaded() {
        return Err(PredictError::ModelNotLoaded);
    }

    let upload = read_upload(req).await?;

    let classification = tokio::task::spawn_blocking(move || state.classify(&upload))
        .await
        .map_err(|err| PredictError::Failed(err.to_string()))??;

    info!(
        "Predicted {} ({:.4})",
        classification.label, classification.confidence
    );

    Ok(classification.into())
}

async fn read_upload(req: Request<Body>) -> Result<Bytes, PredictError> {
    let boundary = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| PredictError::BadUpload("expected a multipart/form-data body".into()))?;

    let mut multipart = multer::Multipart::new(req.into_body(), boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| PredictError::BadUpload(err.to_string()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|err| PredictError::BadUpload(err.to_string()));
        }
    }

    Err(PredictError::BadUpload(format!(
        "no `{}` field in the form",
        UPLOAD_FIELD
    )))
}

fn to_json<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, payload) = match serde_json::to_vec(body) {
        Ok(payload) => (status, payload),
        Err(err) => {
            error!("Could not serialize response: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, b"{}".to_vec())
        }
    };

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    response
}

// Any origin is allowed and credentials are always permitted. A wildcard
// origin is not valid alongside credentials, so preflights and requests
// carrying cookies get their own origin echoed back.
fn allow_origin(headers: &mut HeaderMap, origin: Option<&HeaderValue>, credentialed: bool) {
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );

    match origin {
        Some(origin) if credentialed => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
        _ => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
    }
}

fn preflight(request: &HeaderMap) -> Response<Body> {
    let mut response = Response::new(Body::from("OK"));
    let headers = response.headers_mut();

    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        request
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));

    response
}

fn openapi() -> serde_json::Value {
    let error = json!({
        "type": "object",
        "properties": { "error": { "type": "string" } },
        "required": ["error"]
    });

    json!({
        "openapi": "3.0.2",
        "info": { "title": "Image Classification API", "version": env!("CARGO_PKG_VERSION") },
        "paths": {
            "/": {
                "get": {
                    "summary": "Liveness and model status",
                    "responses": {
                        "200": {
                            "description": "Service is up",
                            "content": { "application/json": { "schema": {
                                "type": "object",
                                "properties": {
                                    "message": { "type": "string" },
                                    "model_status": { "type": "string", "enum": ["Model loaded", "Model NOT loaded"] }
                                }
                            }}}
                        }
                    }
                }
            },
            "/predict": {
                "post": {
                    "summary": "Classify an uploaded image",
                    "requestBody": {
                        "required": true,
                        "content": { "multipart/form-data": { "schema": {
                            "type": "object",
                            "properties": { "file": { "type": "string", "format": "binary" } },
                            "required": ["file"]
                        }}}
                    },
                    "responses": {
                        "200": {
                            "description": "Prediction or error",
                            "content": { "application/json": { "schema": { "oneOf": [
                                {
                                    "type": "object",
                                    "properties": {
                                        "class": { "type": "string", "enum": cifar_serve::CLASS_NAMES },
                                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                                    },
                                    "required": ["class", "confidence"]
                                },
                                error
                            ]}}}
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cifar_serve::{InputBatch, Model, ModelSummary, CLASS_NAMES, NUM_CLASSES};
    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::Value;
    use std::io::Cursor;

    const BOUNDARY: &str = "X-CIFAR-BOUNDARY";

    /// Fixed distribution peaking on the last class.
    struct RampModel;

    impl Model for RampModel {
        fn predict(&self, batch: &InputBatch) -> cifar_serve::Result<Vec<Vec<f32>>> {
            let total = (NUM_CLASSES * (NUM_CLASSES + 1) / 2) as f32;
            let ramp: Vec<f32> = (1..=NUM_CLASSES).map(|k| k as f32 / total).collect();
            Ok(vec![ramp; batch.len()])
        }

        fn summary(&self) -> ModelSummary {
            ModelSummary::default()
        }
    }

    fn loaded() -> Arc<ServiceState> {
        let classifier = ImageClassifier::new(Box::new(RampModel)).unwrap();
        Arc::new(ServiceState::new(Some(classifier)))
    }

    fn unloaded() -> Arc<ServiceState> {
        Arc::new(ServiceState::new(None))
    }

    fn red_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([255, 0, 0])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn upload(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, field, filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::post("/predict")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn call(req: Request<Body>, state: Arc<ServiceState>) -> (StatusCode, HeaderMap, Value) {
        let response = handle(req, state).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn get(path: &str) -> Request<Body> {
        Request::get(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn liveness_reports_model_status() {
        let (status, _, body) = call(get("/"), loaded()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Image Classification API is running");
        assert_eq!(body["model_status"], "Model loaded");

        let (status, _, body) = call(get("/"), unloaded()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_status"], "Model NOT loaded");
    }

    #[tokio::test]
    async fn predicts_a_class_from_the_table() {
        let req = upload("file", "test.png", "image/png", &red_png());
        let (status, _, body) = call(req, loaded()).await;

        assert_eq!(status, StatusCode::OK);
        let class = body["class"].as_str().unwrap();
        assert!(CLASS_NAMES.contains(&class));
        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.1..=1.0).contains(&confidence));
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn same_bytes_same_answer() {
        let state = loaded();
        let png = red_png();

        let (_, _, first) = call(upload("file", "a.png", "image/png", &png), state.clone()).await;
        let (_, _, second) = call(upload("file", "a.png", "image/png", &png), state).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn text_upload_is_an_invalid_image() {
        let req = upload("file", "test.txt", "text/plain", b"not an image");
        let (status, _, body) = call(req, loaded()).await;

        assert_eq!(status, StatusCode::OK);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("Invalid image file"), "{}", error);
        assert!(body.get("class").is_none());
    }

    #[tokio::test]
    async fn unloaded_model_short_circuits() {
        let req = upload("file", "test.png", "image/png", &red_png());
        let (status, _, body) = call(req, unloaded()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "Model is not loaded. Check server logs.");
    }

    #[tokio::test]
    async fn missing_file_field_is_reported() {
        let req = upload("image", "test.png", "image/png", &red_png());
        let (status, _, body) = call(req, loaded()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().contains("`file`"));

        let req = Request::post("/predict")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(red_png()))
            .unwrap();
        let (status, _, body) = call(req, loaded()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid upload"));
    }

    #[tokio::test]
    async fn responses_allow_any_origin_with_credentials() {
        let (_, headers, _) = call(get("/"), loaded()).await;
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let req = Request::get("/")
            .header(ORIGIN, "http://dashboard.local")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = call(req, loaded()).await;
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(headers.get(VARY).is_none());
    }

    #[tokio::test]
    async fn cookie_requests_get_their_origin_echoed() {
        let req = Request::get("/")
            .header(ORIGIN, "http://dashboard.local")
            .header(COOKIE, "session=abc")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = call(req, loaded()).await;

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://dashboard.local");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[VARY], "Origin");
    }

    #[tokio::test]
    async fn answers_preflight() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/predict")
            .header(ORIGIN, "http://dashboard.local")
            .header(ACCESS_CONTROL_REQUEST_HEADERS, "x-custom")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(req, unloaded()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "x-custom");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://dashboard.local");
    }

    #[tokio::test]
    async fn failed_startup_load_keeps_serving_degraded() {
        let state = Arc::new(ServiceState::load(Path::new("/nonexistent/model")));
        assert!(!state.is_loaded());

        let (status, _, body) = call(get("/"), state.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_status"], "Model NOT loaded");

        let req = upload("file", "test.png", "image/png", &red_png());
        let (status, _, body) = call(req, state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "Model is not loaded. Check server logs.");
    }

    #[tokio::test]
    async fn unknown_routes_are_protocol_errors() {
        let (status, _, body) = call(get("/nope"), loaded()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Not Found");

        let (status, _, _) = call(get("/predict"), loaded()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn publishes_openapi_document() {
        let (status, _, body) = call(get("/openapi.json"), unloaded()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "Image Classification API");
        assert!(body["paths"]["/predict"]["post"].is_object());
    }
}
