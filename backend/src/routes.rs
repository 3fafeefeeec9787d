use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::{Deserialize, Serialize};
use shared::{HealthResponse, PredictionResponse};

use crate::pymodel::{DEFAULT_ORIENTATION, WordPredictor};
use crate::storage::UploadStager;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct PredictParams {
    infer_orientation: Option<String>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict-word").route(web::post().to(predict_word)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { ok: true })
}

fn error_body(message: &str) -> ErrorResponse {
    ErrorResponse {
        error: message.to_string(),
    }
}

async fn read_field(field: &mut Field) -> Result<Vec<u8>, MultipartError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

async fn predict_word(
    stager: web::Data<UploadStager>,
    predictor: web::Data<WordPredictor>,
    params: web::Query<PredictParams>,
    mut payload: Multipart,
) -> HttpResponse {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut orientation_field: Option<String> = None;

    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read multipart payload: {e}");
                return HttpResponse::BadRequest().json(error_body("failed to read upload"));
            }
        };

        let (name, filename) = match field.content_disposition() {
            Some(disposition) => (
                disposition.get_name().unwrap_or("").to_string(),
                disposition.get_filename().map(str::to_string),
            ),
            None => (String::new(), None),
        };

        let data = match read_field(&mut field).await {
            Ok(data) => data,
            Err(e) => {
                error!("Upload stream aborted while reading field {name:?}: {e}");
                return HttpResponse::BadRequest().json(error_body("failed to read upload"));
            }
        };

        match name.as_str() {
            "image" => upload = Some((filename.unwrap_or_default(), data)),
            "infer_orientation" => {
                orientation_field = Some(String::from_utf8_lossy(&data).trim().to_string());
            }
            _ => {}
        }
    }

    let Some((original_filename, bytes)) = upload else {
        return HttpResponse::BadRequest().json(error_body("missing multipart field \"image\""));
    };

    let infer_orientation = orientation_field
        .filter(|mode| !mode.is_empty())
        .or_else(|| params.infer_orientation.clone())
        .unwrap_or_else(|| DEFAULT_ORIENTATION.to_string());

    let staged = {
        let stager = stager.get_ref().clone();
        match web::block(move || stager.stage(&original_filename, &bytes)).await {
            Ok(Ok(staged)) => staged,
            Ok(Err(e)) => {
                error!("Failed to stage upload: {e}");
                return HttpResponse::InternalServerError()
                    .json(error_body("failed to store upload"));
            }
            Err(e) => {
                error!("Staging task failed: {e}");
                return HttpResponse::InternalServerError()
                    .json(error_body("failed to store upload"));
            }
        }
    };
    info!(
        "Staged upload {} under {}",
        staged.file_name,
        stager.root().display()
    );

    let wait_bound = predictor.timeout();
    let task = {
        let predictor = predictor.get_ref().clone();
        let image_path = staged.path.clone();
        let infer_orientation = infer_orientation.clone();
        web::block(move || predictor.predict(&image_path, &infer_orientation))
    };

    let joined = match wait_bound {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                // The collaborator call keeps running; only this request is
                // released.
                error!(
                    "Prediction for {} still running after {limit:?}",
                    staged.path.display()
                );
                return HttpResponse::GatewayTimeout().json(error_body("prediction timed out"));
            }
        },
        None => task.await,
    };

    let prediction = match joined {
        Ok(Ok(prediction)) => prediction,
        Ok(Err(e)) => {
            error!("Inference failed for {}: {e}", staged.path.display());
            return HttpResponse::InternalServerError().json(error_body("inference failed"));
        }
        Err(e) => {
            error!("Prediction task failed: {e}");
            return HttpResponse::InternalServerError().json(error_body("inference failed"));
        }
    };

    info!(
        "Prediction completed for {} (orientation: {infer_orientation})",
        staged.path.display()
    );
    HttpResponse::Ok().json(PredictionResponse { prediction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pymodel::testing::StubModel;
    use actix_web::http::{StatusCode, header};
    use actix_web::{App, test};
    use std::path::Path;
    use std::sync::Arc;

    const BOUNDARY: &str = "predict-word-test-boundary";

    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart_body(parts))
    }

    fn app_state(stub: Arc<StubModel>, root: &Path) -> (web::Data<UploadStager>, web::Data<WordPredictor>) {
        (
            web::Data::new(UploadStager::new(root)),
            web::Data::new(WordPredictor::new(
                stub,
                "model.pt".to_string(),
                "labels.txt".to_string(),
            )),
        )
    }

    #[actix_web::test]
    async fn health_reports_ok() {
        let app = test::init_service(App::new().configure(configure_routes)).await;

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({"ok": true}));
    }

    #[actix_web::test]
    async fn predict_word_returns_trimmed_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubModel::new("  bonjour  ");
        let (stager, predictor) = app_state(stub.clone(), dir.path());
        let app = test::init_service(
            App::new()
                .app_data(stager)
                .app_data(predictor)
                .configure(configure_routes),
        )
        .await;

        let req = multipart_request(
            "/predict-word",
            &[("image", Some("word.png"), b"0123456789".as_slice())],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: PredictionResponse = test::read_body_json(resp).await;
        assert_eq!(body.prediction, "bonjour");

        let calls = stub.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].infer_orientation, "none");
        assert_eq!(calls[0].image_path.extension().unwrap(), "png");
        assert!(calls[0].image_path.starts_with(dir.path()));
        assert_eq!(
            &std::fs::read(&calls[0].image_path).unwrap()[..],
            b"0123456789"
        );
    }

    #[actix_web::test]
    async fn orientation_form_field_reaches_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubModel::new("ok");
        let (stager, predictor) = app_state(stub.clone(), dir.path());
        let app = test::init_service(
            App::new()
                .app_data(stager)
                .app_data(predictor)
                .configure(configure_routes),
        )
        .await;

        let req = multipart_request(
            "/predict-word",
            &[
                ("image", Some("word.png"), b"payload".as_slice()),
                ("infer_orientation", None, b"auto".as_slice()),
            ],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stub.calls()[0].infer_orientation, "auto");
    }

    #[actix_web::test]
    async fn orientation_query_parameter_reaches_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubModel::new("ok");
        let (stager, predictor) = app_state(stub.clone(), dir.path());
        let app = test::init_service(
            App::new()
                .app_data(stager)
                .app_data(predictor)
                .configure(configure_routes),
        )
        .await;

        let req = multipart_request(
            "/predict-word?infer_orientation=flip",
            &[("image", Some("word.png"), b"payload".as_slice())],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stub.calls()[0].infer_orientation, "flip");
    }

    #[actix_web::test]
    async fn extensionless_upload_is_staged_as_jpg() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubModel::new("ok");
        let (stager, predictor) = app_state(stub.clone(), dir.path());
        let app = test::init_service(
            App::new()
                .app_data(stager)
                .app_data(predictor)
                .configure(configure_routes),
        )
        .await;

        let req = multipart_request(
            "/predict-word",
            &[("image", Some("scan"), b"payload".as_slice())],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stub.calls()[0].image_path.extension().unwrap(), "jpg");
    }

    #[actix_web::test]
    async fn missing_image_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubModel::new("never called");
        let (stager, predictor) = app_state(stub.clone(), dir.path());
        let app = test::init_service(
            App::new()
                .app_data(stager)
                .app_data(predictor)
                .configure(configure_routes),
        )
        .await;

        let req = multipart_request(
            "/predict-word",
            &[("infer_orientation", None, b"none".as_slice())],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body.get("error").is_some());
        assert!(stub.calls().is_empty());
    }

    #[actix_web::test]
    async fn inference_failure_maps_to_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubModel::failing("partial", "model exploded");
        let (stager, predictor) = app_state(stub, dir.path());
        let app = test::init_service(
            App::new()
                .app_data(stager)
                .app_data(predictor)
                .configure(configure_routes),
        )
        .await;

        let req = multipart_request(
            "/predict-word",
            &[("image", Some("word.png"), b"payload".as_slice())],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({"error": "inference failed"}));
    }
}
