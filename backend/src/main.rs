mod pymodel;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use pyo3::prelude::*;
use std::env;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use pymodel::{ScriptModel, WordPredictor, prepend_sys_path};
use routes::configure_routes;
use storage::UploadStager;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());
    let module_name = env::var("MODEL_MODULE").unwrap_or_else(|_| "model".to_string());
    let module_dir = env::var("MODEL_MODULE_DIR").unwrap_or_else(|_| ".".to_string());

    let model = ScriptModel::new(module_name);

    // Artifact paths are process-wide configuration: env overrides win,
    // anything missing comes from the collaborator module's own defaults.
    let artifacts = Python::with_gil(|py| -> PyResult<(String, String)> {
        prepend_sys_path(py, &module_dir)?;
        let model_path = env::var("MODEL_PATH").ok();
        let labels_path = env::var("LABELS_PATH").ok();
        if let (Some(model_path), Some(labels_path)) = (model_path.clone(), labels_path.clone()) {
            return Ok((model_path, labels_path));
        }
        let (default_model, default_labels) = model.default_artifacts(py)?;
        Ok((
            model_path.unwrap_or(default_model),
            labels_path.unwrap_or(default_labels),
        ))
    });
    let (model_path, labels_path) = match artifacts {
        Ok(paths) => paths,
        Err(e) => {
            log::error!("Failed to resolve model artifacts: {e}");
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("Model artifact resolution failed: {e}"),
            ));
        }
    };
    log::info!("Model artifact: {model_path}");
    log::info!("Labels artifact: {labels_path}");

    let prediction_timeout = env::var("PREDICTION_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let stager = UploadStager::new(upload_dir);
    let predictor = WordPredictor::new(Arc::new(model), model_path, labels_path)
        .with_timeout(prediction_timeout);

    let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
    let bind_address = format!("0.0.0.0:{}", port);

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(web::Data::new(stager.clone()))
            .app_data(web::Data::new(predictor.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
