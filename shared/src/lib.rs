use serde::{Deserialize, Serialize};

/// Body of a successful `POST /predict-word` response.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub prediction: String,
}

/// Body of a `GET /health` response.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub ok: bool,
}
