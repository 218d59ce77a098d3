use gloo_net::http::Request;
use shared::{ErrorResponse, PredictRequest, PredictResponse};

const PREDICT_ENDPOINT: &str = "/api/predict";

/// Sends a data URL to the backend and returns the predicted disease.
///
/// Non-2xx responses carry an `{"error": ...}` body; its message is
/// surfaced as-is so the page shows the same text the server logged.
pub async fn predict(data_url: String) -> Result<PredictResponse, String> {
    let request = Request::post(PREDICT_ENDPOINT)
        .json(&PredictRequest { image: Some(data_url) })
        .map_err(|e| format!("Failed to encode request: {}", e))?;

    let response = request
        .send()
        .await
        .map_err(|e| format!("Network error: {}", e))?;

    if response.ok() {
        return response
            .json::<PredictResponse>()
            .await
            .map_err(|e| format!("Failed to parse prediction: {}", e));
    }

    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => Err(body.error),
        Err(_) => Err(format!("Server responded with status {}", status)),
    }
}
