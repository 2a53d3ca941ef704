use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Health check status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status_code, Json(self)).into_response()
    }
}

/// Liveness handler.
pub async fn liveness() -> HealthResponse {
    HealthResponse {
        status: HealthStatus::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness_reports_healthy() {
        let response = liveness().await;
        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(!response.version.is_empty());
    }

    #[tokio::test]
    async fn test_health_response_status_codes() {
        let healthy = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.0.0".to_string(),
        };
        assert_eq!(healthy.into_response().status(), StatusCode::OK);

        let unhealthy = HealthResponse {
            status: HealthStatus::Unhealthy,
            version: "0.0.0".to_string(),
        };
        assert_eq!(
            unhealthy.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
