//! Request and response types of the demo HTTP API.
//!
//! These types are serialised as JSON by `demo-api` and by anything that
//! drives it (load scripts, tests).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

// ---------------------------------------------------------------------------
// Purchase endpoint
// ---------------------------------------------------------------------------

/// Request body for `POST /purchase`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseRequest {
    /// Product being bought.
    pub product: String,
    /// Unit price; must be finite and non-negative.
    pub price: f64,
    /// Identifier of the buying user.
    pub user: String,
}

impl PurchaseRequest {
    /// Check the request fields, returning a [`ServiceError::BadRequest`]
    /// describing the first problem found.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.product.trim().is_empty() {
            return Err(ServiceError::BadRequest("product must not be empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(ServiceError::BadRequest("user must not be empty".into()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ServiceError::BadRequest(
                "price must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

/// Successful response body for `POST /purchase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Identifier assigned to the order.
    pub order_id: Uuid,
    /// Whether the telemetry flush completed before the response was sent.
    pub telemetry_flushed: bool,
    /// Human hint pointing at the console dumps.
    pub hint: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for ErrorResponse {
    fn from(e: &ServiceError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// `service.name` reported in the telemetry resource.
    pub service: String,
    /// Number of exporters currently wrapped by the interceptor.
    pub intercepted_exporters: usize,
    /// Whether the collector channel is authenticated with TLS.
    pub tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn purchase(product: &str, price: f64, user: &str) -> PurchaseRequest {
        PurchaseRequest {
            product: product.into(),
            price,
            user: user.into(),
        }
    }

    #[test]
    fn purchase_request_parses_from_json() {
        let req: PurchaseRequest =
            serde_json::from_value(json!({"product": "laptop", "price": 999.5, "user": "ana"}))
                .unwrap();
        assert_eq!(req, purchase("laptop", 999.5, "ana"));
    }

    #[test]
    fn validate_accepts_valid_purchase() {
        assert!(purchase("laptop", 10.0, "ana").validate().is_ok());
        assert!(purchase("freebie", 0.0, "ana").validate().is_ok());
    }

    #[test]
    fn validate_rejects_negative_price() {
        let err = purchase("laptop", -1.0, "ana").validate().unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn validate_rejects_nan_price() {
        assert!(purchase("laptop", f64::NAN, "ana").validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_fields() {
        assert!(purchase("  ", 1.0, "ana").validate().is_err());
        assert!(purchase("laptop", 1.0, "").validate().is_err());
    }

    #[test]
    fn error_response_from_service_error() {
        let e = ErrorResponse::from(&ServiceError::BadRequest("missing user".into()));
        assert_eq!(e.code, "bad_request");
        assert!(e.message.contains("missing user"));
    }

    #[test]
    fn health_response_serde() {
        let h = HealthResponse {
            status: "ok".into(),
            service: "demo-api".into(),
            intercepted_exporters: 3,
            tls: false,
        };
        let json = serde_json::to_string(&h).unwrap();
        let decoded: HealthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.intercepted_exporters, 3);
    }
}
