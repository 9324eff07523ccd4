//! Axum request handlers for all service endpoints.

use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, HealthResponse, PurchaseRequest, PurchaseResponse};
use common::ServiceError;
use pipeline::{AttributeValue, KeyValue, LogEntry};
use tracing::{info, warn};
use uuid::Uuid;

use super::state::AppState;

/// Simulated work done for every purchase.
const PROCESSING_DELAY: Duration = Duration::from_millis(50);

const CONSOLE_HINT: &str = "See the OTLP request/response blocks in the service console";

/// `POST /purchase`: record a purchase inside a `purchase` span, then flush
/// logs and traces so the export dumps appear right away.
pub async fn purchase(
    State(state): State<AppState>,
    body: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return error_response(&ServiceError::BadRequest(rejection.body_text()));
        }
    };
    if let Err(e) = req.validate() {
        warn!(error = %e, "purchase rejected");
        return error_response(&e);
    }

    let logger = state.logger.clone();
    let transactions = state.transactions.clone();
    let outcome = state
        .tracer
        .in_span_async("purchase", move |ctx| async move {
            let order_id = Uuid::new_v4();
            let body = AttributeValue::map([
                ("msg", AttributeValue::from("Processing purchase")),
                ("user", AttributeValue::from(req.user)),
                ("amount", AttributeValue::from(req.price)),
            ]);
            logger.emit(
                LogEntry::builder(body)
                    .attribute("product", req.product)
                    .attribute("order.id", order_id.to_string())
                    .span_context(ctx)
                    .build(),
            );

            tokio::time::sleep(PROCESSING_DELAY).await;
            transactions.add(1, &[KeyValue::new("debug", "raw")]);
            Ok::<_, ServiceError>(order_id)
        })
        .await;

    let order_id = match outcome {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    info!(order_id = %order_id, "purchase completed; flushing telemetry");
    let logs = state
        .telemetry
        .logger_provider()
        .force_flush(state.flush_timeout)
        .await;
    let traces = state
        .telemetry
        .tracer_provider()
        .force_flush(state.flush_timeout)
        .await;

    let body = PurchaseResponse {
        status: "ok".into(),
        order_id,
        telemetry_flushed: logs && traces,
        hint: CONSOLE_HINT.into(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// `GET /health`: service identity and interception status.
pub async fn health(State(state): State<AppState>) -> Response {
    let telemetry = &state.telemetry;
    let body = HealthResponse {
        status: "ok".into(),
        service: telemetry
            .resource()
            .service_name()
            .unwrap_or_default()
            .to_owned(),
        intercepted_exporters: telemetry.intercepted_count(),
        tls: telemetry.security().is_tls(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

fn error_response(e: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(e))).into_response()
}
