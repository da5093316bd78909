use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use risk_core::{
    pipeline::AppCore,
    schema::{SchemaInfo, ScoreRequest, ScoreResponse, ScoreVectorRequest},
    FailureKind, RiskError,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<AppCore>,
    pub prom: PrometheusHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/score", post(score))
        .route("/score_vector", post(score_vector))
        .route("/schema", get(schema))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: FailureKind,
    message: String,
}

/// Failure on the wire: status from the failure kind, JSON body.
#[derive(Debug)]
pub struct ApiError {
    kind: FailureKind,
    message: String,
}

impl From<RiskError> for ApiError {
    fn from(e: RiskError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// A body that does not deserialize (wrong type for a code, missing
/// `selections`, bad JSON) is an incomplete form like any other.
impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        Self {
            kind: FailureKind::IncompleteForm,
            message: r.body_text(),
        }
    }
}

pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::IncompleteForm => StatusCode::UNPROCESSABLE_ENTITY,
        FailureKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::InternalInconsistency | FailureKind::InferenceFailed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            message: self.message,
        };
        (status_for(self.kind), Json(body)).into_response()
    }
}

async fn score(
    State(st): State<AppState>,
    payload: Result<Json<ScoreRequest>, JsonRejection>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(st.core.score_request(&req)?))
}

async fn score_vector(
    State(st): State<AppState>,
    payload: Result<Json<ScoreVectorRequest>, JsonRejection>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(st.core.score_vector(req.trace_id, &req.features)?))
}

async fn schema(State(st): State<AppState>) -> Json<SchemaInfo> {
    Json(st.core.schema_info())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(st): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, st.prom.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use risk_core::{MissingPolicy, RiskScorer};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn app(policy: MissingPolicy) -> Router {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../risk-core/tests/fixtures/bcsc_model");
        let scorer = Arc::new(RiskScorer::load_from_dir(&dir).unwrap());
        let core = AppCore::from_scorer(scorer, policy).unwrap();
        // a recorder that is never installed globally, so tests can run in parallel
        let prom = PrometheusBuilder::new().build_recorder().handle();
        router(AppState {
            core: Arc::new(core),
            prom,
        })
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let v = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, v)
    }

    fn selections() -> Value {
        json!({
            "age_group": 6,
            "race_eth": 1,
            "age_menarche": 1,
            "age_first_birth": 2,
            "family_history": 0,
            "personal_biopsy": 0,
            "density": 2,
            "hormone_use": 0,
            "menopausal_status": 2,
            "bmi_group": 2
        })
    }

    #[tokio::test]
    async fn score_returns_probability_and_decision() {
        let trace_id = uuid::Uuid::new_v4();
        let (status, body) = call(
            app(MissingPolicy::Reject),
            post_json(
                "/score",
                json!({"trace_id": trace_id, "selections": selections()}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let p = body["probability"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert_eq!(body["is_high_risk"], json!(p >= 0.48));
        assert_eq!(body["threshold"], json!(0.48));
        assert_eq!(body["trace_id"], json!(trace_id));
    }

    #[tokio::test]
    async fn incomplete_form_is_422() {
        let mut sel = selections();
        sel.as_object_mut().unwrap().remove("density");
        let (status, body) = call(
            app(MissingPolicy::Reject),
            post_json("/score", json!({ "selections": sel })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "incomplete_form");
        assert!(body["message"].as_str().unwrap().contains("density"));
    }

    #[tokio::test]
    async fn fill_default_scores_incomplete_form() {
        let mut sel = selections();
        sel.as_object_mut().unwrap().remove("density");
        let (status, _) = call(
            app(MissingPolicy::FillDefault),
            post_json("/score", json!({ "selections": sel })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_code_is_422() {
        let mut sel = selections();
        sel["density"] = json!(7);
        let (status, body) = call(
            app(MissingPolicy::Reject),
            post_json("/score", json!({ "selections": sel })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "incomplete_form");
    }

    #[tokio::test]
    async fn undecodable_bodies_keep_the_error_shape() {
        let mut fractional = selections();
        fractional["density"] = json!(2.5);
        let mut quoted = selections();
        quoted["density"] = json!("2");
        let bodies = [
            ("/score", json!({ "selections": fractional })),
            ("/score", json!({ "selections": quoted })),
            ("/score", json!({ "trace_id": null })),
            ("/score_vector", json!({ "features": "6,1,0" })),
        ];
        for (uri, body) in bodies {
            let resp = app(MissingPolicy::Reject)
                .oneshot(post_json(uri, body.clone()))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "{body}");
            let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
            assert!(content_type.starts_with("application/json"), "{content_type}");
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            let v: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(v["error"], "incomplete_form", "{body}");
            assert!(!v["message"].as_str().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn non_json_content_type_keeps_the_error_shape() {
        let req = Request::builder()
            .method("POST")
            .uri("/score")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(selections().to_string()))
            .unwrap();
        let (status, body) = call(app(MissingPolicy::Reject), req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "incomplete_form");
    }

    #[tokio::test]
    async fn short_vector_is_internal_inconsistency() {
        let (status, body) = call(
            app(MissingPolicy::Reject),
            post_json("/score_vector", json!({"features": [6, 1, 0, 1, 2, 2, 0, 2, 2]})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal_inconsistency");
    }

    #[tokio::test]
    async fn full_vector_scores() {
        let (status, body) = call(
            app(MissingPolicy::Reject),
            post_json(
                "/score_vector",
                json!({"features": [10, 1, 1, 1, 2, 2, 1, 2, 2, 1]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_high_risk"], json!(true));
    }

    #[tokio::test]
    async fn schema_lists_model_order_and_codebook() {
        let req = Request::get("/schema").body(Body::empty()).unwrap();
        let (status, body) = call(app(MissingPolicy::Reject), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["feature_names"][0], "age_group_5_years");
        assert_eq!(body["missing_policy"], "reject");
        assert_eq!(body["covariates"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let req = Request::get("/healthz").body(Body::empty()).unwrap();
        let resp = app(MissingPolicy::Reject).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    #[test]
    fn every_failure_kind_has_a_status() {
        assert_eq!(status_for(FailureKind::IncompleteForm), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(FailureKind::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(FailureKind::InternalInconsistency),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(FailureKind::InferenceFailed), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
