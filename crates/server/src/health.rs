//! Health endpoint, served on its own port so probes stay responsive while
//! the main listener is busy with PDF generation.
//!
//! The report is `ready` only when the billing database answers a probe
//! query; any database failure degrades the report and the HTTP status.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use facturo_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub database: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let (database, detail) =
        match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&state.db_pool).await {
            Ok(_) => (ComponentStatus::Ready, None),
            Err(error) => {
                (ComponentStatus::Degraded, Some(format!("database probe failed: {error}")))
            }
        };

    let report = HealthReport {
        status: database,
        database,
        detail,
        checked_at: Utc::now().to_rfc3339(),
    };

    let code = match report.status {
        ComponentStatus::Ready => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    (code, Json(report))
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use facturo_db::connect_with_settings;

    use super::{health, ComponentStatus, HealthState};

    #[tokio::test]
    async fn reports_ready_while_the_database_answers() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");

        let (code, Json(report)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(report.status, ComponentStatus::Ready);
        assert_eq!(report.database, ComponentStatus::Ready);
        assert_eq!(report.detail, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn degrades_once_the_database_is_gone() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        pool.close().await;

        let (code, Json(report)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, ComponentStatus::Degraded);
        assert!(report.detail.expect("detail").contains("database probe failed"));
    }
}
