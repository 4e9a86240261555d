use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use voxstay_core::SessionStore;
use voxstay_db::{ping, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    store: Arc<SessionStore>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, store: Arc<SessionStore>) -> Self {
        Self { db_pool, store }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let store_open = !state.store.is_closed();
    let ready = database.status == "ready" && store_open;

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: if store_open {
            HealthCheck { status: "ready", detail: "session store accepting calls".to_string() }
        } else {
            HealthCheck { status: "degraded", detail: "session store is shut down".to_string() }
        },
        database,
        active_sessions: state.store.len().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use voxstay_core::SessionStore;
    use voxstay_db::{connect_with_settings, DbPool};

    use crate::health::{health, HealthState};

    async fn pool() -> DbPool {
        connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect")
    }

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(chrono::Duration::minutes(30)))
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = pool().await;

        let (status, Json(payload)) = health(State(HealthState::new(pool.clone(), store()))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");
        assert_eq!(payload.active_sessions, 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = pool().await;
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState::new(pool, store()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn closed_session_store_degrades_the_service_check() {
        let pool = pool().await;
        let store = store();
        store.close();

        let (status, Json(payload)) = health(State(HealthState::new(pool.clone(), store))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.service.status, "degraded");
        assert_eq!(payload.database.status, "ready");

        pool.close().await;
    }
}
