//! HTTP read API
//!
//! Config sets, collections and active topology over JSON

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::auth::{authorized, Action, Scope};
use crate::error::CloudError;
use crate::reporter::{self, TopologyEntry};
use crate::CloudControl;

/// HTTP API service
pub struct HttpApi {
    ctl: Arc<CloudControl>,
}

impl HttpApi {
    pub fn new(ctl: Arc<CloudControl>) -> Self {
        Self { ctl }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/configs", get(list_configs))
            .route("/api/v1/collections", get(list_collections))
            .route("/api/v1/collections/:name", get(get_collection))
            .route("/api/v1/collections/:name/topology", get(get_topology))
            .route("/api/v1/live_nodes", get(list_live_nodes))
            .with_state(self.ctl)
    }
}

// ==================== Response types ====================

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Reply<T> {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
    }

    fn err(e: CloudError) -> Reply<T> {
        let status = match &e {
            CloudError::Forbidden { .. } => StatusCode::FORBIDDEN,
            CloudError::UnknownCollection(_)
            | CloudError::UnknownConfigSet(_)
            | CloudError::Store(coord::StoreError::NoSuchPath(_)) => StatusCode::NOT_FOUND,
            CloudError::InvalidArguments(_) => StatusCode::BAD_REQUEST,
            CloudError::Store(coord::StoreError::NotConnected)
            | CloudError::Store(coord::StoreError::Timeout { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("HTTP request failed: {}", e);
        }
        (
            status,
            Json(Self {
                success: false,
                data: None,
                error: Some(e.to_string()),
            }),
        )
    }

    fn from_result(result: crate::Result<T>) -> Reply<T> {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct CollectionSummary {
    name: String,
    config_name: Option<String>,
    shards: Vec<String>,
    replicas: usize,
    active_replicas: usize,
}

#[derive(Deserialize, Default)]
struct TopologyQuery {
    host: Option<String>,
}

// ==================== Handlers ====================

async fn list_configs(State(ctl): State<Arc<CloudControl>>) -> Reply<Vec<String>> {
    let result = authorized(
        ctl.authorizer().as_ref(),
        Action::Read,
        Scope::Cluster,
        ctl.registry().list(),
    )
    .await;
    ApiResponse::from_result(result)
}

async fn list_collections(
    State(ctl): State<Arc<CloudControl>>,
) -> Reply<Vec<CollectionSummary>> {
    let result = authorized(ctl.authorizer().as_ref(), Action::Read, Scope::Cluster, async {
        let state = ctl.reader().refresh().await?;
        let mut summaries = Vec::new();
        for coll in state.collections.values() {
            summaries.push(CollectionSummary {
                name: coll.name.clone(),
                config_name: coll.config_name.clone(),
                shards: coll.slices.keys().cloned().collect(),
                replicas: coll.replica_count(),
                active_replicas: state.active_replicas(&coll.name, None)?.len(),
            });
        }
        Ok(summaries)
    })
    .await;
    ApiResponse::from_result(result)
}

async fn get_collection(
    State(ctl): State<Arc<CloudControl>>,
    Path(name): Path<String>,
) -> Reply<crate::cluster::DocCollection> {
    let scope = Scope::Collection(name.clone());
    let result = authorized(ctl.authorizer().as_ref(), Action::Read, scope, async {
        let state = ctl.reader().refresh().await?;
        state
            .collection(&name)
            .cloned()
            .ok_or_else(|| CloudError::UnknownCollection(name.clone()))
    })
    .await;
    ApiResponse::from_result(result)
}

async fn get_topology(
    State(ctl): State<Arc<CloudControl>>,
    Path(name): Path<String>,
    Query(query): Query<TopologyQuery>,
) -> Reply<Vec<TopologyEntry>> {
    let scope = Scope::Collection(name.clone());
    let result = authorized(ctl.authorizer().as_ref(), Action::Read, scope, async {
        let state = ctl.reader().refresh().await?;
        reporter::collection_topology(&state, &name, query.host.as_deref())
    })
    .await;
    ApiResponse::from_result(result)
}

async fn list_live_nodes(State(ctl): State<Arc<CloudControl>>) -> Reply<Vec<String>> {
    let result = authorized(ctl.authorizer().as_ref(), Action::Read, Scope::Cluster, async {
        let state = ctl.reader().refresh().await?;
        Ok(state.live_nodes.iter().cloned().collect())
    })
    .await;
    ApiResponse::from_result(result)
}
