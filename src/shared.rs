use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CharacterTracker, MapRevisions, TileRevisionCache};
use crate::config::StreamConfig;
use crate::event::{Category, EventBus, TenantId};
use crate::producers::Producers;
use crate::snapshot::SnapshotBuilder;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub event_bus: EventBus,
    pub tiles: Arc<TileRevisionCache>,
    pub revisions: Arc<MapRevisions>,
    pub characters: Arc<CharacterTracker>,
    pub config: Arc<StreamConfig>,
}

impl AppState {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            event_bus: EventBus::new(config.channel_capacity),
            tiles: Arc::new(TileRevisionCache::new()),
            revisions: Arc::new(MapRevisions::new()),
            characters: Arc::new(CharacterTracker::new()),
            config: Arc::new(config),
        }
    }

    pub fn snapshot_builder(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(
            Arc::clone(&self.tiles),
            Arc::clone(&self.revisions),
            Arc::clone(&self.characters),
        )
    }

    /// Write paths for upstream collaborators
    pub fn producers(&self) -> Producers {
        Producers::new(
            self.event_bus.clone(),
            Arc::clone(&self.tiles),
            Arc::clone(&self.revisions),
            Arc::clone(&self.characters),
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

/// Identity of the caller, installed as a request extension by the auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub tenant_id: TenantId,
    /// Whether character positions may be shown to this caller
    pub can_see_positions: bool,
}

impl Principal {
    pub fn new(tenant_id: impl Into<TenantId>, can_see_positions: bool) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            can_see_positions,
        }
    }

    /// Bus categories this caller may receive
    pub fn categories(&self) -> Vec<Category> {
        Category::iter()
            .filter(|category| *category != Category::Character || self.can_see_positions)
            .collect()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Principal>().cloned().ok_or_else(|| {
            warn!(uri = %parts.uri, "Request without tenant identity");
            AppError::Unauthorized("Missing tenant identity".to_string())
        })
    }
}

/// Development identity middleware - trusts the `X-Tenant-Id` and
/// `X-Position-Visibility` headers.
/// Usage: .layer(middleware::from_fn(shared::dev_principal))
/// Production deployments install their own layer that inserts a `Principal`.
pub async fn dev_principal(mut req: Request, next: Next) -> Response {
    let tenant = req
        .headers()
        .get("x-tenant-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    if let Some(tenant) = tenant {
        let can_see_positions = req
            .headers()
            .get("x-position-visibility")
            .and_then(|value| value.to_str().ok())
            .map(|value| matches!(value, "1" | "true" | "yes"))
            .unwrap_or(false);

        debug!(tenant_id = %tenant, can_see_positions, "Attaching development principal");
        req.extensions_mut()
            .insert(Principal::new(tenant, can_see_positions));
    }

    next.run(req).await
}
