use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::dm::{conversations, messages};
use crate::follows;
use crate::groups;
use crate::notify::{admin as admin_notify, service as notify_service};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limit WebSocket handshakes per IP: the upgrade is the only
    // unauthenticated entry point that does real work before auth.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let ws_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(1)
            .burst_size(60)
            .finish()
            .expect("Failed to build governor config"),
    );
    let ws_limiter = ws_governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            ws_limiter.retain_recent();
        }
    });

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .layer(GovernorLayer {
            config: ws_governor_config,
        });

    // Per-user notification inbox
    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            axum::routing::get(notify_service::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            axum::routing::put(notify_service::mark_all_read),
        )
        .route(
            "/api/notifications/{id}/read",
            axum::routing::put(notify_service::mark_one_read),
        );

    // Shared admin inbox (kind == admin enforced in handlers)
    let admin_routes = Router::new()
        .route(
            "/api/admin/notifications",
            axum::routing::get(admin_notify::list_admin_notifications),
        )
        .route(
            "/api/admin/notifications/unread-count",
            axum::routing::get(admin_notify::unread_count),
        )
        .route(
            "/api/admin/notifications/read-all",
            axum::routing::put(admin_notify::mark_all_read),
        )
        .route(
            "/api/admin/notifications/{id}/read",
            axum::routing::put(admin_notify::mark_one_read),
        );

    // Conversations and messages. The handlers share the relay path with
    // the WebSocket dispatcher.
    let messaging_routes = Router::new()
        .route(
            "/api/conversations",
            axum::routing::get(conversations::list_conversations),
        )
        .route(
            "/api/conversations/{id}/messages",
            axum::routing::get(messages::list_messages),
        )
        .route(
            "/api/conversations/{id}/messages",
            axum::routing::delete(messages::clear_conversation_handler),
        )
        .route(
            "/api/conversations/{id}/read",
            axum::routing::put(messages::mark_conversation_read),
        )
        .route("/api/messages", axum::routing::post(messages::send_message))
        .route(
            "/api/messages/{id}",
            axum::routing::put(messages::edit_message),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::delete(messages::delete_message),
        );

    // Domain trigger endpoints owned by this core
    let social_routes = Router::new()
        .route(
            "/api/follows/toggle",
            axum::routing::post(follows::toggle_follow),
        )
        .route("/api/groups", axum::routing::post(groups::create_group))
        .route(
            "/api/groups/{id}/toggle-membership",
            axum::routing::post(groups::toggle_membership),
        );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(notification_routes)
        .merge(admin_routes)
        .merge(messaging_routes)
        .merge(social_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
