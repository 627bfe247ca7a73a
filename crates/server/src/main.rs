//! Shelfmate server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use shelfmate_api::{SseBroadcaster, middleware::AppState, router as api_router};
use shelfmate_common::Config;
use shelfmate_core::{
    BlockCascadeService, BlockingService, EventPublisherService, FriendshipService,
    NotificationService, TriggerDispatcher, TriggerService, UserService,
};
use shelfmate_db::repositories::{
    BlockingRepository, ChangeEventRepository, FriendshipRepository, NotificationRepository,
    UserRepository,
};
use shelfmate_queue::{PubSubSseBridge, RedisPubSub, SchedulerConfig, run_scheduler};
use tokio::signal;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }

    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelfmate=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting shelfmate server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = shelfmate_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    shelfmate_db::migrate(&db).await?;
    info!("Migrations completed");

    // Initialize repositories
    let db = Arc::new(db);
    let user_repo = UserRepository::new(Arc::clone(&db));
    let friendship_repo = FriendshipRepository::new(Arc::clone(&db));
    let blocking_repo = BlockingRepository::new(Arc::clone(&db));
    let notification_repo = NotificationRepository::new(Arc::clone(&db));
    let change_event_repo = ChangeEventRepository::new(Arc::clone(&db));

    // Real-time delivery: Redis Pub/Sub when reachable, in-process otherwise
    let sse_broadcaster = SseBroadcaster::new();
    let event_publisher: EventPublisherService =
        match RedisPubSub::new(&config.redis.url, &config.redis.prefix).await {
            Ok(pubsub) => {
                pubsub.start().await?;
                let pubsub = Arc::new(pubsub);
                let broadcaster = sse_broadcaster.clone();
                PubSubSseBridge::new(Arc::clone(&pubsub)).start(move |event| {
                    let broadcaster = broadcaster.clone();
                    tokio::spawn(async move { broadcaster.broadcast_to_user(event).await });
                });
                info!("Connected to Redis Pub/Sub");
                pubsub
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, delivering events in-process only");
                Arc::new(sse_broadcaster.clone())
            }
        };

    // Trigger pipeline
    let trigger_service = TriggerService::new(Arc::clone(&db), user_repo.clone());
    let cascade_service = BlockCascadeService::new(Arc::clone(&db), friendship_repo.clone());
    let mut dispatcher = TriggerDispatcher::new(
        change_event_repo,
        trigger_service,
        cascade_service,
        config.triggers.clone(),
    );
    dispatcher.set_event_publisher(event_publisher);
    let waker = dispatcher.waker();

    // Initialize services
    let user_service = UserService::new(user_repo.clone(), friendship_repo.clone());
    let mut friendship_service = FriendshipService::new(
        Arc::clone(&db),
        friendship_repo,
        user_repo.clone(),
        blocking_repo.clone(),
        config.friends.clone(),
    );
    friendship_service.set_trigger_waker(waker.clone());
    let mut blocking_service = BlockingService::new(
        Arc::clone(&db),
        blocking_repo,
        user_repo,
        config.friends.max_page_size,
    );
    blocking_service.set_trigger_waker(waker.clone());
    let notification_service = NotificationService::new(notification_repo, &config.friends);

    // Start the trigger scheduler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handles = run_scheduler(
        SchedulerConfig::from(&config.triggers),
        Arc::new(dispatcher),
        waker,
        shutdown_rx.clone(),
    );
    info!("Trigger dispatcher started");

    // Drop SSE channels nobody listens to any more
    let janitor = {
        let broadcaster = sse_broadcaster.clone();
        let mut shutdown = shutdown_rx;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => broadcaster.cleanup().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    let state = AppState {
        user_service,
        friendship_service,
        blocking_service,
        notification_service,
        sse_broadcaster,
    };

    let app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            shelfmate_api::middleware::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    for handle in scheduler_handles {
        let _ = handle.await;
    }
    let _ = janitor.await;

    info!("Server shutdown complete");

    Ok(())
}
