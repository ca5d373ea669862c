use std::net::Ipv4Addr;

use tracing::info;

use taskdeck::{create_app, db, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("TASKDECK_PORT")
        .expect("TASKDECK_PORT to be set")
        .parse()
        .expect("port number");

    let db_path = std::env::var("TASKDECK_DB").unwrap_or_else(|_| "taskdeck.db".to_string());

    let db = db::init_db(&db_path).expect("initializing database");
    let _ = db::cleanup_expired_sessions(&db);

    let state = AppState { db };
    let app = create_app(state);
    let addr = (Ipv4Addr::UNSPECIFIED, port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to port");

    info!("running on {addr:?}");

    axum::serve(listener, app).await.expect("failed serving");
}
