use std::net::TcpListener;
use std::sync::Arc;

use tokenrealm::auth::{Authenticator, SessionManager, TokenVerifier};
use tokenrealm::cache::{CacheStore, RedisCacheStore};
use tokenrealm::configuration::get_configuration;
use tokenrealm::startup::run;
use tokenrealm::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let configuration = match get_configuration() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to read configuration: {}", e);
            return Err(startup_error(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    init_telemetry(&configuration.telemetry);
    tracing::info!("Starting application");

    tracing::info!(url = %configuration.redis.url, "Connecting to session store");
    let redis = RedisCacheStore::connect(&configuration.redis)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to session store: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, "Session store error")
        })?;
    tracing::info!("Session store connection pool created successfully");

    let store: Arc<dyn CacheStore> = Arc::new(redis.clone());

    let sessions = SessionManager::new(store.clone(), &configuration.jwt).map_err(|e| {
        tracing::error!("Invalid token settings: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Token settings error")
    })?;
    let authenticator = Authenticator::new(store, &configuration.jwt).map_err(|e| {
        tracing::error!("Invalid token settings: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Token settings error")
    })?;
    let verifier: Arc<dyn TokenVerifier> = Arc::new(authenticator);

    let address = configuration.application.address();
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, Arc::new(sessions), verifier)?;
    let result = server.await;

    redis.close();
    tracing::info!("Server stopped");

    result
}
