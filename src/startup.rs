use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{SessionManager, TokenVerifier};
use crate::middleware::BearerAuth;
use crate::routes::{current_user, health_check, logout, refresh};

pub fn run(
    listener: TcpListener,
    sessions: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
) -> Result<Server, std::io::Error> {
    let sessions = web::Data::from(sessions);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(sessions.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/refresh", web::post().to(refresh))
            // Protected routes (require a live session)
            .service(
                web::scope("/api")
                    .wrap(BearerAuth::new(verifier.clone()))
                    .route("/me", web::get().to(current_user))
                    .route("/logout", web::post().to(logout)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
