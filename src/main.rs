use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use dotenv::dotenv;
use fixlink_backend::auth::jwks::JwksVerifier;
use fixlink_backend::auth::jwt::TokenVerifier;
use fixlink_backend::config::CoreConfig;
use fixlink_backend::{create_store, handlers, services};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = CoreConfig::from_env();
    tracing::info!(
        store_timeout_ms = config.store_timeout.as_millis() as u64,
        cas_max_attempts = config.cas_max_attempts,
        policy = ?config.aggregation_policy,
        "Loaded core configuration"
    );

    let database_url = std::env::var("DATABASE_URL").ok();
    let redis_url = std::env::var("REDIS_URL").ok();
    let store = create_store(database_url.as_deref(), redis_url.as_deref())
        .await
        .expect("Failed to initialise document store");

    let (lifecycle, aggregator) = services::build(store, &config);
    let lifecycle = web::Data::new(lifecycle);
    let aggregator = web::Data::new(aggregator);

    // Shared-secret verification wins when configured; otherwise use the project's JWKS.
    let verifier = match std::env::var("SUPABASE_JWT_SECRET") {
        Ok(secret) => {
            tracing::info!("Verifying tokens with the shared HS256 secret");
            TokenVerifier::SharedSecret(secret)
        }
        Err(_) => {
            let supabase_url = std::env::var("SUPABASE_URL")
                .expect("SUPABASE_URL or SUPABASE_JWT_SECRET must be set");
            let anon_key = std::env::var("SUPABASE_ANON_KEY").ok();
            let jwks = JwksVerifier::for_supabase(&supabase_url, anon_key);
            tracing::info!("Verifying tokens against {}", jwks.jwks_url());
            TokenVerifier::Jwks(jwks)
        }
    };
    let verifier = web::Data::new(verifier);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{port}");
    tracing::info!("Server running at http://{bind_addr}");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::ACCEPT,
            ])
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(lifecycle.clone())
            .app_data(aggregator.clone())
            .app_data(verifier.clone())
            .service(web::scope("/api").configure(handlers::init_routes))
    })
    .bind(&bind_addr)?
    .run()
    .await
}
