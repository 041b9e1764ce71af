use actix_cors::Cors;
use actix_web::middleware::{Compress, DefaultHeaders};
use actix_web::{App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use quill::cache::{PageCache, HOME_CACHE_TTL};
use quill::openapi::ApiDoc;
use quill::routes::{config, AppState};
use quill::storage::build_image_store;

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use quill::repo::inmem::InMemRepo;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment comes from the shell / systemd / Docker; .env is only
    // picked up in debug builds to ease local setup.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping quill server");

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = {
        info!("Using in-memory repository backend");
        InMemRepo::new()
    };

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .expect("Failed to create Pg pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        info!("Using Postgres repository backend");
        quill::repo::pg::PgRepo::new(pool)
    };

    let openapi = ApiDoc::openapi();
    let image_store = build_image_store().await;
    let page_cache = PageCache::new(HOME_CACHE_TTL);

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allow_any_header()
                .allowed_methods(["GET", "POST", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            } else {
                c = c
                    .allowed_origin("http://localhost:5173")
                    .allowed_origin("http://127.0.0.1:5173");
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("Referrer-Policy", "no-referrer")),
            )
            .wrap(cors)
            .app_data(actix_web::web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                image_store: image_store.clone(),
                page_cache: page_cache.clone(),
            }))
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .configure(config)
    })
    .bind(("0.0.0.0", 8000))?;

    info!("Listening on http://0.0.0.0:8000");

    server.run().await
}

/// Fail fast when required environment variables are missing.
fn validate_env_vars() {
    use std::env;

    if env::var("JWT_SECRET").is_err() {
        eprintln!("Missing required environment variable JWT_SECRET");
        std::process::exit(1);
    }
    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long");
            std::process::exit(1);
        }
    }
}
