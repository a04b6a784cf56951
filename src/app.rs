use crate::{
    clients::{HttpChatClient, HttpEmbedder, RestCatalogStore},
    config::Config,
    error::Result,
    routes::api_routes,
    services::{QueryExpander, RecommendationResolver},
};
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;
use tracing::info;

pub struct Application {
    port: u16,
    host: String,
    config: Config,
}

impl Application {
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.port,
            host: config.host.clone(),
            config: config.clone(),
        }
    }

    /// Build and run the server
    pub async fn run(&self) -> Result<()> {
        let bind_address = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&bind_address)?;
        info!("Starting server at http://{}:{}", self.host, self.port);

        self.run_with_listener(listener).await
    }

    /// Run the server with a specific TCP listener. Useful for tests that
    /// want a random port.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        // Composition root: every collaborator is constructed here and
        // injected; nothing else in the crate holds process-wide state.
        let embedder = Arc::new(HttpEmbedder::new(self.config.embedding.clone())?);
        let chat = Arc::new(HttpChatClient::new(self.config.llm.clone())?);
        let catalog = Arc::new(RestCatalogStore::new(&self.config.catalog)?);

        let resolver = RecommendationResolver::new(
            embedder,
            catalog,
            QueryExpander::new(chat),
            self.config.resolver.clone(),
        );
        // Detached; lives as long as the process.
        let _sweeper = resolver
            .cache()
            .spawn_sweeper(self.config.resolver.cache_sweep_interval);

        let resolver = web::Data::new(resolver);

        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header();

            App::new()
                .wrap(cors)
                .wrap(Logger::default())
                .app_data(resolver.clone())
                .service(api_routes())
        })
        .listen(listener)?
        .run()
        .await?;

        Ok(())
    }
}
