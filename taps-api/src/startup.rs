use std::{net::TcpListener, sync::Arc};

use actix_web::{
    App, HttpServer,
    dev::Server,
    middleware::from_fn,
    web::{self, Data},
};
use actix_web_httpauth::middleware::HttpAuthentication;
use secrecy::{ExposeSecret, SecretString};
use taps::db::Connector;
use taps::error::TapsError;
use taps::url::safe_url;
use taps_config::shared::ServerConfig;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::{
    authentication::{Credentials, basic_validator},
    routes::{
        health_check::health_check,
        pull::{pull_indexes, pull_schema, pull_table, pull_table_count, pull_table_names},
        push::{push_indexes, push_schema, push_table, reset_sequences, verify_stream},
        root::banner,
        sessions::{close_session, open_session},
    },
    session::SessionRegistry,
    version_guard::version_guard,
};

/// Largest request body accepted, sized for big pushed batches.
const MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("An io error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Taps(#[from] TapsError),
}

pub struct Application {
    port: u16,
    server: Server,
    sweeper: JoinHandle<()>,
}

impl Application {
    /// Verifies the configured database, binds the listener and starts the idle sweep.
    pub async fn build(config: ServerConfig, connector: Connector) -> Result<Self, StartupError> {
        let database_url = config
            .database_url
            .as_ref()
            .map(|url| url.expose_secret().to_string());

        if let Some(url) = &database_url {
            let db = connector.connect(url).await?;
            db.ping().await?;
            db.close().await;
            info!(database_url = %safe_url(url), "verified server database");
        }

        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let registry = Arc::new(SessionRegistry::new(
            connector,
            database_url,
            config.session.idle_timeout(),
            config.session.expire_after(),
        ));
        let sweeper = registry.clone().start_sweeper(config.session.sweep_interval());

        let server = run(config, listener, registry)?;

        Ok(Self {
            port,
            server,
            sweeper,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let result = self.server.await;
        self.sweeper.abort();

        result
    }
}

pub fn run(
    config: ServerConfig,
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
) -> Result<Server, StartupError> {
    let registry = Data::from(registry);
    let stream_config = Data::new(config.stream.clone());
    let password = SecretString::from(config.password.clone());
    let credentials = Data::new(Credentials::new(config.login.clone(), password));

    info!(address = %listener.local_addr()?, "starting taps server");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
            .app_data(registry.clone())
            .app_data(stream_config.clone())
            .app_data(credentials.clone())
            .service(health_check)
            .service(
                web::scope("")
                    .wrap(HttpAuthentication::basic(basic_validator))
                    // Registered last so the version check runs before authentication.
                    .wrap(from_fn(version_guard))
                    .service(banner)
                    .service(open_session)
                    .service(close_session)
                    .service(push_schema)
                    .service(push_indexes)
                    .service(push_table)
                    .service(verify_stream)
                    .service(reset_sequences)
                    .service(pull_schema)
                    .service(pull_indexes)
                    .service(pull_table_names)
                    .service(pull_table_count)
                    .service(pull_table),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
