use taps_config::load_config;
use taps_config::shared::{
    ApplicationSettings, ClientConfig, ServerConfig, SessionSettings, StreamConfig,
};
use tracing::debug;

use crate::cli::{ServerArgs, TransferArgs};

/// Loads the [`ClientConfig`], falling back to the defaults when no configuration is
/// present, and validates it.
pub fn load_client_config() -> anyhow::Result<ClientConfig> {
    let config = match load_config::<ClientConfig>() {
        Ok(config) => config,
        Err(err) => {
            debug!(error = %err, "no client configuration found, using defaults");
            ClientConfig::default()
        }
    };
    config.validate()?;

    Ok(config)
}

/// Applies the command line flags on top of the loaded configuration.
pub fn apply_transfer_args(config: &mut ClientConfig, args: &TransferArgs) {
    if let Some(chunksize) = args.chunksize {
        config.default_chunksize = ClientConfig::clamp_cli_chunksize(chunksize);
    }
}

/// Builds the server configuration from the command line.
pub fn server_config(args: ServerArgs) -> anyhow::Result<ServerConfig> {
    let config = ServerConfig {
        application: ApplicationSettings {
            host: args.host,
            port: args.port,
        },
        database_url: Some(args.database_url.into()),
        login: args.login,
        password: args.password.into(),
        session: SessionSettings::default(),
        stream: StreamConfig::request_serving(),
    };
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args(chunksize: Option<usize>) -> TransferArgs {
        TransferArgs {
            database_url: "postgres://localhost/db".to_string(),
            remote_url: "http://localhost:5000".to_string(),
            chunksize,
            resume: None::<PathBuf>,
            tables: vec![],
            filter: None,
            exclude_tables: vec![],
            skip_schema: false,
            indexes_first: false,
        }
    }

    #[test]
    fn small_chunksizes_are_raised() {
        let mut config = ClientConfig::default();
        apply_transfer_args(&mut config, &args(Some(3)));
        assert_eq!(config.default_chunksize, 10);

        apply_transfer_args(&mut config, &args(Some(250)));
        assert_eq!(config.default_chunksize, 250);

        apply_transfer_args(&mut config, &args(None));
        assert_eq!(config.default_chunksize, 250);
    }
}
