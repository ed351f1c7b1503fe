use std::process::ExitCode;
use std::time::Duration;

use anyhow::bail;
use taps::client::HttpSessionClient;
use taps::concurrency::cancel::create_cancel_channel;
use taps::db::Connector;
use taps::error::ErrorKind;
use taps::operation::{Operation, OperationOptions, OperationOutcome};
use taps::state::{Direction, OperationState};
use taps::url::safe_url;
use taps_api::startup::Application;
use tracing::{error, info, warn};

use crate::cli::{ServerArgs, TransferArgs};
use crate::config::{apply_transfer_args, load_client_config, server_config};

/// Exit status reported when client and server speak incompatible protocol versions.
const VERSION_MISMATCH_EXIT_CODE: u8 = 3;

/// Runs a push or pull until it completes, is interrupted with Ctrl-C, or fails.
pub async fn transfer(direction: Direction, args: TransferArgs) -> anyhow::Result<ExitCode> {
    let mut config = load_client_config()?;
    apply_transfer_args(&mut config, &args);

    let mut options = OperationOptions::from_config(&config);
    options.table_filter = args.table_filter();
    options.exclude_tables = args.exclude_tables.clone();
    options.skip_schema = args.skip_schema;
    options.indexes_first = args.indexes_first;

    let db = Connector::new().connect(&args.database_url).await?;
    let client = HttpSessionClient::new(
        &args.remote_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let (cancel_tx, cancel_rx) = create_cancel_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            cancel_tx.cancel();
        }
    });

    let mut operation = match &args.resume {
        Some(path) => {
            let state = OperationState::load(path).await?;
            if state.direction != direction {
                bail!(
                    "{} holds a {} operation and cannot be resumed with {direction}",
                    path.display(),
                    state.direction
                );
            }
            info!(resume_file = %path.display(), "resuming operation");
            Operation::resume(db, client, state, options, cancel_rx)
        }
        None => Operation::new(
            direction,
            db,
            client,
            &args.database_url,
            &args.remote_url,
            options,
            cancel_rx,
        ),
    };

    match operation.run().await {
        Ok(OperationOutcome::Completed) => Ok(ExitCode::SUCCESS),
        Ok(OperationOutcome::Interrupted { resume_file }) => {
            info!(
                "interrupted, continue with: taps {direction} --resume={} {} {}",
                resume_file.display(),
                safe_url(&args.database_url),
                safe_url(&args.remote_url)
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            if let Some(resume_file) = &failure.resume_file {
                error!(resume_file = %resume_file.display(), "saved resume file");
            }

            if failure.error.kind() == ErrorKind::VersionMismatch {
                error!("{}", failure.error);
                return Ok(ExitCode::from(VERSION_MISMATCH_EXIT_CODE));
            }

            Err(failure.into())
        }
    }
}

/// Serves the database named on the command line until the process is stopped.
pub async fn start_server(args: ServerArgs) -> anyhow::Result<()> {
    let config = server_config(args)?;
    info!(
        host = %config.application.host,
        port = config.application.port,
        login = %config.login,
        "starting taps server"
    );

    let application = Application::build(config, Connector::new()).await?;
    application.run_until_stopped().await?;

    Ok(())
}
