// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::ExitCode, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use firehose_nozzle::{
    config::NozzleConfig,
    constants::DEFAULT_LOG_LEVEL,
    errors::NozzleError,
    nozzle::{Nozzle, ShutdownOutcome},
    telemetry::{Registry, Reporter},
};

mod producer;
mod sinks;

use producer::JsonLinesProducer;
use sinks::{JsonLinesWriter, JsonLogSink, JsonMetricSink};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("NOZZLE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    // stdout carries the nozzle's output, diagnostics go to stderr
    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match NozzleConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error reading nozzle configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let app_info = match config.app_info_repository() {
        Ok(app_info) => app_info,
        Err(e) => {
            error!("Error loading app metadata: {e}");
            return ExitCode::FAILURE;
        }
    };

    let writer = JsonLinesWriter::new(std::io::stdout());
    let registry = Arc::new(Registry::new());
    let nozzle = match Nozzle::new(
        &config,
        Arc::new(JsonLogSink::new(Arc::clone(&writer))),
        Arc::new(JsonMetricSink::new(writer)),
        app_info,
        Arc::clone(&registry),
    ) {
        Ok(nozzle) => nozzle,
        Err(e) => {
            error!("Error creating nozzle: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel_token = CancellationToken::new();
    let reporter =
        Reporter::new(Arc::clone(&registry), config.heartbeat_rate).spawn(cancel_token.clone());

    let mut producer = JsonLinesProducer::new(tokio::io::stdin());
    let run = match nozzle.start(&mut producer) {
        Ok(run) => run,
        Err(e) => {
            error!("Error starting nozzle: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("nozzle reading envelopes from stdin");

    let exit_code = tokio::select! {
        result = run => match result {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(NozzleError::ProducerClosed)) => {
                info!("input closed, shutting down");
                ExitCode::SUCCESS
            }
            Ok(Err(e)) => {
                error!("nozzle stopped: {e}");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!("nozzle run loop failed: {e}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            ExitCode::SUCCESS
        }
    };

    match nozzle.stop().await {
        Ok(ShutdownOutcome::Drained) => {}
        Ok(ShutdownOutcome::TimedOut) => warn!("exiting with unflushed metric events"),
        Err(e) => error!("Error stopping nozzle: {e}"),
    }

    cancel_token.cancel();
    if let Err(e) = reporter.await {
        error!("telemetry reporter failed: {e}");
    }
    exit_code
}
