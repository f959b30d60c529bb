// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use anyhow::Context;
use clap::Parser;
use larch::config::LarchConfig;
use larch::fanout::{FanoutSettings, RouteFanout};
use larch::feed::FeedPoller;
use larch::geometry::{Position, PositionSet};
use larch::refresh::{RefreshLoop, RefreshSettings};
use larch::routing::HttpRouteClient;
use larch::snapshot::{Snapshot, SnapshotStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info};

mod bench;
mod server;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Refresh vehicle trails in the background and serve the latest snapshot
    Serve {
        /// RON config file, overridden by environment variables
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, default_value = "0.0.0.0")]
        address: String,
        #[arg(short, long, default_value_t = 5002)]
        port: u16,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Convert a downloaded bus_routes.json into GeoJSON
    Export {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Time a burst of routing requests around a base location
    Bench {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 18_000)]
        count: usize,
        #[arg(long, default_value_t = 51.507321, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, default_value_t = -0.127647, allow_hyphen_values = true)]
        lon: f64,
        /// Meters from the base location along each axis
        #[arg(long, default_value_t = 500.0)]
        distance: f64,
    },
}

fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();
}

fn http_client(config: &LarchConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .deflate(true)
        .gzip(true)
        .brotli(true)
        .pool_max_idle_per_host(config.concurrency_cap)
        .build()
        .context("could not build http client")
}

fn route_fanout(client: reqwest::Client, config: &LarchConfig) -> RouteFanout {
    let route_client = HttpRouteClient::new(
        client,
        config.routing_engine,
        &config.routing_engine_url,
        config.routing_profile.clone(),
        config.route_timeout,
    );

    RouteFanout::new(
        Arc::new(route_client),
        FanoutSettings {
            concurrency_cap: config.concurrency_cap,
            batch_size: config.batch_size,
            // the client timeout fires first; this only catches a stalled body
            request_timeout: config.route_timeout * 2,
        },
    )
}

fn refresh_stopped(finished: Result<(), JoinError>) -> anyhow::Error {
    let err = match finished {
        Ok(()) => anyhow::anyhow!("refresh loop exited"),
        Err(join_error) if join_error.is_panic() => {
            anyhow::anyhow!("refresh loop panicked: {}", join_error)
        }
        Err(join_error) => anyhow::anyhow!("refresh loop was cancelled: {}", join_error),
    };

    error!("{}, shutting down", err);
    err
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    match args.cmd {
        Command::Serve {
            config,
            address,
            port,
            verbose,
        } => {
            init_tracing(verbose);

            let config = LarchConfig::load(config.as_deref())?;
            info!(
                "feed {}, {:?} routing at {} ({} profile), {} concurrent requests",
                config.feed_url,
                config.routing_engine,
                config.routing_engine_url,
                config.routing_profile,
                config.concurrency_cap
            );

            let client = http_client(&config)?;

            let feed = FeedPoller::new(
                client.clone(),
                config.feed_url.clone(),
                config.feed_archive_entry.clone(),
                config.vehicle_id_policy,
                config.feed_timeout,
            );

            let store = Arc::new(SnapshotStore::new());

            let refresh = RefreshLoop::new(
                Arc::new(feed),
                route_fanout(client, &config),
                Arc::clone(&store),
                RefreshSettings::from(&config),
            );

            let refresh_task = tokio::spawn(refresh.run(PositionSet::new()));

            info!("serving snapshots on {}:{}", address, port);

            let http_server = HttpServer::new(move || {
                let cors = Cors::permissive();
                App::new()
                    .wrap(cors)
                    .app_data(web::Data::new(Arc::clone(&store)))
                    .configure(server::config)
            })
            .bind((address, port))?
            .run();
            let http_handle = http_server.handle();
            let refresh_abort = refresh_task.abort_handle();

            // the server only runs while the refresh loop does
            tokio::select! {
                served = http_server => {
                    refresh_abort.abort();
                    served?;
                    Ok(())
                }
                finished = refresh_task => {
                    http_handle.stop(true).await;
                    Err(refresh_stopped(finished))
                }
            }
        }
        Command::Export { input, output } => {
            init_tracing(false);

            let bytes = std::fs::read(&input)
                .with_context(|| format!("could not read {}", input.display()))?;

            let snapshot = Snapshot::from_json(&bytes, chrono::Utc::now())
                .with_context(|| format!("{} is not a bus_routes.json document", input.display()))?;

            let geojson = larch::geojson_export::snapshot_to_feature_collection(&snapshot);

            let file = std::fs::File::create(&output)
                .with_context(|| format!("could not create {}", output.display()))?;
            serde_json::to_writer(file, &geojson)?;

            info!(
                "wrote {} vehicle trails to {}",
                snapshot.paths.len(),
                output.display()
            );

            Ok(())
        }
        Command::Bench {
            config,
            count,
            lat,
            lon,
            distance,
        } => {
            init_tracing(false);

            let config = LarchConfig::load(config.as_deref())?;
            let fanout = route_fanout(http_client(&config)?, &config);

            let positions = bench::random_positions(
                &mut rand::rng(),
                Position::new(lat, lon),
                count,
                distance,
            );

            let report = bench::run(
                &fanout,
                &positions,
                config.path_length,
                config.coordinate_precision,
            )
            .await;

            println!(
                "Total time for {} requests: {:.2?} ({} routed, {} failed, cap {}, batch {})",
                report.requests,
                report.elapsed,
                report.routed,
                report.failed,
                config.concurrency_cap,
                config.batch_size
            );

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn crashing_loop() {
        panic!("feed parser blew up");
    }

    #[tokio::test]
    async fn panicked_refresh_loop_is_reported() {
        let finished = tokio::spawn(crashing_loop()).await;

        let err = refresh_stopped(finished);

        assert!(err.to_string().starts_with("refresh loop panicked"));
    }

    #[tokio::test]
    async fn cancelled_refresh_loop_is_reported() {
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();

        let err = refresh_stopped(task.await);

        assert!(err.to_string().starts_with("refresh loop was cancelled"));
    }
}
