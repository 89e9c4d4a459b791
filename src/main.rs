use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use vgs_rust_scheduler::api::cluster_dto::ClusterDto;
use vgs_rust_scheduler::domain::vgs_system_model::client::client::ResultCollector;
use vgs_rust_scheduler::domain::vgs_system_model::cluster::LocalCluster;
use vgs_rust_scheduler::domain::vgs_system_model::model::job::Job;
use vgs_rust_scheduler::domain::vgs_system_model::utils::id::{ClientId, JobId};
use vgs_rust_scheduler::loader::parser::parse_json_file;
use vgs_rust_scheduler::logger;

/// Runs grid schedulers and resource managers in one process and feeds them random jobs.
#[derive(Parser, Debug)]
#[command(name = "vgs", version)]
struct Args {
    /// Cluster description (JSON). Overrides the size flags below.
    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value_t = 2)]
    resource_managers: u32,

    #[arg(long, default_value_t = 2)]
    grid_schedulers: u32,

    /// Nodes per resource manager.
    #[arg(long, default_value_t = 4)]
    nodes: usize,

    #[arg(long, default_value_t = 20)]
    jobs: u32,

    /// Upper bound for the random job duration, in time units.
    #[arg(long, default_value_t = 100)]
    max_duration: u64,

    /// Connect the generated peers over TCP on 127.0.0.1, starting at this port.
    #[arg(long)]
    base_port: Option<u16>,

    /// Write the event statistics as CSV to this file.
    #[arg(long)]
    statistics_file: Option<String>,

    /// Give up waiting for results after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let args = Args::parse();

    let mut dto = match (&args.config, args.base_port) {
        (Some(path), _) => parse_json_file::<ClusterDto>(path).with_context(|| format!("could not load cluster description '{}'", path))?,
        (None, Some(port)) => ClusterDto::on_loopback(args.resource_managers, args.grid_schedulers, args.nodes, port),
        (None, None) => ClusterDto::generated(args.resource_managers, args.grid_schedulers, args.nodes),
    };
    if args.statistics_file.is_some() {
        dto.statistics_file = args.statistics_file.clone();
    }

    let results = Arc::new(ResultCollector::new());
    let cluster = LocalCluster::launch(&dto, results.clone()).await.context("failed to launch the local cluster")?;
    let client = cluster.client(ClientId::new(0));

    let mut submitted = 0;
    for id in 0..args.jobs {
        let duration = rand::rng().random_range(1..=args.max_duration.max(1));

        match client.submit(Job::new(JobId::new(id), duration)).await {
            Ok(_) => submitted += 1,
            Err(e) => log::error!("Job {} was not accepted: {}", id, e),
        }
    }

    let finished_in_time = results.wait_for(submitted, Duration::from_secs(args.timeout_secs)).await;

    let mut per_manager: BTreeMap<String, usize> = BTreeMap::new();
    for job in results.results() {
        let rm = job.current_resource_manager_id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string());
        *per_manager.entry(rm).or_default() += 1;
    }

    log::info!("{} of {} submitted jobs finished ({} requested)", results.len(), submitted, args.jobs);
    for (rm, count) in per_manager.iter() {
        log::info!("  RM {}: {} jobs", rm, count);
    }

    cluster.shut_down().await;

    if !finished_in_time {
        anyhow::bail!("only {} of {} jobs finished within {} seconds", results.len(), submitted, args.timeout_secs);
    }

    Ok(())
}
