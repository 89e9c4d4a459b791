use std::sync::Arc;

use crate::api::cluster_dto::ClusterDto;
use crate::domain::vgs_system_model::client::client::JobResultHandler;
use crate::domain::vgs_system_model::cluster::LocalCluster;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Reads a cluster description and brings every peer in it up inside this process.
pub async fn launch_cluster(file_path: &str, result_handler: Arc<dyn JobResultHandler>) -> Result<LocalCluster> {
    logger::init();
    log::info!("Logger initialized. Starting local cluster.");

    let cluster_dto: ClusterDto = parse_json_file::<ClusterDto>(file_path)?;
    log::info!("JSON file parsed successfully.");

    let cluster = LocalCluster::launch(&cluster_dto, result_handler).await?;
    log::info!("Local cluster constructed successfully.");

    Ok(cluster)
}
