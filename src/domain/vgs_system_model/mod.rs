pub mod client;
pub mod cluster;
pub mod communication;
pub mod discovery;
pub mod grid_scheduler;
pub mod model;
pub mod resource_manager;
pub mod utils;
