pub mod grid_scheduler;
pub mod grid_scheduler_trait;
mod state;
