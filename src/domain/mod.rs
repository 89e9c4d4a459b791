pub mod simulator;
pub mod vgs_system_model;
