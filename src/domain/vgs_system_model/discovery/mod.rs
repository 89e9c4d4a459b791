pub mod addressable;
pub mod naming;
pub mod pinger;
pub mod registry;
pub mod selector;
pub mod status;
