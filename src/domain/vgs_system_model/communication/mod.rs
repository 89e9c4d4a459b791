pub mod codec;
pub mod protocol;
pub mod remote;
pub mod server;
