pub mod client;
pub mod codec;
pub mod device;
pub mod discovery;
pub mod error;
