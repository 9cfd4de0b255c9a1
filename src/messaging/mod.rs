pub mod codec;
pub mod endpoint;
pub mod session;
pub mod transport;
