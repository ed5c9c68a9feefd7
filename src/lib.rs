pub mod bandwidth;
pub mod cache;
pub mod chunked;
pub mod compress;
pub mod config;
pub mod metrics;
pub mod proxy;
pub mod push;
pub mod routing;
pub mod server;
pub mod stream;
pub mod upstream;
