pub mod app;
pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod filters;
pub mod normalize;
pub mod output;
pub mod query;

pub use app::App;
pub use error::EncodeError;
