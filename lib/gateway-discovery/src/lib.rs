//! Discovery directory client
pub mod http;

pub use http::HttpDirectory;
