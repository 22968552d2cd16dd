//! API module

pub mod http;

pub use http::HttpApi;
