pub mod classifier;
pub mod config;
pub mod error;
pub mod labels;
pub mod pipeline;
pub mod preprocess;
pub mod routes;
