pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod model;
pub mod pipeline;
pub mod publish;
pub mod sources;
pub mod store;
pub mod validate;
