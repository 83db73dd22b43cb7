pub mod agent;
pub mod auth;
pub mod config;
pub mod embedding;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod pipeline;
pub mod pricing;
pub mod store;
pub mod tools;
pub mod types;
pub mod validation;
