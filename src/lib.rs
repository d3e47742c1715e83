pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod models;
pub mod observability;
pub mod simulation;
