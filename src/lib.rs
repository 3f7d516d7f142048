pub mod app;
pub mod assets;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod health;
pub mod metadata;
pub mod schema;
pub mod state;
