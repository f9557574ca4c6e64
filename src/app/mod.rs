pub mod active;
pub mod backend;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod models;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod ui;
