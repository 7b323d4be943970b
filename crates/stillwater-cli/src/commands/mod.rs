pub mod config;
pub mod consent;
pub mod cookies;
pub mod gateway;
pub mod state;
