pub mod app;
pub mod broadcast;
pub mod core;
pub mod domain;
pub mod plugin;
pub mod server;
pub mod session;
