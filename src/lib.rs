pub mod app;
pub mod config;
pub mod governance;
pub mod shared;
