pub mod config;
pub mod shoot;
