pub mod broadcast;
pub mod config;
pub mod db;
pub mod format;
pub mod gateway;
pub mod handlers;
pub mod model;
pub mod telegram;
