pub mod auth;
pub mod config;
pub mod domain;
pub mod fetch;
pub mod mail;
pub mod render;
pub mod session;
pub mod terminal;
