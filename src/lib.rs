pub mod app;
pub mod capture;
pub mod cli;
pub mod config;
pub mod global;
pub mod profile;
pub mod remote;
pub mod retry;
pub mod session;
