pub mod compress;
pub mod config;
pub mod error;
pub mod filename;
pub mod handlers;
pub mod history;
pub mod middleware;
pub mod models;
pub mod net;
pub mod page;
pub mod server;
pub mod spool;
pub mod state;
pub mod utils;
