pub mod api;
pub mod batch;
pub mod config;
pub mod instance;
pub mod task;
pub mod templates;
pub mod terminal;
pub mod watch;
