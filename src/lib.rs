pub mod cli;
pub mod load_config;
pub mod mailer;
pub mod user_store;
pub mod wialon;

pub use cli::{run, Cli, Commands};
