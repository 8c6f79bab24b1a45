pub mod assistant;
pub mod bridge;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod gateway;
pub mod pomodoro;
pub mod reminders;
pub mod server;
pub mod session;
pub mod store;
pub mod streak;
pub mod utils;

pub use config::Config;
pub use error::PilotError;
pub use session::Session;
