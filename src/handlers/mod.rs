mod health;
mod recommendations;

pub use health::health_check;
pub use recommendations::recommendations_config;
