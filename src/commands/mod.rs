pub mod app_info;
pub mod health;
pub mod refresh_clock;
