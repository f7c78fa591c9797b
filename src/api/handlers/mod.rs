pub mod agent;
pub mod auth;
pub mod health;
pub mod supervisor;
pub mod types;
