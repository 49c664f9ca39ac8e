pub mod admin;
pub mod auth;
pub mod companies;
pub mod subscriptions;
pub mod system;
