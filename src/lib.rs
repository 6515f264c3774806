pub mod auth;
pub mod config;
pub mod couriers;
pub mod dispatch;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
