pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod files;
pub mod housekeeping;
pub mod ingest;
pub mod messages;
pub mod model;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod typing;
pub mod users;
pub mod wire;
pub mod ws;
