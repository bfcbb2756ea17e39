pub mod app;
pub mod common;
pub mod handlers;
pub mod shutdown;
