pub mod handlers;
pub mod shell;
