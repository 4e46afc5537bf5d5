pub mod api;
pub mod server;

pub use api::StatusState;
pub use server::{router, run_server};
