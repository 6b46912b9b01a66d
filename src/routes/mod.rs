pub mod api;

pub use api::{app_routes, AppState};
