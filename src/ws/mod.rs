pub mod handler;

pub use handler::ws_router;
pub use handler::AppState;
