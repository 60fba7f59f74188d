mod handlers;
mod producer_ws;
mod routes;
mod signaling_ws;
mod stream_ws;
mod ws;

pub use routes::create_router;
pub use ws::ws_handler;
