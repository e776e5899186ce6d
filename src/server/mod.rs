//! Network surface
//!
//! This module contains the HTTP routes and the WebSocket channel that
//! clients use to reach their room.

pub mod channel;
pub mod http;

pub use http::router;
