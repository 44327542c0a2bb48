//! `kart_client`
//!
//! Client-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Prediction and reconciliation of the controlled kart
//! - Interpolation of remote karts
//! - Clock sync against the server's session time

pub mod client;

pub use client::{ClientState, KartClient};
