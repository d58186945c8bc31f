//! Gateway session multiplexer: one persistent upstream link to the external
//! conversational gateway, fanned out into many per-user sessions.
//!
//! Lifecycle:
//! 1. Load config, open the durable store
//! 2. Build the multiplexer (registries + upstream link)
//! 3. Connect upstream (initial failure surfaces to the bootstrapper;
//!    later drops are handled by reconnect-with-backoff)
//! 4. Start the HTTP + WebSocket front-end server
//!
//! Routing and ownership enforcement live in `mux`; everything else is a
//! registry or a pump.

pub mod clients;
pub mod mux;
pub mod pairing;
pub mod registry;
pub mod server;
pub mod upstream;
pub mod ws;
