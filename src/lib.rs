// Wire encoding for mission baselines and deltas
pub mod codec;

// Typed errors
pub mod error;

// Mission entity and its attribute store
pub mod mission;

// Observer registry and client channels
pub mod observer;

// Storage transactions bound to entities
pub mod txn;

// Persistence backends
pub mod store;

// Live mission registry
pub mod world;

// Configuration
pub mod config;

// HTTP and WebSocket APIs
pub mod api;

// WebSocket subscription management
pub mod subscription;

pub use error::MissionError;
pub use mission::{MissionObject, ObjectId};
