// Infrastructure layer (shared components)
pub mod infrastructure;

// Re-export infrastructure modules for convenience
pub use infrastructure::config;
pub use infrastructure::crypto;
pub use infrastructure::error;
pub use infrastructure::mysql;

// Domain layer (gateway logic)
pub mod auth;
pub mod broker;
pub mod devicelog;
pub mod directory;
pub mod dispatch;
pub mod persistence;
pub mod session;

// Application layer
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
