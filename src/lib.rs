pub mod cache;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod identify;
pub mod resolver;
pub mod tiling;
pub mod transport;
pub mod wall;

// Re-export the pieces a driver needs
pub use config::{PanelConfig, TileSize};
pub use wall::{PanelWall, SendPolicy};
