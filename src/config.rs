use anyhow::{Context, Result, bail};
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Pixel dimensions of a single panel tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(u32, u32)")]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for TileSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl TileSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Raw RGB byte count of one tile, 3 interleaved channel bytes per pixel.
    pub fn rgb_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WallSettings {
    pub dimensions: TileSize,
}

/// One physical panel as listed in the inventory file.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelEntry {
    pub serial_number: u32,
    pub ipv6_link_local: String,
}

/// Parsed panel inventory: tile dimensions, known panels, and the grid
/// mapping of serial numbers to physical positions (rows top to bottom,
/// columns left to right).
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    pub settings: WallSettings,
    pub inventory: Vec<PanelEntry>,
    pub mapping: Vec<Vec<u32>>,
}

impl PanelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read panel inventory {path:?}"))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse panel inventory {path:?}"))?;
        config.check_shape()?;
        Ok(config)
    }

    /// Rejects grids the rest of the pipeline cannot address. Serial numbers
    /// missing from the inventory are only warned about here; the lookup
    /// failure itself surfaces at dispatch time.
    pub fn check_shape(&self) -> Result<()> {
        if self.mapping.is_empty() || self.mapping[0].is_empty() {
            bail!("Panel mapping is empty");
        }
        let cols = self.mapping[0].len();
        for (row, serials) in self.mapping.iter().enumerate() {
            if serials.len() != cols {
                bail!(
                    "Panel mapping is not rectangular: row 0 has {cols} columns, row {row} has {}",
                    serials.len()
                );
            }
        }
        for serial in self.mapping.iter().flatten() {
            if self.link_local_for(*serial).is_none() {
                warn!("Mapped panel {serial} is not in the inventory");
            }
        }
        Ok(())
    }

    pub fn tile_size(&self) -> TileSize {
        self.settings.dimensions
    }

    pub fn rows(&self) -> usize {
        self.mapping.len()
    }

    pub fn cols(&self) -> usize {
        self.mapping.first().map_or(0, |row| row.len())
    }

    pub fn serial_at(&self, row: usize, col: usize) -> Option<u32> {
        self.mapping.get(row)?.get(col).copied()
    }

    /// Row-major traversal of the mapping as `(row, col, serial)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        self.mapping.iter().enumerate().flat_map(|(row, serials)| {
            serials
                .iter()
                .enumerate()
                .map(move |(col, serial)| (row, col, *serial))
        })
    }

    /// Last occurrence wins when the inventory lists a serial twice.
    pub fn link_local_for(&self, serial: u32) -> Option<&str> {
        self.inventory
            .iter()
            .rev()
            .find(|panel| panel.serial_number == serial)
            .map(|panel| panel.ipv6_link_local.as_str())
    }
}
