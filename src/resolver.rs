use crate::config::PanelConfig;
use crate::transport::{PanelDestination, Transport};
use anyhow::Result;
use thiserror::Error;

/// Lookup failures while turning a grid position into a panel destination.
/// These are configuration faults and abort the dispatch that hit them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Grid cell ({row}, {col}) is outside the {rows}x{cols} panel mapping")]
    OutOfGrid {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Panel {serial} at row {row}, column {col} is not in the inventory")]
    UnknownSerial { serial: u32, row: usize, col: usize },
}

/// Resolve the panel at `(row, col)`: mapping gives the serial number, the
/// inventory gives its link-local address, the transport turns that into a
/// destination handle. Rewiring the wall only ever means editing the
/// mapping table.
pub fn resolve_cell<T: Transport + ?Sized>(
    config: &PanelConfig,
    transport: &T,
    row: usize,
    col: usize,
) -> Result<PanelDestination> {
    let serial = config.serial_at(row, col).ok_or(ResolveError::OutOfGrid {
        row,
        col,
        rows: config.rows(),
        cols: config.cols(),
    })?;
    let link_local = config
        .link_local_for(serial)
        .ok_or(ResolveError::UnknownSerial { serial, row, col })?;
    transport.resolve_destination(link_local)
}
