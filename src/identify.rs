use crate::config::TileSize;
use embedded_graphics::{
    Drawable, Pixel,
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Point, Size},
    mono_font::{MonoTextStyle, ascii::FONT_4X6},
    pixelcolor::{Rgb888, RgbColor},
    text::{Baseline, Text},
};
use image::{Rgb, RgbImage};
use std::convert::Infallible;

const TINT_STEP: u32 = 30;
const TEXT_ORIGIN: Point = Point::new(2, 6);

/// Tile-sized canvas the mono font renders into. Pixels outside the tile
/// are clipped.
struct TileCanvas(RgbImage);

impl OriginDimensions for TileCanvas {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for TileCanvas {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0
                && coord.x < self.0.width() as i32
                && coord.y >= 0
                && coord.y < self.0.height() as i32
            {
                self.0.put_pixel(
                    coord.x as u32,
                    coord.y as u32,
                    Rgb([color.r(), color.g(), color.b()]),
                );
            }
        }
        Ok(())
    }
}

/// Position-derived tint for an identify tile: red fades with the row,
/// green with the column, 30 per cell, clamped at zero.
pub fn tint_for_cell(row: usize, col: usize) -> Rgb<u8> {
    let red = 255u32.saturating_sub(row as u32 * TINT_STEP) as u8;
    let green = 255u32.saturating_sub(col as u32 * TINT_STEP) as u8;
    Rgb([red, green, 0])
}

/// Render the identify tile for one panel: its serial number in the cell's
/// tint on black, so an operator can read position and wiring off the wall.
pub fn serial_tile(serial: u32, row: usize, col: usize, tile_size: TileSize) -> RgbImage {
    let tint = tint_for_cell(row, col);
    let mut canvas = TileCanvas(RgbImage::new(tile_size.width, tile_size.height));
    let style = MonoTextStyle::new(&FONT_4X6, Rgb888::new(tint[0], tint[1], tint[2]));
    let text = serial.to_string();
    Text::with_baseline(&text, TEXT_ORIGIN, style, Baseline::Top)
        .draw(&mut canvas)
        .expect("drawing into a tile cannot fail");
    canvas.0
}
