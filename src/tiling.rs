use crate::config::TileSize;
use fast_image_resize as fr;
use image::{RgbImage, imageops};
use log::warn;

/// How a source image is fitted to the wall's target rectangle before
/// partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Resize to exactly the target rectangle, distorting aspect ratio.
    #[default]
    Scale,
    /// Take the target rectangle from the top-left corner without resizing.
    /// Area outside the source stays black.
    Crop,
}

/// One tile image per grid cell, indexed `[row][col]` with rows running top
/// to bottom. Every tile is exactly the configured tile size.
#[derive(Debug, Clone)]
pub struct TileSet {
    tiles: Vec<Vec<RgbImage>>,
}

impl TileSet {
    /// Build a set from pre-rendered tiles, outermost vec indexed by row.
    pub fn from_rows(tiles: Vec<Vec<RgbImage>>) -> Self {
        Self { tiles }
    }

    pub fn rows(&self) -> usize {
        self.tiles.len()
    }

    pub fn cols(&self) -> usize {
        self.tiles.first().map_or(0, |row| row.len())
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&RgbImage> {
        self.tiles.get(row)?.get(col)
    }

    /// Row-major traversal, the order tiles are dispatched in.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &RgbImage)> {
        self.tiles.iter().enumerate().flat_map(|(row, cols)| {
            cols.iter()
                .enumerate()
                .map(move |(col, tile)| (row, col, tile))
        })
    }
}

/// Split a source image into a `cols` x `rows` grid of tile-sized images.
///
/// The source is first fitted to `tile_size.width * cols` by
/// `tile_size.height * rows` per the policy, then partitioned row-major
/// along tile boundaries. The grid is always exactly `rows` x `cols`.
pub fn tile_image(
    source: &RgbImage,
    tile_size: TileSize,
    cols: usize,
    rows: usize,
    policy: FitPolicy,
) -> TileSet {
    let target_width = tile_size.width * cols as u32;
    let target_height = tile_size.height * rows as u32;
    let fitted = fit_to_target(source, target_width, target_height, policy);

    let mut tiles = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut row_tiles = Vec::with_capacity(cols);
        for col in 0..cols {
            let tile = imageops::crop_imm(
                &fitted,
                col as u32 * tile_size.width,
                row as u32 * tile_size.height,
                tile_size.width,
                tile_size.height,
            )
            .to_image();
            row_tiles.push(tile);
        }
        tiles.push(row_tiles);
    }
    TileSet { tiles }
}

fn fit_to_target(source: &RgbImage, width: u32, height: u32, policy: FitPolicy) -> RgbImage {
    if source.dimensions() == (width, height) {
        return source.clone();
    }
    match policy {
        FitPolicy::Scale => match fast_resize_rgb(source, width, height) {
            Ok(resized) => resized,
            Err(e) => {
                warn!("Fast resize failed: {e}, falling back to slow resize");
                imageops::resize(source, width, height, imageops::FilterType::Lanczos3)
            }
        },
        FitPolicy::Crop => {
            let mut canvas = RgbImage::new(width, height);
            imageops::replace(&mut canvas, source, 0, 0);
            canvas
        }
    }
}

/// Fast resize using fast_image_resize crate for better performance
fn fast_resize_rgb(
    source: &RgbImage,
    new_width: u32,
    new_height: u32,
) -> Result<RgbImage, Box<dyn std::error::Error>> {
    let (src_width, src_height) = source.dimensions();

    let src_view = fr::Image::from_vec_u8(
        std::num::NonZeroU32::new(src_width).ok_or("Invalid width")?,
        std::num::NonZeroU32::new(src_height).ok_or("Invalid height")?,
        source.as_raw().clone(),
        fr::PixelType::U8x3,
    )?;

    let dst_width = std::num::NonZeroU32::new(new_width).ok_or("Invalid target width")?;
    let dst_height = std::num::NonZeroU32::new(new_height).ok_or("Invalid target height")?;
    let mut dst_image = fr::Image::new(dst_width, dst_height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3));
    resizer.resize(&src_view.view(), &mut dst_image.view_mut())?;

    RgbImage::from_raw(new_width, new_height, dst_image.into_vec())
        .ok_or_else(|| "Failed to rebuild resized buffer".into())
}
