//! Album assembly: a complete label -> image mapping composed into one grid.

use anyhow::{Context, Result};
use image::imageops;
use image::{Rgba, RgbaImage};
use indexmap::IndexMap;
use mane_contracts::payload::ImagePayload;

const CELL_PADDING: u32 = 16;
const BACKGROUND: Rgba<u8> = Rgba([245, 245, 245, 255]);

/// Composes every completed style image into a single grid, in catalog
/// order, left to right then top to bottom. Pure: input mapping in, one
/// image out.
pub fn compose_album(images: &IndexMap<String, ImagePayload>) -> Result<RgbaImage> {
    anyhow::ensure!(!images.is_empty(), "album needs at least one image");

    let mut decoded = Vec::with_capacity(images.len());
    for (label, payload) in images {
        let bytes = payload
            .decoded_bytes()
            .with_context(|| format!("decoding image for '{label}'"))?;
        let img = image::load_from_memory(&bytes)
            .with_context(|| format!("reading image for '{label}'"))?
            .to_rgba8();
        decoded.push(img);
    }

    let cell_width = decoded.iter().map(RgbaImage::width).max().unwrap_or(1);
    let cell_height = decoded.iter().map(RgbaImage::height).max().unwrap_or(1);
    let (columns, rows) = grid_shape(decoded.len());

    let canvas_width = columns as u32 * (cell_width + CELL_PADDING) + CELL_PADDING;
    let canvas_height = rows as u32 * (cell_height + CELL_PADDING) + CELL_PADDING;
    let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, BACKGROUND);

    for (index, img) in decoded.iter().enumerate() {
        let column = (index % columns) as u32;
        let row = (index / columns) as u32;
        // Center each image within its cell.
        let x = CELL_PADDING
            + column * (cell_width + CELL_PADDING)
            + (cell_width - img.width()) / 2;
        let y = CELL_PADDING
            + row * (cell_height + CELL_PADDING)
            + (cell_height - img.height()) / 2;
        imageops::overlay(&mut canvas, img, i64::from(x), i64::from(y));
    }

    Ok(canvas)
}

/// Near-square grid: columns grow first.
fn grid_shape(count: usize) -> (usize, usize) {
    let columns = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(columns.max(1));
    (columns.max(1), rows.max(1))
}
