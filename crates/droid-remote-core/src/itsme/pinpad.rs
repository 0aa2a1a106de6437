//! Pinpad geometry.
//!
//! The itsme pinpad is a single image view without per-key elements, so key
//! positions are derived from the pad rectangle and the known layout.
//!
//! Derivation happens in two stages:
//!
//! 1. [`locate_pad`]: the image view keeps a 3:4 aspect ratio but may be
//!    larger than the drawn pad. The true pad is the largest 3:4 rectangle
//!    that fits, re-centered on the image center.
//! 2. [`symbol_center`]: symbol size follows from the pad height, the row
//!    count and the gap ratio; each key center is its top-left plus half a
//!    symbol.

use crate::geometry::{saturate, Bounds, GeometryError, Point};

/// Key layout, row by row. `<` is backspace, `>` submits.
pub const PINPAD_LAYOUT: [[char; 3]; 4] = [
    ['1', '2', '3'],
    ['4', '5', '6'],
    ['7', '8', '9'],
    ['<', '0', '>'],
];

/// Gap between keys as a fraction of the key size. Independent of the device.
pub const PINPAD_GAP_RATIO: f64 = 0.5;

/// Symbol tapped after the digits to submit the PIN.
pub const SUBMIT_SYMBOL: char = '>';

const ROWS: usize = PINPAD_LAYOUT.len();
const COLS: usize = PINPAD_LAYOUT[0].len();

/// Recompute the true pad rectangle from the (possibly oversized) image bounds.
#[must_use]
pub fn locate_pad(image: Bounds) -> Bounds {
    let symbol_width = (image.width() / COLS as i64).min(image.height() / ROWS as i64);
    let half_width = symbol_width * COLS as i64 / 2;
    let half_height = symbol_width * ROWS as i64 / 2;
    let center = image.center();
    let (cx, cy) = (i64::from(center.x), i64::from(center.y));
    Bounds::from_corners(
        saturate(cx - half_width),
        saturate(cy - half_height),
        saturate(cx + half_width),
        saturate(cy + half_height),
    )
}

/// Edge length of one key.
pub fn symbol_size(pad: &Bounds) -> f64 {
    let gaps = (ROWS - 1) as f64;
    pad.height() as f64 / (ROWS as f64 + gaps * PINPAD_GAP_RATIO)
}

pub fn gap_size(pad: &Bounds) -> f64 {
    symbol_size(pad) * PINPAD_GAP_RATIO
}

/// Row and column of a symbol in [`PINPAD_LAYOUT`].
pub fn symbol_position(symbol: char) -> Result<(usize, usize), GeometryError> {
    PINPAD_LAYOUT
        .iter()
        .enumerate()
        .find_map(|(row, keys)| keys.iter().position(|&k| k == symbol).map(|col| (row, col)))
        .ok_or(GeometryError::SymbolNotFound(symbol))
}

/// Tap target for a symbol on a pad whose true bounds are `pad`.
pub fn symbol_center(pad: &Bounds, symbol: char) -> Result<Point, GeometryError> {
    let (row, col) = symbol_position(symbol)?;
    let size = symbol_size(pad);
    let step = size + gap_size(pad);
    let half = (size / 2.0).floor();
    let left = f64::from(pad.x_min()) + col as f64 * step;
    let top = f64::from(pad.y_min()) + row as f64 * step;
    Ok(Point::new((left + half).floor() as i32, (top + half).floor() as i32))
}
