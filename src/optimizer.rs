//! Frame-to-frame size optimization.
//!
//! Two independent, compatible reductions: shrinking a frame to the minimal
//! rectangle that changed since the previous frame, and substituting pixels
//! that kept their color with a reserved transparent index so runs of them
//! compress well. Pixel equality is decided on resolved RGB triples, never
//! on raw indices, since adjacent frames may use different color tables.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;

/// Rectangle within the logical screen that a frame actually redraws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

impl Window {
    pub(crate) fn full(width: u16, height: u16) -> Self {
        Window {
            left: 0,
            top: 0,
            width,
            height,
        }
    }
}

/// Resolves a palette index to its RGB triple.
///
/// Indices beyond the table resolve to black, matching the zero padding of
/// the on-wire color tables.
fn resolve(table: &[u8], index: u8) -> [u8; 3] {
    let at = usize::from(index) * 3;
    match table.get(at..at + 3) {
        Some(c) => [c[0], c[1], c[2]],
        None => [0, 0, 0],
    }
}

/// Finds the smallest rectangle containing every pixel whose resolved color
/// differs between the current and the previous frame.
///
/// Both buffers cover the full `width` x `height` screen. Identical frames
/// yield a 1x1 window at the origin; the format requires a non-empty image.
pub(crate) fn diff_window(
    cur: &[u8],
    bef: &[u8],
    cur_table: &[u8],
    bef_table: &[u8],
    width: u16,
    height: u16,
) -> Window {
    let same = |row: u16, col: u16| {
        let at = usize::from(row) * usize::from(width) + usize::from(col);
        resolve(cur_table, cur[at]) == resolve(bef_table, bef[at])
    };
    let row_same = |row: u16| (0..width).all(|col| same(row, col));
    let Some(top) = (0..height).find(|&row| !row_same(row)) else {
        return Window {
            left: 0,
            top: 0,
            width: 1,
            height: 1,
        };
    };
    let bottom = ((top + 1)..height)
        .rev()
        .find(|&row| !row_same(row))
        .unwrap_or(top);
    let col_changed = |col: u16| (top..=bottom).any(|row| !same(row, col));
    let left = (0..width).find(|&col| col_changed(col)).unwrap_or(0);
    let right = ((left + 1)..width)
        .rev()
        .find(|&col| col_changed(col))
        .unwrap_or(left);
    Window {
        left,
        top,
        width: right + 1 - left,
        height: bottom + 1 - top,
    }
}

/// Copies the pixels of `window` out of a full-screen buffer.
pub(crate) fn crop(
    buffer: &[u8],
    screen_width: u16,
    window: &Window,
) -> Result<Vec<u8>, TryReserveError> {
    let w = usize::from(window.width);
    let mut out = Vec::new();
    out.try_reserve_exact(w * usize::from(window.height))?;
    for row in 0..usize::from(window.height) {
        let start = (usize::from(window.top) + row) * usize::from(screen_width)
            + usize::from(window.left);
        out.extend_from_slice(&buffer[start..start + w]);
    }
    Ok(out)
}

/// Rewrites every pixel of the window-sized buffer whose resolved color
/// equals the previous frame's pixel at the same screen position to the
/// reserved transparent index.
pub(crate) fn apply_transparency(
    pixels: &mut [u8],
    bef: &[u8],
    window: &Window,
    screen_width: u16,
    transparent_index: u8,
    cur_table: &[u8],
    bef_table: &[u8],
) {
    for row in 0..usize::from(window.height) {
        let bef_start = (usize::from(window.top) + row) * usize::from(screen_width)
            + usize::from(window.left);
        for col in 0..usize::from(window.width) {
            let at = row * usize::from(window.width) + col;
            if resolve(cur_table, pixels[at]) == resolve(bef_table, bef[bef_start + col]) {
                pixels[at] = transparent_index;
            }
        }
    }
}

/// Picks the reserved transparent index for a palette with `entries` colors.
///
/// When the palette exactly fills the current code space, the code length
/// grows by one bit to make room. The returned index is the last slot of the
/// (possibly grown) initial dictionary: never a valid color index, never
/// above 255. Callers must not ask for an index when the palette already
/// uses all 256 entries.
pub(crate) fn reserve_transparent_index(init_code_len: u8, entries: u16) -> (u8, u8) {
    let mut code_len = init_code_len;
    let mut dict_len = 1u16 << (code_len - 1);
    if dict_len == entries {
        code_len += 1;
        dict_len <<= 1;
    }
    (code_len, (dict_len - 1) as u8)
}

#[cfg(test)]
const GRAY_4: &[u8] = &[0, 0, 0, 85, 85, 85, 170, 170, 170, 255, 255, 255];

#[test]
fn window_contains_all_changes() {
    let bef = [0u8; 36];
    let mut cur = [0u8; 36];
    // changes at (1,2) and (3,4) in a 6x6 screen
    cur[1 * 6 + 2] = 1;
    cur[3 * 6 + 4] = 2;
    let win = diff_window(&cur, &bef, GRAY_4, GRAY_4, 6, 6);
    assert_eq!(
        win,
        Window {
            left: 2,
            top: 1,
            width: 3,
            height: 3
        }
    );
}

#[test]
fn identical_frames_fall_back_to_single_pixel() {
    let screen = [3u8; 24];
    let win = diff_window(&screen, &screen, GRAY_4, GRAY_4, 6, 4);
    assert_eq!(
        win,
        Window {
            left: 0,
            top: 0,
            width: 1,
            height: 1
        }
    );
}

#[test]
fn single_changed_pixel_yields_unit_window() {
    let bef = [0u8; 4];
    let mut cur = [0u8; 4];
    cur[3] = 1;
    let win = diff_window(&cur, &bef, GRAY_4, GRAY_4, 2, 2);
    assert_eq!(
        win,
        Window {
            left: 1,
            top: 1,
            width: 1,
            height: 1
        }
    );
}

#[test]
fn equality_follows_resolved_colors_not_indices() {
    // the same gray lives at index 1 in one table and index 2 in the other
    let cur_table = &[0, 0, 0, 9, 9, 9, 85, 85, 85][..];
    let bef_table = &[0, 0, 0, 85, 85, 85, 9, 9, 9][..];
    let bef = [1u8, 2, 0, 0];
    let cur = [2u8, 1, 0, 0];
    let win = diff_window(&cur, &bef, cur_table, bef_table, 2, 2);
    assert_eq!(win.width, 1);
    assert_eq!(win.height, 1);
}

#[test]
fn crop_copies_window_rows() {
    #[rustfmt::skip]
    let screen = [
        0, 1, 2, 3,
        4, 5, 6, 7,
        8, 9, 10, 11,
    ];
    let window = Window {
        left: 1,
        top: 1,
        width: 2,
        height: 2,
    };
    assert_eq!(crop(&screen, 4, &window).unwrap(), vec![5, 6, 9, 10]);
}

#[test]
fn transparency_marks_unchanged_pixels_only() {
    let bef = [0u8, 0, 0, 0];
    let mut cur = [0u8, 1, 0, 1];
    let window = Window::full(2, 2);
    apply_transparency(&mut cur, &bef, &window, 2, 7, GRAY_4, GRAY_4);
    assert_eq!(cur, [7, 1, 7, 1]);
}

#[test]
fn transparency_against_itself_clears_everything() {
    let bef = [0u8, 1, 2, 3, 2, 1];
    let mut cur = bef;
    let window = Window::full(3, 2);
    apply_transparency(&mut cur, &bef, &window, 3, 7, GRAY_4, GRAY_4);
    assert_eq!(cur, [7; 6]);
}

#[test]
fn reserved_index_stays_out_of_the_palette() {
    // palette fills the code space: one more bit is needed
    assert_eq!(reserve_transparent_index(3, 4), (4, 7));
    assert_eq!(reserve_transparent_index(8, 128), (9, 255));
    // spare slots available: the code length stays
    assert_eq!(reserve_transparent_index(4, 5), (4, 7));
    assert_eq!(reserve_transparent_index(9, 255), (9, 255));
}
