//! Common value types shared between the public API and the encoder.

use alloc::borrow::Cow;

/// Disposal method, i.e. how a frame's area is treated before the next frame
/// is drawn.
///
/// The encoder may override a frame's disposal method: when the following
/// frame carries user-managed transparency, the current frame is emitted with
/// [`DisposalMethod::Background`] so that the transparent holes of the
/// successor expose a clean canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DisposalMethod {
    /// Decoder is not required to take any action.
    Any = 0,
    /// Do not dispose.
    #[default]
    Keep = 1,
    /// Restore to background color.
    Background = 2,
    /// Restore to previous.
    Previous = 3,
}

impl DisposalMethod {
    /// Converts `u8` to `Option<Self>`
    #[must_use]
    pub fn from_u8(n: u8) -> Option<DisposalMethod> {
        match n {
            0 => Some(DisposalMethod::Any),
            1 => Some(DisposalMethod::Keep),
            2 => Some(DisposalMethod::Background),
            3 => Some(DisposalMethod::Previous),
            _ => None,
        }
    }
}

/// Known GIF block labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Block {
    /// Image block.
    Image = 0x2C,
    /// Extension block.
    Extension = 0x21,
    /// Image trailer.
    Trailer = 0x3B,
}

/// Known GIF extension labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Extension {
    /// Control extension.
    Control = 0xF9,
    /// Application extension.
    Application = 0xFF,
}

/// A GIF frame covering the full logical screen.
///
/// The `buffer` holds `width * height` palette indices in row-major order,
/// where `width` and `height` are the dimensions the [`Encoder`] was created
/// with. The encoder deep-copies every frame on [`Encoder::add_frame`]; the
/// borrowed buffers only need to live for the duration of that call.
///
/// [`Encoder`]: crate::Encoder
/// [`Encoder::add_frame`]: crate::Encoder::add_frame
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    /// Frame delay in units of 10 ms.
    pub delay: u16,
    /// Requested disposal method; may be overridden by the encoder (see
    /// [`DisposalMethod`]).
    pub dispose: DisposalMethod,
    /// User-managed transparent color index within the active palette.
    ///
    /// Setting this disables the size optimizations for the frame and makes
    /// the preceding frame restore the background before this one is drawn.
    pub transparent: Option<u8>,
    /// Local color table in the format `[r, g, b, ...]`. When `None`, the
    /// global color table applies.
    pub palette: Option<Cow<'a, [u8]>>,
    /// Palette indices, one byte per pixel.
    pub buffer: Cow<'a, [u8]>,
    /// Encode only the rectangle that changed since the previous frame.
    pub diff_window: bool,
    /// Replace pixels unchanged since the previous frame with a reserved
    /// transparent index, so that runs of them compress well.
    ///
    /// The reserved index lies beyond the active palette; the encoder grows
    /// the initial code length by one bit if the palette leaves no spare
    /// slot, and skips the optimization entirely for a full 256-entry
    /// palette.
    pub diff_transparency: bool,
}

impl Default for Frame<'_> {
    fn default() -> Self {
        Frame {
            delay: 0,
            dispose: DisposalMethod::default(),
            transparent: None,
            palette: None,
            buffer: Cow::Borrowed(&[]),
            diff_window: false,
            diff_transparency: false,
        }
    }
}

impl<'a> Frame<'a> {
    /// Creates a frame from a full-screen buffer of palette indices.
    #[must_use]
    pub fn from_indexed_pixels(pixels: impl Into<Cow<'a, [u8]>>) -> Self {
        Frame {
            buffer: pixels.into(),
            ..Frame::default()
        }
    }
}
