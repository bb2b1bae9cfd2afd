//! # Streaming gif encoder
//!
//! The encoder writes the stream head eagerly but holds incoming frames in a
//! short lookahead queue: how a frame must be disposed of depends on its
//! successor, so a frame is serialized once the next one is queued, or when
//! the stream is finished.

use alloc::collections::{TryReserveError, VecDeque};
use alloc::fmt;
use alloc::vec::Vec;

use crate::common::{Block, DisposalMethod, Extension, Frame};
use crate::io::{self, Write};
use crate::lzw;
use crate::optimizer::{self, Window};
use crate::traits::WriteBytesExt;

/// Number of frames the encoder may hold besides the already written
/// reference frame. A frame is only final once its successor is known.
const QUEUE_LOOKAHEAD: usize = 2;

/// The image has incorrect properties, making it impossible to encode as a gif.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EncodingFormatError {
    /// The image has too many colors.
    TooManyColors,
    /// The image has no color palette which is required.
    MissingColorPalette,
    /// The logical screen has zero width or height.
    ZeroSizedImage,
    /// The stream was finished without a single frame; a GIF must contain
    /// at least one.
    NoFrames,
}

impl core::error::Error for EncodingFormatError {}
impl fmt::Display for EncodingFormatError {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyColors => write!(fmt, "the image has too many colors"),
            Self::MissingColorPalette => write!(
                fmt,
                "the GIF format requires a color palette but none was given"
            ),
            Self::ZeroSizedImage => write!(fmt, "the image has zero width or height"),
            Self::NoFrames => write!(fmt, "a GIF must contain at least one frame"),
        }
    }
}

/// Encoding error.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EncodingError {
    /// Frame buffer is too small for the declared dimensions.
    FrameBufferTooSmallForDimensions,
    /// Failed to internally allocate a buffer of sufficient size.
    OutOfMemory,
    /// A pixel value exceeds the size of the active color dictionary; the
    /// palette has fewer entries than the image data references.
    IndexOutOfBounds,
    /// Expected a writer but none found.
    WriterNotFound,
    /// Returned if the to image is not encodable as a gif.
    Format(EncodingFormatError),
    /// Wraps an I/O error raised while writing.
    Io(io::IoError),
    /// Wraps an I/O error raised while finalizing the stream.
    Close(io::IoError),
}

impl fmt::Display for EncodingError {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameBufferTooSmallForDimensions => {
                fmt.write_str("Frame Buffer Too Small for Dimensions")
            }
            Self::OutOfMemory => fmt.write_str("Out of Memory"),
            Self::IndexOutOfBounds => fmt.write_str("Pixel Index Outside of Palette"),
            Self::WriterNotFound => fmt.write_str("Writer Not Found"),
            Self::Io(err) => err.fmt(fmt),
            Self::Close(err) => err.fmt(fmt),
            Self::Format(err) => err.fmt(fmt),
        }
    }
}

impl core::error::Error for EncodingError {
    #[cold]
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::FrameBufferTooSmallForDimensions => None,
            Self::OutOfMemory => None,
            Self::IndexOutOfBounds => None,
            Self::WriterNotFound => None,
            Self::Io(err) => Some(err),
            Self::Close(err) => Some(err),
            Self::Format(err) => Some(err),
        }
    }
}

impl From<io::IoError> for EncodingError {
    #[cold]
    fn from(err: io::IoError) -> Self {
        Self::Io(err)
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for EncodingError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Self::Io(io::IoError::from(err))
    }
}

impl From<EncodingFormatError> for EncodingError {
    #[cold]
    fn from(err: EncodingFormatError) -> Self {
        Self::Format(err)
    }
}

impl From<TryReserveError> for EncodingError {
    #[cold]
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<lzw::IndexError> for EncodingError {
    #[cold]
    fn from(_: lzw::IndexError) -> Self {
        Self::IndexOutOfBounds
    }
}

/// Number of repetitions
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Repeat {
    /// Finite number of repetitions
    Finite(u16),
    /// Infinite number of repetitions
    Infinite,
}

impl Default for Repeat {
    fn default() -> Self {
        Self::Finite(0)
    }
}

/// Extension data.
#[non_exhaustive]
pub enum ExtensionData {
    /// Control extension. Use `ExtensionData::new_control_ext` to construct.
    Control {
        /// Flags.
        flags: u8,
        /// Frame delay.
        delay: u16,
        /// Transparent index.
        trns: u8,
    },
    /// Sets the number of repetitions
    Repetitions(Repeat),
}

impl ExtensionData {
    /// Constructor for control extension data.
    ///
    /// `delay` is given in units of 10 ms.
    #[must_use]
    pub fn new_control_ext(delay: u16, dispose: DisposalMethod, trns: Option<u8>) -> Self {
        let mut flags = 0;
        let trns = match trns {
            Some(trns) => {
                flags |= 1;
                trns
            }
            None => 0,
        };
        flags |= (dispose as u8) << 2;
        Self::Control { flags, delay, trns }
    }
}

/// Deep copy of a frame waiting in the lookahead queue.
struct QueuedFrame {
    delay: u16,
    dispose: DisposalMethod,
    transparent: Option<u8>,
    palette: Option<Vec<u8>>,
    buffer: Vec<u8>,
    diff_window: bool,
    diff_transparency: bool,
}

/// Unmodified buffer and palette of the last written frame, retained as the
/// reference the next frame is diffed against.
struct Reference {
    buffer: Vec<u8>,
    palette: Option<Vec<u8>>,
}

/// GIF encoder.
pub struct Encoder<W: Write> {
    w: Option<W>,
    width: u16,
    height: u16,
    global_palette: Vec<u8>,
    transparency: bool,
    state: Result<(), EncodingError>,
    queue: VecDeque<QueuedFrame>,
    prev: Option<Reference>,
    buffer: Vec<u8>,
}

impl<W: Write> Encoder<W> {
    /// Creates a new encoder and writes the logical screen descriptor.
    ///
    /// `global_palette` gives the global color palette in the format
    /// `[r, g, b, ...]`; if no global palette shall be used an empty slice
    /// may be supplied, in which case every frame needs a local palette.
    pub fn new(
        w: W,
        width: u16,
        height: u16,
        global_palette: &[u8],
    ) -> Result<Self, EncodingError> {
        if width == 0 || height == 0 {
            return Err(EncodingError::from(EncodingFormatError::ZeroSizedImage));
        }
        Self {
            w: Some(w),
            width,
            height,
            global_palette: Vec::new(),
            transparency: false,
            state: Ok(()),
            queue: VecDeque::with_capacity(QUEUE_LOOKAHEAD),
            prev: None,
            buffer: Vec::new(),
        }
        .write_global_palette(global_palette)
    }

    /// Write an extension block that signals a repeat behaviour.
    ///
    /// Must be called before the first frame is added.
    pub fn set_repeat(&mut self, repeat: Repeat) -> Result<(), EncodingError> {
        self.check_latched()?;
        let r = self.write_extension(ExtensionData::Repetitions(repeat));
        self.latch(r)
    }

    /// Declares that palette index 0 is a user-managed transparent color for
    /// the whole stream.
    ///
    /// Every frame followed by another one is then emitted with a
    /// restore-to-background disposal, so the transparent holes of the
    /// successor expose the background instead of stale pixels, and the
    /// per-frame size optimizations are disabled. Must be set before frames
    /// are added.
    pub fn set_transparency(&mut self, transparency: bool) {
        self.transparency = transparency;
    }

    /// Writes the global color palette.
    fn write_global_palette(mut self, palette: &[u8]) -> Result<Self, EncodingError> {
        let (palette, padding, table_size) = Self::check_color_table(palette)?;
        self.global_palette = palette.to_vec();
        let mut flags = 0;
        if !palette.is_empty() {
            flags |= 0b1000_0000; // global color table is present
            flags |= table_size;
        }
        self.write_screen_desc(flags)?;
        if !palette.is_empty() {
            Self::write_color_table(self.writer()?, palette, padding)?;
        }
        Ok(self)
    }

    /// Queues a frame for encoding.
    ///
    /// The frame is deep-copied; the buffers behind `frame` only need to
    /// outlive this call. Actual serialization happens once the following
    /// frame is queued, or on [`Encoder::finish`]. The first error
    /// encountered is latched: every later call returns it without touching
    /// the underlying writer again.
    pub fn add_frame(&mut self, frame: &Frame<'_>) -> Result<(), EncodingError> {
        self.check_latched()?;
        let r = self.queue_frame(frame);
        self.latch(r)
    }

    fn queue_frame(&mut self, frame: &Frame<'_>) -> Result<(), EncodingError> {
        let size = usize::from(self.width) * usize::from(self.height);
        if frame.buffer.len() < size {
            return Err(EncodingError::FrameBufferTooSmallForDimensions);
        }
        if let Some(palette) = &frame.palette {
            Self::check_color_table(palette)?;
        } else if self.global_palette.is_empty() {
            return Err(EncodingError::from(
                EncodingFormatError::MissingColorPalette,
            ));
        }
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(size)?;
        buffer.extend_from_slice(&frame.buffer[..size]);
        let palette = match &frame.palette {
            Some(p) => {
                let len = (p.len() / 3) * 3;
                let mut table = Vec::new();
                table.try_reserve_exact(len)?;
                table.extend_from_slice(&p[..len]);
                Some(table)
            }
            None => None,
        };
        if self.queue.len() == QUEUE_LOOKAHEAD {
            self.flush_oldest()?;
        }
        self.queue.push_back(QueuedFrame {
            delay: frame.delay,
            dispose: frame.dispose,
            transparent: frame.transparent,
            palette,
            buffer,
            diff_window: frame.diff_window,
            diff_transparency: frame.diff_transparency,
        });
        Ok(())
    }

    /// Serializes the oldest queued frame; its successor, if any, is at the
    /// front of the queue afterwards.
    fn flush_oldest(&mut self) -> Result<(), EncodingError> {
        if let Some(frame) = self.queue.pop_front() {
            let successor_transparent = self
                .queue
                .front()
                .map(|next| self.transparency || next.transparent.is_some());
            self.flush_frame(frame, successor_transparent)?;
        }
        Ok(())
    }

    fn flush_frame(
        &mut self,
        frame: QueuedFrame,
        successor_transparent: Option<bool>,
    ) -> Result<(), EncodingError> {
        let QueuedFrame {
            delay,
            dispose,
            transparent,
            palette,
            buffer,
            diff_window,
            diff_transparency,
        } = frame;
        let prev = self.prev.take();
        let active_palette: &[u8] = palette.as_deref().unwrap_or(&self.global_palette);
        let entries = (active_palette.len() / 3) as u16;
        let user_transparency = self.transparency || transparent.is_some();
        let restore_background = successor_transparent == Some(true);
        // A frame below a transparent successor must cover the whole screen:
        // only then does its restore-to-background disposal leave a clean
        // canvas behind. The remaining conditions disable the optimizations
        // for the first frame, for frames carrying user transparency, and
        // for full palettes without a spare slot.
        let optimize = !user_transparency && entries < 256 && !restore_background;

        let mut code_len = lzw::initial_code_len(entries);
        let mut window = Window::full(self.width, self.height);
        let mut gce_transparent = if self.transparency {
            Some(0)
        } else {
            transparent
        };
        let mut window_pixels: Option<Vec<u8>> = None;
        if let (true, Some(prev)) = (optimize, &prev) {
            let prev_palette: &[u8] = prev.palette.as_deref().unwrap_or(&self.global_palette);
            if diff_window {
                window = optimizer::diff_window(
                    &buffer,
                    &prev.buffer,
                    active_palette,
                    prev_palette,
                    self.width,
                    self.height,
                );
            }
            if diff_transparency {
                let (grown, index) = optimizer::reserve_transparent_index(code_len, entries);
                code_len = grown;
                gce_transparent = Some(index);
                let mut pixels = optimizer::crop(&buffer, self.width, &window)?;
                optimizer::apply_transparency(
                    &mut pixels,
                    &prev.buffer,
                    &window,
                    self.width,
                    index,
                    active_palette,
                    prev_palette,
                );
                window_pixels = Some(pixels);
            } else if diff_window {
                window_pixels = Some(optimizer::crop(&buffer, self.width, &window)?);
            }
        }
        let raster: &[u8] = window_pixels.as_deref().unwrap_or(&buffer);

        // compress before anything of this frame reaches the writer, so a
        // bad pixel index leaves no partial frame behind
        self.buffer.clear();
        self.buffer.try_reserve(raster.len() / 4 + 1)?;
        self.buffer.push(code_len - 1); // minimum code size
        lzw::compress(raster, code_len, &mut self.buffer)?;

        let dispose = if restore_background {
            DisposalMethod::Background
        } else {
            dispose
        };
        self.write_extension(ExtensionData::new_control_ext(
            delay,
            dispose,
            gce_transparent,
        ))?;
        let mut flags = 0;
        let table = match &palette {
            Some(local) => {
                flags |= 0b1000_0000;
                let (table, padding, table_size) = Self::check_color_table(local)?;
                flags |= table_size;
                Some((table, padding))
            }
            None => None,
        };
        let writer = self.w.as_mut().ok_or(EncodingError::WriterNotFound)?;
        writer.write_le(Block::Image as u8)?;
        writer.write_le(window.left)?;
        writer.write_le(window.top)?;
        writer.write_le(window.width)?;
        writer.write_le(window.height)?;
        writer.write_le(flags)?;
        if let Some((table, padding)) = table {
            Self::write_color_table(writer, table, padding)?;
        }
        Self::write_encoded_image_block(writer, &self.buffer)?;

        // the unmodified full-screen buffer becomes the next diff reference;
        // the previous one is released here
        self.prev = Some(Reference { buffer, palette });
        Ok(())
    }

    fn write_encoded_image_block(
        writer: &mut W,
        data_with_min_code_size: &[u8],
    ) -> Result<(), EncodingError> {
        let (&min_code_size, data) = data_with_min_code_size.split_first().unwrap_or((&2, &[]));
        writer.write_le(min_code_size)?;

        let mut iter = data.chunks_exact(0xFF);
        for full_block in iter.by_ref() {
            writer.write_le(0xFFu8)?;
            writer.write_all(full_block)?;
        }
        let last_block = iter.remainder();
        if !last_block.is_empty() {
            writer.write_le(last_block.len() as u8)?;
            writer.write_all(last_block)?;
        }
        writer.write_le(0u8)?;
        Ok(())
    }

    fn write_color_table(
        writer: &mut W,
        table: &[u8],
        padding: usize,
    ) -> Result<(), EncodingError> {
        writer.write_all(table)?;
        for _ in 0..padding {
            writer.write_all(&[0, 0, 0])?;
        }
        Ok(())
    }

    fn check_color_table(table: &[u8]) -> Result<(&[u8], usize, u8), EncodingError> {
        let num_colors = table.len() / 3;
        if num_colors > 256 {
            return Err(EncodingError::from(EncodingFormatError::TooManyColors));
        }
        let table_size = flag_size(num_colors);
        let padding = (2 << table_size) - num_colors;
        Ok((&table[..num_colors * 3], padding, table_size))
    }

    /// Writes an extension to the image.
    ///
    /// It is normally not necessary to call this method manually; extensions
    /// must be written before the first frame is added.
    pub fn write_extension(&mut self, extension: ExtensionData) -> Result<(), EncodingError> {
        use self::ExtensionData::*;
        if let Repetitions(Repeat::Finite(0)) = extension {
            return Ok(());
        }
        let writer = self.writer()?;
        writer.write_le(Block::Extension as u8)?;
        match extension {
            Control { flags, delay, trns } => {
                writer.write_le(Extension::Control as u8)?;
                writer.write_le(4u8)?;
                writer.write_le(flags)?;
                writer.write_le(delay)?;
                writer.write_le(trns)?;
            }
            Repetitions(repeat) => {
                writer.write_le(Extension::Application as u8)?;
                writer.write_le(11u8)?;
                writer.write_all(b"NETSCAPE2.0")?;
                writer.write_le(3u8)?;
                writer.write_le(1u8)?;
                writer.write_le(match repeat {
                    Repeat::Finite(no) => no,
                    Repeat::Infinite => 0u16,
                })?;
            }
        }
        writer.write_le(0u8)?;
        Ok(())
    }

    fn write_screen_desc(&mut self, flags: u8) -> Result<(), EncodingError> {
        let width = self.width;
        let height = self.height;
        let writer = self.writer()?;
        writer.write_all(b"GIF89a")?;
        writer.write_le(width)?;
        writer.write_le(height)?;
        writer.write_le(flags)?;
        writer.write_le(0u8)?; // background color index
        writer.write_le(0u8)?; // pixel aspect ratio
        Ok(())
    }

    /// Gets a reference to the writer instance used by this encoder.
    pub fn get_ref(&self) -> &W {
        self.w.as_ref().unwrap()
    }

    /// Gets a mutable reference to the writer instance used by this encoder.
    ///
    /// It is inadvisable to directly write to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        self.w.as_mut().unwrap()
    }

    /// Flushes all queued frames, writes the stream trailer and returns the
    /// `io::Write` instance used by this encoder.
    ///
    /// A stream without a single frame is an error. When an earlier error is
    /// latched, buffered frame data is still released before that error is
    /// returned.
    pub fn finish(mut self) -> Result<W, EncodingError> {
        let r = self.close();
        let w = self.w.take();
        r?;
        w.ok_or(EncodingError::WriterNotFound)
    }

    fn close(&mut self) -> Result<(), EncodingError> {
        if self.state.is_ok() {
            let r = self.flush_remaining();
            let _ = self.latch(r);
        }
        // buffered frame data is released regardless of the latched state
        self.queue.clear();
        self.prev = None;
        self.state.clone()
    }

    fn flush_remaining(&mut self) -> Result<(), EncodingError> {
        while !self.queue.is_empty() {
            self.flush_oldest()?;
        }
        if self.prev.is_none() {
            return Err(EncodingError::from(EncodingFormatError::NoFrames));
        }
        self.write_trailer()?;
        if let Some(w) = self.w.as_mut() {
            io::Write::flush(w).map_err(EncodingError::Close)?;
        }
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), EncodingError> {
        self.writer()?.write_le(Block::Trailer as u8)?;
        Ok(())
    }

    #[inline]
    fn writer(&mut self) -> Result<&mut W, EncodingError> {
        self.w.as_mut().ok_or(EncodingError::WriterNotFound)
    }

    fn check_latched(&self) -> Result<(), EncodingError> {
        self.state.clone()
    }

    fn latch<T>(&mut self, r: Result<T, EncodingError>) -> Result<T, EncodingError> {
        if let Err(err) = &r {
            self.state = Err(err.clone());
        }
        r
    }
}

impl<W: Write> Drop for Encoder<W> {
    #[cfg(feature = "raii_no_panic")]
    fn drop(&mut self) {
        if self.w.is_some() {
            let _ = self.close();
        }
    }

    #[cfg(not(feature = "raii_no_panic"))]
    fn drop(&mut self) {
        if self.w.is_some() {
            self.close().unwrap();
        }
    }
}

// Color table size converted to flag bits
fn flag_size(size: usize) -> u8 {
    (size.clamp(2, 255).next_power_of_two().trailing_zeros() - 1) as u8
}

#[test]
fn test_flag_size() {
    #[rustfmt::skip]
    fn expected(size: usize) -> u8 {
        match size {
            0  ..=2   => 0,
            3  ..=4   => 1,
            5  ..=8   => 2,
            9  ..=16  => 3,
            17 ..=32  => 4,
            33 ..=64  => 5,
            65 ..=128 => 6,
            129..=256 => 7,
            _ => 7
        }
    }

    for i in 0..300 {
        assert_eq!(flag_size(i), expected(i));
    }
}

#[test]
fn error_cast() {
    use alloc::boxed::Box;
    let _: Box<dyn core::error::Error> =
        EncodingError::from(EncodingFormatError::MissingColorPalette).into();
}

#[test]
fn frames_stay_queued_until_successor_is_known() {
    let palette = &[0, 0, 0, 0xFF, 0xFF, 0xFF];
    let mut encoder = Encoder::new(Vec::new(), 4, 4, palette).unwrap();
    let head_len = encoder.get_ref().len();

    let frame = Frame::from_indexed_pixels(vec![0u8; 16]);
    encoder.add_frame(&frame).unwrap();
    encoder.add_frame(&frame).unwrap();
    // two frames fit into the lookahead window; nothing flushed yet
    assert_eq!(encoder.get_ref().len(), head_len);
    encoder.add_frame(&frame).unwrap();
    // the third frame forces the first one out
    assert!(encoder.get_ref().len() > head_len);

    let out = encoder.finish().unwrap();
    assert_eq!(out.last(), Some(&0x3B));
}

#[test]
fn zero_sized_screen_is_rejected() {
    let palette = &[0, 0, 0, 0xFF, 0xFF, 0xFF];
    assert!(matches!(
        Encoder::new(Vec::new(), 4, 0, palette),
        Err(EncodingError::Format(EncodingFormatError::ZeroSizedImage))
    ));
}

#[test]
fn finishing_without_frames_is_an_error() {
    let palette = &[0, 0, 0, 0xFF, 0xFF, 0xFF];
    let encoder = Encoder::new(Vec::new(), 2, 2, palette).unwrap();
    assert!(matches!(
        encoder.finish(),
        Err(EncodingError::Format(EncodingFormatError::NoFrames))
    ));
}
