//! End-to-end tests: encode streams, walk the produced bytes block by block
//! and decode the raster data back with a reference LZW decoder.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use gifenc::{DisposalMethod, Encoder, EncodingError, EncodingFormatError, Frame, Repeat};

// ---------------------------------------------------------------------------
// test sinks
// ---------------------------------------------------------------------------

/// Sink that keeps its buffer reachable after the encoder consumed it.
#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl std::io::Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Sink that accepts a fixed number of bytes and fails afterwards, counting
/// every attempted write.
#[derive(Clone)]
struct FailAfter {
    budget: Rc<RefCell<isize>>,
    calls: Rc<RefCell<usize>>,
}

impl FailAfter {
    fn new(budget: usize) -> Self {
        FailAfter {
            budget: Rc::new(RefCell::new(budget as isize)),
            calls: Rc::new(RefCell::new(0)),
        }
    }
}

impl std::io::Write for FailAfter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        *self.calls.borrow_mut() += 1;
        let mut budget = self.budget.borrow_mut();
        if *budget < buf.len() as isize {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        *budget -= buf.len() as isize;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// minimal GIF stream walker
// ---------------------------------------------------------------------------

struct DecodedFrame {
    left: u16,
    top: u16,
    width: u16,
    height: u16,
    dispose: u8,
    delay: u16,
    transparent: Option<u8>,
    local_palette: Option<Vec<u8>>,
    pixels: Vec<u8>,
}

struct Gif {
    width: u16,
    height: u16,
    global_palette: Vec<u8>,
    loops: Option<u16>,
    frames: Vec<DecodedFrame>,
}

fn le16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// Parses the produced byte stream, asserting structural validity along the
/// way (sub-block framing, terminators, trailer).
fn parse(bytes: &[u8]) -> Gif {
    assert_eq!(&bytes[0..6], b"GIF89a");
    let width = le16(bytes, 6);
    let height = le16(bytes, 8);
    let packed = bytes[10];
    assert_eq!(bytes[11], 0, "background color index");
    assert_eq!(bytes[12], 0, "pixel aspect ratio");
    let mut p = 13;
    let mut global_palette = Vec::new();
    if packed & 0x80 != 0 {
        let entries = 2usize << (packed & 0x07);
        global_palette = bytes[p..p + entries * 3].to_vec();
        p += entries * 3;
    }
    let mut frames = Vec::new();
    let mut loops = None;
    let mut gce: Option<(u8, u16, Option<u8>)> = None;
    loop {
        let block = bytes[p];
        p += 1;
        match block {
            0x21 => {
                let label = bytes[p];
                p += 1;
                match label {
                    0xF9 => {
                        assert_eq!(bytes[p], 4);
                        let flags = bytes[p + 1];
                        let delay = le16(bytes, p + 2);
                        let transparent = (flags & 1 != 0).then(|| bytes[p + 4]);
                        assert_eq!(bytes[p + 5], 0, "control extension terminator");
                        p += 6;
                        gce = Some(((flags >> 2) & 0x07, delay, transparent));
                    }
                    0xFF => {
                        assert_eq!(bytes[p], 11);
                        assert_eq!(&bytes[p + 1..p + 12], b"NETSCAPE2.0");
                        assert_eq!(bytes[p + 12], 3);
                        assert_eq!(bytes[p + 13], 1);
                        loops = Some(le16(bytes, p + 14));
                        assert_eq!(bytes[p + 16], 0, "application extension terminator");
                        p += 17;
                    }
                    other => panic!("unexpected extension label {other:#04x}"),
                }
            }
            0x2C => {
                let left = le16(bytes, p);
                let top = le16(bytes, p + 2);
                let frame_width = le16(bytes, p + 4);
                let frame_height = le16(bytes, p + 6);
                let flags = bytes[p + 8];
                p += 9;
                let mut local_palette = None;
                if flags & 0x80 != 0 {
                    let entries = 2usize << (flags & 0x07);
                    local_palette = Some(bytes[p..p + entries * 3].to_vec());
                    p += entries * 3;
                }
                let min_code = bytes[p];
                p += 1;
                let section_start = p;
                let mut raster = Vec::new();
                let mut declared = 0usize;
                let mut blocks = 0usize;
                loop {
                    let len = usize::from(bytes[p]);
                    p += 1;
                    if len == 0 {
                        break;
                    }
                    raster.extend_from_slice(&bytes[p..p + len]);
                    declared += len;
                    blocks += 1;
                    p += len;
                }
                // declared sub-block lengths plus prefix and terminator bytes
                // make up the raster section exactly
                assert_eq!(section_start + declared + blocks + 1, p);
                let mut pixels = Vec::new();
                weezl::decode::Decoder::new(weezl::BitOrder::Lsb, min_code)
                    .into_vec(&mut pixels)
                    .decode_all(&raster)
                    .status
                    .unwrap();
                assert_eq!(
                    pixels.len(),
                    usize::from(frame_width) * usize::from(frame_height)
                );
                let (dispose, delay, transparent) = gce.take().unwrap_or((0, 0, None));
                frames.push(DecodedFrame {
                    left,
                    top,
                    width: frame_width,
                    height: frame_height,
                    dispose,
                    delay,
                    transparent,
                    local_palette,
                    pixels,
                });
            }
            0x3B => break,
            other => panic!("unexpected block {other:#04x}"),
        }
    }
    assert_eq!(p, bytes.len(), "bytes after the trailer");
    Gif {
        width,
        height,
        global_palette,
        loops,
        frames,
    }
}

fn rgb(table: &[u8], index: u8) -> [u8; 3] {
    let at = usize::from(index) * 3;
    match table.get(at..at + 3) {
        Some(c) => [c[0], c[1], c[2]],
        None => [0, 0, 0],
    }
}

fn resolved(buffer: &[u8], table: &[u8]) -> Vec<[u8; 3]> {
    buffer.iter().map(|&index| rgb(table, index)).collect()
}

/// Replays a do-not-dispose stream, returning the full canvas displayed
/// after each frame.
fn composite(gif: &Gif) -> Vec<Vec<[u8; 3]>> {
    let size = usize::from(gif.width) * usize::from(gif.height);
    let mut canvas = vec![[0u8; 3]; size];
    let mut shown = Vec::new();
    for frame in &gif.frames {
        assert_eq!(frame.dispose, 1, "composite only replays do-not-dispose");
        let table = frame.local_palette.as_deref().unwrap_or(&gif.global_palette);
        for row in 0..usize::from(frame.height) {
            for col in 0..usize::from(frame.width) {
                let index = frame.pixels[row * usize::from(frame.width) + col];
                if frame.transparent == Some(index) {
                    continue;
                }
                let at = (usize::from(frame.top) + row) * usize::from(gif.width)
                    + usize::from(frame.left)
                    + col;
                canvas[at] = rgb(table, index);
            }
        }
        shown.push(canvas.clone());
    }
    shown
}

fn frame_from(pixels: &[u8]) -> Frame<'_> {
    Frame {
        buffer: Cow::Borrowed(pixels),
        ..Frame::default()
    }
}

const BW: &[u8] = &[0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF];

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[test]
fn single_frame_round_trip() {
    let pixels: Vec<u8> = (0..100 * 100).map(|i| ((i / 3) % 2) as u8).collect();
    let mut encoder = Encoder::new(Vec::new(), 100, 100, BW).unwrap();
    encoder.add_frame(&frame_from(&pixels)).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    assert_eq!((gif.width, gif.height), (100, 100));
    assert_eq!(gif.frames.len(), 1);
    let frame = &gif.frames[0];
    assert_eq!((frame.left, frame.top), (0, 0));
    assert_eq!((frame.width, frame.height), (100, 100));
    assert_eq!(frame.pixels, pixels);
}

#[test]
fn minimal_single_color_image() {
    let mut encoder = Encoder::new(Vec::new(), 1, 1, &[0xFF, 0x00, 0x00]).unwrap();
    encoder.add_frame(&frame_from(&[0])).unwrap();
    let out = encoder.finish().unwrap();
    let gif = parse(&out);

    // a one-entry palette is padded to the two-entry minimum
    assert_eq!(gif.global_palette.len(), 2 * 3);
    assert_eq!(gif.global_palette[..3], [0xFF, 0x00, 0x00]);
    assert_eq!(gif.frames[0].pixels, [0]);
}

#[test]
fn palette_is_padded_to_power_of_two() {
    let palette: Vec<u8> = (0..5 * 3).collect();
    let mut encoder = Encoder::new(Vec::new(), 2, 2, &palette).unwrap();
    encoder.add_frame(&frame_from(&[0, 1, 2, 4])).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    assert_eq!(gif.global_palette.len(), 8 * 3);
    assert_eq!(gif.global_palette[..15], palette[..]);
    assert_eq!(gif.global_palette[15..], [0; 9]);
}

#[test]
fn noise_with_full_palette_round_trips() {
    let palette: Vec<u8> = (0..=255u8)
        .flat_map(|i| [i, 255 - i, i ^ 0x55])
        .collect();
    let mut state = 0x1234_5678u32;
    let pixels: Vec<u8> = (0..128 * 96)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect();
    let mut encoder = Encoder::new(Vec::new(), 128, 96, &palette).unwrap();
    encoder.add_frame(&frame_from(&pixels)).unwrap();
    let gif = parse(&encoder.finish().unwrap());
    assert_eq!(gif.frames[0].pixels, pixels);
}

#[test]
fn diff_window_covers_only_changed_rectangle() {
    let palette: Vec<u8> = (0..4).flat_map(|i| [i * 60; 3]).collect();
    let first = vec![0u8; 64];
    let mut second = first.clone();
    for row in 3..=4 {
        for col in 2..=5 {
            second[row * 8 + col] = 2;
        }
    }
    let mut encoder = Encoder::new(Vec::new(), 8, 8, &palette).unwrap();
    encoder.add_frame(&frame_from(&first)).unwrap();
    let mut frame = frame_from(&second);
    frame.diff_window = true;
    encoder.add_frame(&frame).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    let patch = &gif.frames[1];
    assert_eq!((patch.left, patch.top), (2, 3));
    assert_eq!((patch.width, patch.height), (4, 2));
    assert_eq!(patch.pixels, [2; 8]);

    let shown = composite(&gif);
    assert_eq!(shown[0], resolved(&first, &palette));
    assert_eq!(shown[1], resolved(&second, &palette));
}

#[test]
fn identical_frame_collapses_to_one_pixel() {
    let pixels = vec![1u8; 6 * 4];
    let mut encoder = Encoder::new(Vec::new(), 6, 4, BW).unwrap();
    encoder.add_frame(&frame_from(&pixels)).unwrap();
    let mut repeat = frame_from(&pixels);
    repeat.diff_window = true;
    encoder.add_frame(&repeat).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    let frame = &gif.frames[1];
    assert_eq!((frame.left, frame.top), (0, 0));
    assert_eq!((frame.width, frame.height), (1, 1));
}

#[test]
fn changed_pixel_is_kept_and_rest_goes_transparent() {
    // 2x2 all black, then one pixel flips to white: the second frame must
    // shrink to that pixel and still replay to the full original frames
    let first = [0u8, 0, 0, 0];
    let second = [0u8, 0, 1, 0];
    let mut encoder = Encoder::new(Vec::new(), 2, 2, BW).unwrap();
    encoder.add_frame(&frame_from(&first)).unwrap();
    let mut frame = frame_from(&second);
    frame.diff_window = true;
    frame.diff_transparency = true;
    encoder.add_frame(&frame).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    let patch = &gif.frames[1];
    assert_eq!((patch.left, patch.top), (0, 1));
    assert_eq!((patch.width, patch.height), (1, 1));
    assert_eq!(patch.pixels, [1]);
    // the reserved index can never name a palette color
    assert!(patch.transparent.unwrap() >= 2);

    let shown = composite(&gif);
    assert_eq!(shown[0], resolved(&first, BW));
    assert_eq!(shown[1], resolved(&second, BW));
}

#[test]
fn unchanged_pixels_are_substituted_with_the_reserved_index() {
    let first = [0u8, 1, 0, 1];
    let second = [1u8, 1, 0, 1];
    let mut encoder = Encoder::new(Vec::new(), 4, 1, BW).unwrap();
    encoder.add_frame(&frame_from(&first)).unwrap();
    let mut frame = frame_from(&second);
    frame.diff_transparency = true;
    encoder.add_frame(&frame).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    let frame = &gif.frames[1];
    assert_eq!((frame.width, frame.height), (4, 1));
    let reserved = frame.transparent.unwrap();
    assert_eq!(frame.pixels, [1, reserved, reserved, reserved]);

    let shown = composite(&gif);
    assert_eq!(shown[1], resolved(&second, BW));
}

#[test]
fn local_palette_frames_diff_by_color_not_by_index() {
    // second frame shows the very same image through a swapped palette;
    // the diff must see resolved colors and collapse to a dummy pixel
    let first = [0u8, 1, 0, 1, 0, 1, 0, 1];
    let second = [1u8, 0, 1, 0, 1, 0, 1, 0];
    let swapped = [0xFFu8, 0xFF, 0xFF, 0x00, 0x00, 0x00];
    let mut encoder = Encoder::new(Vec::new(), 4, 2, BW).unwrap();
    encoder.add_frame(&frame_from(&first)).unwrap();
    let mut frame = frame_from(&second);
    frame.palette = Some(Cow::Borrowed(&swapped[..]));
    frame.diff_window = true;
    encoder.add_frame(&frame).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    let frame = &gif.frames[1];
    assert_eq!(frame.local_palette.as_ref().unwrap().len(), 2 * 3);
    assert_eq!((frame.width, frame.height), (1, 1));

    let shown = composite(&gif);
    assert_eq!(shown[0], shown[1]);
}

#[test]
fn frames_without_any_palette_are_rejected() {
    let mut encoder = Encoder::new(Vec::new(), 2, 2, &[]).unwrap();
    assert!(matches!(
        encoder.add_frame(&frame_from(&[0, 0, 0, 0])),
        Err(EncodingError::Format(
            EncodingFormatError::MissingColorPalette
        ))
    ));
}

#[test]
fn stream_without_global_table_uses_local_tables() {
    let mut encoder = Encoder::new(Vec::new(), 2, 1, &[]).unwrap();
    let mut frame = frame_from(&[0, 1]);
    frame.palette = Some(Cow::Borrowed(BW));
    encoder.add_frame(&frame).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    assert!(gif.global_palette.is_empty());
    assert_eq!(gif.frames[0].local_palette.as_deref().unwrap(), BW);
    assert_eq!(gif.frames[0].pixels, [0, 1]);
}

#[test]
fn netscape_extension_carries_the_loop_count() {
    let mut encoder = Encoder::new(Vec::new(), 2, 1, BW).unwrap();
    encoder.set_repeat(Repeat::Finite(5)).unwrap();
    let mut frame = frame_from(&[0, 1]);
    frame.delay = 50;
    encoder.add_frame(&frame).unwrap();
    encoder.add_frame(&frame).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    assert_eq!(gif.loops, Some(5));
    assert_eq!(gif.frames.len(), 2);
    assert_eq!(gif.frames[0].delay, 50);
}

#[test]
fn infinite_repeat_writes_a_zero_loop_count() {
    let mut encoder = Encoder::new(Vec::new(), 2, 1, BW).unwrap();
    encoder.set_repeat(Repeat::Infinite).unwrap();
    encoder.add_frame(&frame_from(&[0, 1])).unwrap();
    let gif = parse(&encoder.finish().unwrap());
    assert_eq!(gif.loops, Some(0));
}

#[test]
fn stream_transparency_restores_background_between_frames() {
    let mut encoder = Encoder::new(Vec::new(), 2, 2, BW).unwrap();
    encoder.set_transparency(true);
    let buffers = [[0u8, 0, 0, 0], [0u8, 1, 0, 0], [1u8, 1, 0, 0]];
    for buffer in &buffers {
        let mut frame = frame_from(buffer);
        // suppressed: a user-managed transparency color rules both out
        frame.diff_window = true;
        frame.diff_transparency = true;
        encoder.add_frame(&frame).unwrap();
    }
    let gif = parse(&encoder.finish().unwrap());

    assert_eq!(gif.frames.len(), 3);
    // every frame before a transparent successor restores the background
    assert_eq!(gif.frames[0].dispose, 2);
    assert_eq!(gif.frames[1].dispose, 2);
    assert_eq!(gif.frames[2].dispose, 1);
    for (frame, buffer) in gif.frames.iter().zip(&buffers) {
        assert_eq!(frame.transparent, Some(0));
        assert_eq!((frame.width, frame.height), (2, 2));
        assert_eq!(frame.pixels, buffer[..]);
    }
}

#[test]
fn dispose_of_a_frame_follows_its_successors_transparency() {
    let mut encoder = Encoder::new(Vec::new(), 2, 1, BW).unwrap();
    encoder.add_frame(&frame_from(&[0, 0])).unwrap();
    let mut holey = frame_from(&[1, 1]);
    holey.transparent = Some(0);
    encoder.add_frame(&holey).unwrap();
    encoder.add_frame(&frame_from(&[1, 0])).unwrap();
    let gif = parse(&encoder.finish().unwrap());

    assert_eq!(gif.frames[0].dispose, 2);
    assert_eq!(gif.frames[0].transparent, None);
    assert_eq!(gif.frames[1].dispose, 1);
    assert_eq!(gif.frames[1].transparent, Some(0));
}

#[test]
fn bad_pixel_index_fails_without_partial_frame_bytes() {
    let sink = SharedSink::default();
    let mut encoder = Encoder::new(sink.clone(), 100, 100, BW).unwrap();
    let head_len = sink.0.borrow().len();
    assert_eq!(head_len, 13 + 2 * 3);

    let mut pixels = vec![0u8; 100 * 100];
    pixels[2] = 32; // 32 is not a valid index in this case
    encoder.add_frame(&frame_from(&pixels)).unwrap();
    assert!(matches!(
        encoder.finish(),
        Err(EncodingError::IndexOutOfBounds)
    ));
    // nothing of the failed frame reached the sink, not even the trailer
    assert_eq!(sink.0.borrow().len(), head_len);
}

#[test]
fn first_write_error_is_latched_and_replayed() {
    // exactly the stream head fits, the first frame does not
    let sink = FailAfter::new(13 + 2 * 3);
    let mut encoder = Encoder::new(sink.clone(), 4, 4, BW).unwrap();
    let frame = frame_from(&[0u8; 16]);
    encoder.add_frame(&frame).unwrap();
    encoder.add_frame(&frame).unwrap();
    // the third frame pushes the first one out of the queue and into the sink
    assert!(matches!(
        encoder.add_frame(&frame),
        Err(EncodingError::Io(_))
    ));
    let calls_after_failure = *sink.calls.borrow();

    // latched: later calls replay the error without touching the sink
    assert!(matches!(
        encoder.add_frame(&frame),
        Err(EncodingError::Io(_))
    ));
    assert!(matches!(encoder.finish(), Err(EncodingError::Io(_))));
    assert_eq!(*sink.calls.borrow(), calls_after_failure);
}

#[test]
fn too_small_frame_buffer_is_rejected() {
    let mut encoder = Encoder::new(Vec::new(), 2, 2, BW).unwrap();
    assert!(matches!(
        encoder.add_frame(&frame_from(&[0, 0, 0])),
        Err(EncodingError::FrameBufferTooSmallForDimensions)
    ));
}

#[test]
fn many_frames_flow_through_the_lookahead_queue() {
    let mut encoder = Encoder::new(Vec::new(), 4, 4, BW).unwrap();
    let mut buffers = Vec::new();
    for i in 0..10u8 {
        let mut pixels = vec![0u8; 16];
        pixels[usize::from(i)] = 1;
        buffers.push(pixels);
    }
    for pixels in &buffers {
        let mut frame = frame_from(pixels);
        frame.diff_window = true;
        frame.diff_transparency = true;
        encoder.add_frame(&frame).unwrap();
    }
    let gif = parse(&encoder.finish().unwrap());

    assert_eq!(gif.frames.len(), 10);
    let shown = composite(&gif);
    for (canvas, buffer) in shown.iter().zip(&buffers) {
        assert_eq!(canvas, &resolved(buffer, BW));
    }
}

#[test]
fn dispose_default_is_written_to_the_control_extension() {
    let mut encoder = Encoder::new(Vec::new(), 2, 1, BW).unwrap();
    let mut frame = frame_from(&[0, 1]);
    frame.dispose = DisposalMethod::Background;
    encoder.add_frame(&frame).unwrap();
    let gif = parse(&encoder.finish().unwrap());
    assert_eq!(gif.frames[0].dispose, 2);
}
