//! Adaptive LZW compression for the GIF raster data section.
//!
//! The compressor walks the pixel buffer looking for the longest run already
//! known to its dictionary, emits the run's code and extends the dictionary
//! by one entry. Codes are handed straight to a bit packer that serializes
//! them LSB-first at the growing code width the GIF wire format prescribes.

use alloc::boxed::Box;
use alloc::vec::Vec;

/// An LZW code: a literal color, Clear, End, or a dictionary entry.
type Code = u16;

/// Maximum code length in bits.
const MAX_CODE_LEN: u8 = 12;
/// Number of codes after which the dictionary must be reset.
const MAX_DICT_LEN: u16 = 1 << MAX_CODE_LEN;

/// A pixel value lies outside the active dictionary, i.e. the palette has
/// fewer entries than the image data references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexError;

/// Initial LZW code length in bits for a palette with `entries` colors.
///
/// One bit more than needed to address every palette entry, with a lower
/// bound of 3 required by the format (the smallest wire code size is 2).
pub(crate) fn initial_code_len(entries: u16) -> u8 {
    (entries.clamp(2, 256).next_power_of_two().trailing_zeros() as u8 + 1).max(3)
}

/// One dictionary node; children are keyed by the color of the next pixel.
enum Node {
    /// No children yet.
    Empty,
    /// Exactly one child, stored inline.
    Inline { color: u8, child: Code },
    /// Dense per-color child table. A zero entry means "no child here";
    /// code 0 always names a root node and can never be anybody's child.
    Dense(Box<[Code]>),
}

/// Adaptive dictionary of known pixel runs, a trie keyed by
/// `(code, next color)`.
///
/// Nodes live in an arena indexed by their own code. Root nodes (single
/// colors) branch heavily and get a dense child table from the start;
/// derived nodes start out with a single inline child and are promoted to a
/// dense table in place once a second child appears.
struct DictTree {
    nodes: Vec<Node>,
    init_dict_len: u16,
    next_code: Code,
}

impl DictTree {
    fn new(init_code_len: u8) -> Self {
        let init_dict_len = 1u16 << (init_code_len - 1);
        let len = usize::from(init_dict_len);
        let mut nodes = Vec::with_capacity(len + 2);
        for _ in 0..len {
            nodes.push(Node::Dense(vec![0; len].into_boxed_slice()));
        }
        // the Clear and End codes are never used as parents
        nodes.push(Node::Empty);
        nodes.push(Node::Empty);
        DictTree {
            nodes,
            init_dict_len,
            next_code: init_dict_len + 2,
        }
    }

    /// Drops every derived entry, leaving only literal and control codes.
    fn reset(&mut self) {
        self.nodes.truncate(usize::from(self.init_dict_len) + 2);
        for node in &mut self.nodes {
            if let Node::Dense(table) = node {
                table.fill(0);
            }
        }
        self.next_code = self.init_dict_len + 2;
    }

    fn child(&self, parent: Code, color: u8) -> Option<Code> {
        match &self.nodes[usize::from(parent)] {
            Node::Dense(table) => match table[usize::from(color)] {
                0 => None,
                child => Some(child),
            },
            &Node::Inline { color: c, child } if c == color => Some(child),
            _ => None,
        }
    }

    /// Links a new node below `parent`, reachable via `color`.
    ///
    /// Returns `false` if the 12-bit code space is exhausted; the caller has
    /// to reset the dictionary and emit a Clear code then.
    fn insert(&mut self, parent: Code, color: u8) -> bool {
        if self.next_code == MAX_DICT_LEN {
            return false;
        }
        let code = self.next_code;
        let len = usize::from(self.init_dict_len);
        let node = &mut self.nodes[usize::from(parent)];
        match node {
            Node::Empty => *node = Node::Inline { color, child: code },
            Node::Inline {
                color: first_color,
                child: first_child,
            } => {
                let (first_color, first_child) = (*first_color, *first_child);
                let mut table = vec![0; len].into_boxed_slice();
                table[usize::from(first_color)] = first_child;
                table[usize::from(color)] = code;
                *node = Node::Dense(table);
            }
            Node::Dense(table) => table[usize::from(color)] = code,
        }
        self.nodes.push(Node::Empty);
        self.next_code += 1;
        true
    }
}

/// Serializes variable-width codes LSB-first into a byte stream.
///
/// The code width starts at the initial code length and grows by one bit
/// when the count of codes written since the last Clear reaches
/// `2^width - init_dict_len`, which is exactly the point where a decoder
/// replaying the dictionary growth switches widths. A Clear code resets the
/// width and the counter. Codes span at most three bytes since the width is
/// capped at 12 bits.
struct BitPacker<'a> {
    out: &'a mut Vec<u8>,
    bit_offset: u8,
    code_len: u8,
    init_code_len: u8,
    /// The Clear code, numerically equal to the initial dictionary length.
    clear_code: Code,
    /// Codes written since the last Clear; starts at 1 so the width bumps
    /// exactly when the running code can no longer be represented.
    count: u32,
    threshold: u32,
    trailing_zero: bool,
}

impl<'a> BitPacker<'a> {
    fn new(out: &'a mut Vec<u8>, init_code_len: u8) -> Self {
        let clear_code = 1u16 << (init_code_len - 1);
        // bits accumulate into the last byte of `out`
        out.push(0);
        BitPacker {
            out,
            bit_offset: 0,
            code_len: init_code_len,
            init_code_len,
            clear_code,
            count: 1,
            threshold: u32::from(clear_code) * 2,
            trailing_zero: false,
        }
    }

    fn push(&mut self, code: Code) {
        if self.code_len < MAX_CODE_LEN && self.threshold - u32::from(self.clear_code) == self.count
        {
            self.code_len += 1;
            self.threshold *= 2;
        }
        self.trailing_zero = false;
        let bits = u32::from(code) << self.bit_offset;
        let last = self.out.len() - 1;
        self.out[last] |= bits as u8;
        let used = self.code_len + self.bit_offset;
        if used >= 8 {
            if used == 8 {
                // byte filled exactly; the fresh byte may turn out spare
                self.out.push(0);
                self.trailing_zero = true;
            } else if used < 16 {
                self.out.push((bits >> 8) as u8);
            } else if used == 16 {
                self.out.push((bits >> 8) as u8);
                self.out.push(0);
                self.trailing_zero = true;
            } else {
                self.out.push((bits >> 8) as u8);
                self.out.push((bits >> 16) as u8);
            }
        }
        self.bit_offset = used % 8;
        self.count += 1;
        if code == self.clear_code {
            self.code_len = self.init_code_len;
            self.threshold = u32::from(self.clear_code) * 2;
            self.count = 1;
        }
    }

    /// Ends the stream, trimming the spare zero byte the exact-fill paths
    /// may have left at the very end.
    fn finish(self) {
        if self.trailing_zero {
            self.out.pop();
        }
    }
}

/// Compresses `pixels` and appends the packed code stream to `out`.
///
/// The output starts with a Clear code and ends with the End code, but
/// carries neither the minimum-code-size byte nor the sub-block framing;
/// both are applied when the frame is serialized.
pub(crate) fn compress(
    pixels: &[u8],
    init_code_len: u8,
    out: &mut Vec<u8>,
) -> Result<(), IndexError> {
    let init_dict_len = 1u16 << (init_code_len - 1);
    let clear_code = init_dict_len;
    let end_code = init_dict_len + 1;
    let mut dict = DictTree::new(init_code_len);
    let mut packer = BitPacker::new(out, init_code_len);

    packer.push(clear_code);
    let mut pos = 0;
    while pos < pixels.len() {
        if u16::from(pixels[pos]) >= init_dict_len {
            return Err(IndexError);
        }
        let mut parent = Code::from(pixels[pos]);
        pos += 1;
        // descend while the pixel run is still in the dictionary
        loop {
            let Some(&color) = pixels.get(pos) else {
                packer.push(parent);
                break;
            };
            if u16::from(color) >= init_dict_len {
                return Err(IndexError);
            }
            if let Some(child) = dict.child(parent, color) {
                parent = child;
                pos += 1;
            } else {
                packer.push(parent);
                if !dict.insert(parent, color) {
                    dict.reset();
                    packer.push(clear_code);
                }
                // the match restarts at the unmatched pixel
                break;
            }
        }
    }
    packer.push(end_code);
    packer.finish();
    Ok(())
}
