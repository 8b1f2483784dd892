//! Node codec: turns tree nodes into page payloads and back.
//!
//! Payload layout (after the index file's 1-byte tombstone flag):
//!
//! ```text
//! byte 0            node tag: 0x00 internal, 0x01 leaf
//!
//! leaf body:
//!   u16             number of pairs
//!   per pair:       encoded key, u16 value length, value bytes
//!   8 bytes         next-leaf pointer slot
//!   8 bytes         prev-leaf pointer slot
//!
//! internal body:
//!   u16             number of keys
//!   per key:        encoded key
//!   u16             number of pointers (keys + 1)
//!   per pointer:    8-byte child pointer slot
//! ```
//!
//! Key encoding is one tag byte plus payload: 0x01 int (4 bytes), 0x02
//! float (8 bytes, IEEE-754 bit pattern), 0x03 string (u16 length +
//! bytes). All integers are little-endian.
//!
//! Each 8-byte pointer slot carries the live 32-bit page id in its low
//! four bytes; the high four bytes are written as zero and ignored on
//! read. Format version 1 left the slots entirely zeroed, which made the
//! encoding non-self-contained; version 2 requires real ids here.

use crate::index::node::{InternalNode, LeafNode, LeafPair, Node};
use bytes::{BufMut, Bytes, BytesMut};
use larch_common::error::{LarchError, Result};
use larch_common::page::{PageId, NODE_PAYLOAD_SIZE};
use larch_common::types::{Key, Value};

/// Node tag for internal nodes.
pub const NODE_TAG_INTERNAL: u8 = 0x00;
/// Node tag for leaf nodes.
pub const NODE_TAG_LEAF: u8 = 0x01;

/// Key tag for 32-bit signed integers.
pub const KEY_TAG_INT: u8 = 0x01;
/// Key tag for 64-bit floats.
pub const KEY_TAG_FLOAT: u8 = 0x02;
/// Key tag for bounded byte strings.
pub const KEY_TAG_STR: u8 = 0x03;

/// Width of a sibling/child pointer slot on disk.
const POINTER_SLOT_SIZE: usize = 8;

/// Encodes a node into a page payload.
///
/// Fails with `EncodeOverflow` if the encoding exceeds the payload
/// capacity of one page.
pub fn encode(node: &Node) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(256);

    match node {
        Node::Leaf(leaf) => {
            buf.put_u8(NODE_TAG_LEAF);
            buf.put_u16_le(leaf.pairs.len() as u16);
            for pair in &leaf.pairs {
                encode_key(&mut buf, &pair.key);
                buf.put_u16_le(pair.value.len() as u16);
                buf.put_slice(pair.value.as_bytes());
            }
            put_pointer_slot(&mut buf, leaf.next);
            put_pointer_slot(&mut buf, leaf.prev);
        }
        Node::Internal(interm) => {
            buf.put_u8(NODE_TAG_INTERNAL);
            buf.put_u16_le(interm.keys.len() as u16);
            for key in &interm.keys {
                encode_key(&mut buf, key);
            }
            buf.put_u16_le(interm.children.len() as u16);
            for child in &interm.children {
                put_pointer_slot(&mut buf, *child);
            }
        }
    }

    if buf.len() > NODE_PAYLOAD_SIZE {
        return Err(LarchError::EncodeOverflow {
            size: buf.len(),
            max: NODE_PAYLOAD_SIZE,
        });
    }
    Ok(buf.freeze())
}

/// Decodes a node from a page payload.
///
/// Trailing bytes beyond the encoded fields are ignored; pages are
/// zero-padded to their fixed size on disk.
pub fn decode(data: &[u8]) -> Result<Node> {
    let mut r = Reader::new(data);

    match r.read_u8("node tag")? {
        NODE_TAG_LEAF => {
            let count = r.read_u16("leaf pair count")?;
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = decode_key(&mut r)?;
                let value_len = r.read_u16("value length")? as usize;
                let bytes = Bytes::copy_from_slice(r.take(value_len, "value bytes")?);
                pairs.push(LeafPair::new(key, Value::new(bytes)?));
            }
            let next = r.read_pointer_slot("next-leaf pointer")?;
            let prev = r.read_pointer_slot("prev-leaf pointer")?;
            Ok(Node::Leaf(LeafNode { pairs, next, prev }))
        }
        NODE_TAG_INTERNAL => {
            let key_count = r.read_u16("internal key count")?;
            let mut keys = Vec::with_capacity(key_count as usize);
            for _ in 0..key_count {
                keys.push(decode_key(&mut r)?);
            }
            let pointer_count = r.read_u16("internal pointer count")?;
            if pointer_count as usize != key_count as usize + 1 {
                return Err(LarchError::Corrupted(format!(
                    "internal node has {} keys but {} pointers",
                    key_count, pointer_count
                )));
            }
            let mut children = Vec::with_capacity(pointer_count as usize);
            for _ in 0..pointer_count {
                children.push(r.read_pointer_slot("child pointer")?);
            }
            Ok(Node::Internal(InternalNode { keys, children }))
        }
        tag => Err(LarchError::DecodeUnknownTag(tag)),
    }
}

fn encode_key(buf: &mut BytesMut, key: &Key) {
    match key {
        Key::Int(v) => {
            buf.put_u8(KEY_TAG_INT);
            buf.put_i32_le(*v);
        }
        Key::Float(v) => {
            buf.put_u8(KEY_TAG_FLOAT);
            buf.put_u64_le(v.to_bits());
        }
        Key::Str(v) => {
            buf.put_u8(KEY_TAG_STR);
            buf.put_u16_le(v.len() as u16);
            buf.put_slice(v.as_bytes());
        }
    }
}

fn decode_key(r: &mut Reader<'_>) -> Result<Key> {
    match r.read_u8("key tag")? {
        KEY_TAG_INT => {
            let b = r.take(4, "int key")?;
            Ok(Key::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
        }
        KEY_TAG_FLOAT => {
            let b = r.take(8, "float key")?;
            let bits = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            Ok(Key::Float(f64::from_bits(bits)))
        }
        KEY_TAG_STR => {
            let len = r.read_u16("string key length")? as usize;
            let bytes = r.take(len, "string key bytes")?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| LarchError::Corrupted("string key is not valid UTF-8".to_string()))?;
            Ok(Key::Str(s.to_string()))
        }
        tag => Err(LarchError::DecodeUnknownTag(tag)),
    }
}

fn put_pointer_slot(buf: &mut BytesMut, id: PageId) {
    buf.put_u32_le(id.as_u32());
    buf.put_u32_le(0);
}

/// Bounds-checked cursor over a page payload.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(LarchError::DecodeTruncated(context));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8> {
        Ok(self.take(1, context)?[0])
    }

    fn read_u16(&mut self, context: &'static str) -> Result<u16> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_pointer_slot(&mut self, context: &'static str) -> Result<PageId> {
        let b = self.take(POINTER_SLOT_SIZE, context)?;
        Ok(PageId::new(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }
}
