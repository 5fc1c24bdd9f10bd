//! Long message splitting
//! Splits a payload into MTU-sized fragments, each prefixed with a message type byte.

/// One fragment of a long message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub type_tag: u8,
    pub data: Vec<u8>,
}

impl Chunk {
    /// Wire representation: `[type_tag] + data`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 1);
        bytes.push(self.type_tag);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Length on the wire, tag included
    pub fn wire_len(&self) -> usize {
        self.data.len() + 1
    }
}

/// Returns chunk `index` of `payload` for a link carrying `max_length` bytes per write.
///
/// Each chunk holds `max_length - 1` payload bytes behind the tag; the last one may be
/// shorter. `None` marks the end of the sequence, and is also returned when
/// `max_length < 2` since no payload byte would fit.
pub fn chunk(payload: &[u8], index: usize, max_length: usize, type_tag: u8) -> Option<Chunk> {
    if max_length < 2 {
        return None;
    }
    let data_length = max_length - 1;
    let start = index.checked_mul(data_length)?;
    if start >= payload.len() {
        return None;
    }
    let end = (start + data_length).min(payload.len());
    Some(Chunk {
        type_tag,
        data: payload[start..end].to_vec(),
    })
}

/// Number of chunks `chunk` yields for a payload of `len` bytes
pub fn chunk_count(len: usize, max_length: usize) -> usize {
    if max_length < 2 {
        return 0;
    }
    len.div_ceil(max_length - 1)
}

/// Iterator over the chunks of a payload
#[derive(Debug, Clone)]
pub struct MessageChunker<'a> {
    payload: &'a [u8],
    max_length: usize,
    type_tag: u8,
    index: usize,
}

impl<'a> MessageChunker<'a> {
    /// Returns `None` when `max_length` cannot carry any payload byte
    pub fn new(payload: &'a [u8], max_length: usize, type_tag: u8) -> Option<Self> {
        if max_length < 2 {
            return None;
        }
        Some(Self {
            payload,
            max_length,
            type_tag,
            index: 0,
        })
    }

    pub fn total(&self) -> usize {
        chunk_count(self.payload.len(), self.max_length)
    }
}

impl Iterator for MessageChunker<'_> {
    type Item = (usize, Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.index;
        let next = chunk(self.payload, index, self.max_length, self.type_tag)?;
        self.index += 1;
        Some((index, next))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}
