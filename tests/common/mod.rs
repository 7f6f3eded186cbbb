// Common test utilities: builds synthetic raw disc images with the real
// sector geometry (24-byte header, 0x800 payload, 0x118 trailer) so the
// integration tests exercise gap skipping on data they fully control.

/// Accumulates a logical payload image and renders it into raw sectors.
pub struct DiscImageBuilder {
    payload: Vec<u8>,
}

impl DiscImageBuilder {
    pub fn new() -> Self {
        DiscImageBuilder { payload: vec![] }
    }

    /// Writes `bytes` at a logical payload offset, growing as needed.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> &mut Self {
        if self.payload.len() < offset + bytes.len() {
            self.payload.resize(offset + bytes.len(), 0);
        }
        self.payload[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Writes at `sector * 0x800 + offset`.
    pub fn write_in_sector(&mut self, sector: usize, offset: usize, bytes: &[u8]) -> &mut Self {
        self.write(sector * 0x800 + offset, bytes)
    }

    /// Renders the raw image. Metadata regions are filled with a junk
    /// pattern so any read that strays out of the payload shows up loudly.
    pub fn build(&self) -> Vec<u8> {
        let sectors = self.payload.len().div_ceil(0x800).max(1);
        let mut raw = Vec::with_capacity(sectors * 0x930);
        for sector in 0..sectors {
            raw.extend(std::iter::repeat(0xAA).take(24));
            let start = sector * 0x800;
            let end = (start + 0x800).min(self.payload.len());
            raw.extend_from_slice(&self.payload[start..end]);
            raw.extend(std::iter::repeat(0).take(0x800 - (end - start)));
            raw.extend(std::iter::repeat(0xBB).take(0x118));
        }
        raw
    }
}

pub fn u32le(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

pub fn i16le(v: i16) -> [u8; 2] {
    v.to_le_bytes()
}

/// A 24-byte raw transform record: row-major fixed-point matrix then
/// translation, all /4096.
pub fn raw_transform(matrix: [i16; 9], translation: [i16; 3]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(24);
    for v in matrix {
        bytes.extend_from_slice(&i16le(v));
    }
    for v in translation {
        bytes.extend_from_slice(&i16le(v));
    }
    bytes
}
