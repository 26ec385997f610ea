//! Framed Data Protocol
//!
//! Payloads sent to a device may embed timing directives. A directive is
//! the 4-byte sequence `1B 7E 44 D`, where `D` is a delay in
//! milliseconds (0-255). Everything else is literal data.
//!
//! ```text
//! 01 02 1B 7E 44 0A 03  ->  Data[01 02], Delay(10), Data[03]
//! ```

/// Leading bytes of a delay directive
pub const DELAY_MARKER: [u8; 3] = [0x1B, 0x7E, 0x44];

/// Marker plus the delay byte
pub const DELAY_DIRECTIVE_LEN: usize = DELAY_MARKER.len() + 1;

/// One step of a transmission, consumed strictly in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Raw bytes to write
    Data(Vec<u8>),
    /// Pause before the next chunk, in milliseconds
    Delay(u8),
}

/// Split a payload into data runs and delay directives.
///
/// A marker with no delay byte after it (end of buffer) is kept as data.
/// Adjacent directives yield adjacent `Delay`s; empty `Data` chunks are
/// never emitted.
pub fn encode(payload: &[u8]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut run = Vec::new();
    let mut i = 0;

    while i < payload.len() {
        let rest = &payload[i..];
        if rest.len() >= DELAY_DIRECTIVE_LEN && rest[..DELAY_MARKER.len()] == DELAY_MARKER {
            if !run.is_empty() {
                chunks.push(Chunk::Data(std::mem::take(&mut run)));
            }
            chunks.push(Chunk::Delay(rest[DELAY_MARKER.len()]));
            i += DELAY_DIRECTIVE_LEN;
        } else {
            run.push(payload[i]);
            i += 1;
        }
    }

    if !run.is_empty() {
        chunks.push(Chunk::Data(run));
    }

    chunks
}

/// Total number of data bytes across a chunk sequence
pub fn data_len(chunks: &[Chunk]) -> usize {
    chunks
        .iter()
        .map(|c| match c {
            Chunk::Data(bytes) => bytes.len(),
            Chunk::Delay(_) => 0,
        })
        .sum()
}
