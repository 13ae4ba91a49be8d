//! Annex-B H.264 chunk classification.

/// Four-byte Annex-B start code every chunk should begin with.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_TYPE_MASK: u8 = 0x1F;
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;

/// What a chunk carries, as far as feed scheduling cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Sequence parameter set; needed before any picture can decode.
    ParameterSet,
    /// IDR picture.
    Key,
    /// Anything else.
    Delta,
}

impl ChunkKind {
    /// Parameter sets and IDR pictures are submitted as key chunks.
    pub fn is_key(self) -> bool {
        matches!(self, Self::ParameterSet | Self::Key)
    }
}

/// Whether `chunk` starts with [`START_CODE`].
pub fn has_start_code(chunk: &[u8]) -> bool {
    chunk.starts_with(&START_CODE)
}

/// Classify a chunk by the NAL header following the start code.
///
/// Returns `None` for chunks too short to carry a NAL header.
pub fn classify(chunk: &[u8]) -> Option<ChunkKind> {
    let header = *chunk.get(START_CODE.len())?;
    Some(match header & NAL_TYPE_MASK {
        NAL_SPS => ChunkKind::ParameterSet,
        NAL_IDR => ChunkKind::Key,
        _ => ChunkKind::Delta,
    })
}
