/// Opaque block identifier, one byte per voxel. The engine stores these
/// without interpreting them; game-specific layers assign meaning.
///
/// The only semantic the engine enforces is that `BlockId::AIR` (0) is the
/// "empty" block returned for out-of-range reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockId(pub u8);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }
}
