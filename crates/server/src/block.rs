//! Named block ids.
//!
//! Ids are the classic one-byte numeric block ids, which is also what goes
//! into chunk data on the wire, so there is no mapping layer.

use lowcraft_engine::world::block::BlockId;

pub const AIR: BlockId = BlockId(0);
pub const STONE: BlockId = BlockId(1);
pub const GRASS: BlockId = BlockId(2);
pub const DIRT: BlockId = BlockId(3);
pub const BEDROCK: BlockId = BlockId(7);
pub const WATER: BlockId = BlockId(9);
