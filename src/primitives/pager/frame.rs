use crate::types::BlockId;

/// One cached block image.
#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub data: Box<[u8]>,
    pub dirty: bool,
}

impl Block {
    pub fn new(id: BlockId, block_size: usize) -> Self {
        Self {
            id,
            data: vec![0u8; block_size].into_boxed_slice(),
            dirty: false,
        }
    }
}
