// Batcher - groups an object sequence into fixed-capacity blocks

use crate::application::object_source::ObjectCursor;
use crate::domain::Block;
use crate::error::Result;

/// Pulls from a cursor and emits blocks of at most `block_size` items
///
/// A final partial block is still emitted; an exhausted source with nothing
/// accumulated emits no block. Source order is preserved within and across
/// blocks.
pub struct Batcher<C: ObjectCursor> {
    cursor: C,
    block_size: usize,
    emitted: usize,
    exhausted: bool,
}

impl<C: ObjectCursor> Batcher<C> {
    pub fn new(cursor: C, block_size: usize) -> Self {
        Self {
            cursor,
            block_size: block_size.max(1),
            emitted: 0,
            exhausted: false,
        }
    }

    pub async fn next_block(&mut self) -> Result<Option<Block>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut items = Vec::with_capacity(self.block_size);
        while items.len() < self.block_size {
            match self.cursor.next_item().await? {
                Some(item) => items.push(item),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if items.is_empty() {
            return Ok(None);
        }
        let block = Block::new(self.emitted, items);
        self.emitted += 1;
        Ok(Some(block))
    }

    pub fn blocks_emitted(&self) -> usize {
        self.emitted
    }

    /// Close the underlying cursor
    pub async fn close(&mut self) -> Result<()> {
        self.cursor.close().await
    }
}
