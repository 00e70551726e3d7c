//! Reassembly buffer for stream sockets.
//!
//! TCP hands back arbitrary chunks; frame parsing needs exact byte
//! counts. Bytes are accumulated in a ring of fixed-size blocks and
//! consumed with [`RecvBuffer::take`]. The ring doubles when the write
//! cursor would catch the read cursor, reflowing blocks so the oldest
//! unread block lands at index 0. The block count stays a power of two
//! so cursor wrap is a mask.

use std::io::{self, Read};

const BLOCK_SIZE: usize = 64;

pub struct RecvBuffer {
    blocks: Vec<[u8; BLOCK_SIZE]>,
    mask: usize,
    read_block: usize,
    read_index: usize,
    write_block: usize,
    write_index: usize,
}

impl RecvBuffer {
    /// Creates a buffer with at least `blocks` blocks, rounded up to a
    /// power of two.
    pub fn new(blocks: usize) -> Self {
        let count = blocks.max(2).next_power_of_two();
        RecvBuffer {
            blocks: vec![[0u8; BLOCK_SIZE]; count],
            mask: count - 1,
            read_block: 0,
            read_index: 0,
            write_block: 0,
            write_index: 0,
        }
    }

    /// Unread bytes currently buffered.
    pub fn available(&self) -> usize {
        let wrap = if self.write_block < self.read_block {
            self.blocks.len()
        } else {
            0
        };
        (wrap + self.write_block - self.read_block) * BLOCK_SIZE + self.write_index
            - self.read_index
    }

    /// Performs one read from `reader` into the next write position and
    /// returns the bytes just stored. An empty slice means end of stream.
    /// A single call never crosses a block boundary, so the slice is
    /// contiguous and at most `BLOCK_SIZE` long.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<&[u8]> {
        if (self.write_block + 1) & self.mask == self.read_block {
            self.grow();
        }
        let block = self.write_block;
        let start = self.write_index;
        let n = reader.read(&mut self.blocks[block][start..])?;
        if n > 0 {
            self.write_index += n;
            if self.write_index == BLOCK_SIZE {
                self.write_index = 0;
                self.write_block = (self.write_block + 1) & self.mask;
            }
        }
        Ok(&self.blocks[block][start..start + n])
    }

    /// Consumes exactly `len` buffered bytes, returning them followed by
    /// `pad` zero bytes. Returns `None` without consuming anything when
    /// fewer than `len` bytes are available.
    pub fn take(&mut self, len: usize, pad: usize) -> Option<Vec<u8>> {
        if len > self.available() {
            return None;
        }
        let mut out = vec![0u8; len + pad];
        let mut copied = 0usize;
        while copied < len {
            let in_block = BLOCK_SIZE - self.read_index;
            let chunk = in_block.min(len - copied);
            out[copied..copied + chunk].copy_from_slice(
                &self.blocks[self.read_block][self.read_index..self.read_index + chunk],
            );
            copied += chunk;
            self.read_index += chunk;
            if self.read_index == BLOCK_SIZE {
                self.read_index = 0;
                self.read_block = (self.read_block + 1) & self.mask;
            }
        }
        if self.available() == 0 {
            // Drained: rewind cursors so partial blocks are reused.
            self.read_block = 0;
            self.read_index = 0;
            self.write_block = 0;
            self.write_index = 0;
        }
        Some(out)
    }

    fn grow(&mut self) {
        let old_len = self.blocks.len();
        let mut rotated = Vec::with_capacity(old_len * 2);
        for i in 0..old_len {
            rotated.push(self.blocks[(i + self.read_block) & self.mask]);
        }
        rotated.resize(old_len * 2, [0u8; BLOCK_SIZE]);
        self.write_block = (self.write_block + old_len - self.read_block) & self.mask;
        self.read_block = 0;
        self.blocks = rotated;
        self.mask = old_len * 2 - 1;
    }
}
