//! Chunked elementary-stream bit reader.
//!
//! The demultiplexer pushes [`EsChunk`]s (one per PES payload) into a
//! [`ChunkQueue`]; the parser side pulls bits through [`BitReader`], which
//! refills transparently and records the timestamp metadata of every chunk
//! boundary it crosses. The reader itself never interprets the stream: it
//! only knows bits, byte alignment and the 24-bit start-code prefix.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use num_traits::PrimInt;

use crate::error::{Error, Result};

/// One PES payload worth of elementary stream, with the metadata carried on
/// its packet boundary. Zero timestamps mean "not present".
pub struct EsChunk {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    /// Current stream rate in units of the nominal rate / 1000.
    pub rate: i32,
    /// True when the transport layer signalled a time discontinuity at this
    /// boundary; the decoder drops its references in response.
    pub discontinuity: bool,
}

impl EsChunk {
    pub fn from_data(data: Vec<u8>) -> Self {
        Self {
            data,
            pts: 0,
            dts: 0,
            rate: 1000,
            discontinuity: false,
        }
    }
}

/// Timestamp metadata observed at a chunk boundary.
#[derive(Clone, Copy, Default)]
pub struct PesSignals {
    pub pts: i64,
    pub dts: i64,
    pub rate: i32,
    pub discontinuity: bool,
}

struct QueueState {
    chunks: VecDeque<EsChunk>,
    closed: bool,
    die: bool,
}

/// Bounded FIFO between the demultiplexer and the decoder.
///
/// `push` blocks when the queue is full, `pop` blocks when it is empty; both
/// give up immediately when the kill flag is raised. Closing the queue lets
/// the reader drain the remaining chunks and then report end of stream.
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ChunkQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                closed: false,
                die: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        })
    }

    pub fn push(&self, chunk: EsChunk) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while state.chunks.len() >= self.capacity {
            if state.die {
                return Err(Error::Shutdown);
            }
            state = self.not_full.wait(state).unwrap();
        }
        if state.die {
            return Err(Error::Shutdown);
        }
        state.chunks.push_back(chunk);
        self.not_empty.notify_one();
        Ok(())
    }

    /// No more chunks will arrive; the stream ends when the queue drains.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_empty.notify_all();
    }

    /// Raise the kill flag. Every waiter, on both sides, wakes up with
    /// [`Error::Shutdown`].
    pub fn kill(&self) {
        let mut state = self.state.lock().unwrap();
        state.die = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_dying(&self) -> bool {
        self.state.lock().unwrap().die
    }

    fn pop(&self) -> Result<EsChunk> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.die {
                return Err(Error::Shutdown);
            }
            if let Some(chunk) = state.chunks.pop_front() {
                self.not_full.notify_one();
                return Ok(chunk);
            }
            if state.closed {
                return Err(Error::EndOfStream);
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }
}

/// Bit-level cursor over the concatenation of the queue's chunks.
pub struct BitReader {
    queue: Arc<ChunkQueue>,
    data: Vec<u8>,
    byte_pos: usize,
    /// Accumulator; the `acc_bits` low bits are valid, earliest bit most
    /// significant.
    acc: u64,
    acc_bits: u32,
    boundary: Option<PesSignals>,
}

impl BitReader {
    pub fn new(queue: Arc<ChunkQueue>) -> Self {
        Self {
            queue,
            data: Vec::new(),
            byte_pos: 0,
            acc: 0,
            acc_bits: 0,
            boundary: None,
        }
    }

    pub fn queue(&self) -> &Arc<ChunkQueue> {
        &self.queue
    }

    /// Chunk-boundary metadata crossed since the last call, if any. The
    /// parser drains this into the sequence context between syntactic units.
    pub fn take_boundary(&mut self) -> Option<PesSignals> {
        self.boundary.take()
    }

    fn ensure(&mut self, count: u32) -> Result<()> {
        debug_assert!(count <= 32);
        while self.acc_bits < count {
            if self.byte_pos == self.data.len() {
                let chunk = self.queue.pop()?;
                // Boundaries may pile up across empty chunks; the latest
                // timestamps win, but a discontinuity is never forgotten.
                let disco = self.boundary.map(|b| b.discontinuity).unwrap_or(false);
                self.boundary = Some(PesSignals {
                    pts: chunk.pts,
                    dts: chunk.dts,
                    rate: chunk.rate,
                    discontinuity: disco | chunk.discontinuity,
                });
                self.data = chunk.data;
                self.byte_pos = 0;
                continue;
            }
            self.acc = (self.acc << 8) | u64::from(self.data[self.byte_pos]);
            self.byte_pos += 1;
            self.acc_bits += 8;
        }
        Ok(())
    }

    /// Next `count` bits without advancing.
    pub fn show(&mut self, count: u32) -> Result<u32> {
        self.ensure(count)?;
        let shifted = self.acc >> (self.acc_bits - count);
        Ok((shifted & (u64::MAX >> (64 - count))) as u32)
    }

    /// Advance by `count` bits.
    pub fn remove(&mut self, count: u32) -> Result<()> {
        self.ensure(count)?;
        self.acc_bits -= count;
        self.acc &= (1u64 << self.acc_bits) - 1;
        Ok(())
    }

    /// Next `count` bits, advancing. The target type follows the call site,
    /// as in `reader.get::<u8>(2)`.
    pub fn get<T: PrimInt>(&mut self, count: u32) -> Result<T> {
        let raw = self.show(count)?;
        self.acc_bits -= count;
        self.acc &= (1u64 << self.acc_bits) - 1;
        Ok(T::from(raw).expect("bit count exceeds target type"))
    }

    /// Next `count` bits sign-extended from bit `count - 1`.
    pub fn get_signed(&mut self, count: u32) -> Result<i32> {
        let raw = self.get::<u32>(count)?;
        let shift = 32 - count;
        Ok(((raw << shift) as i32) >> shift)
    }

    /// True when a flag bit is set; reads one bit.
    pub fn get_flag(&mut self) -> Result<bool> {
        Ok(self.get::<u32>(1)? != 0)
    }

    /// Advance to the next byte boundary.
    pub fn realign(&mut self) {
        let misalign = self.acc_bits % 8;
        if misalign != 0 {
            self.acc_bits -= misalign;
            self.acc &= (1u64 << self.acc_bits) - 1;
        }
    }

    /// Realign, then skip forward until the 24-bit prefix `0x000001` is next
    /// in the stream.
    pub fn next_start_code(&mut self) -> Result<()> {
        self.realign();
        while self.show(24)? != 0x01 {
            self.remove(8)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_over(bytes: &[u8]) -> BitReader {
        let queue = ChunkQueue::new(4);
        queue.push(EsChunk::from_data(bytes.to_vec())).unwrap();
        queue.close();
        BitReader::new(queue)
    }

    #[test]
    fn show_does_not_advance() {
        let mut r = reader_over(&[0b1010_1100, 0b0101_0011]);
        assert_eq!(r.show(4).unwrap(), 0b1010);
        assert_eq!(r.show(4).unwrap(), 0b1010);
        assert_eq!(r.get::<u32>(4).unwrap(), 0b1010);
        assert_eq!(r.get::<u32>(8).unwrap(), 0b1100_0101);
        assert_eq!(r.get::<u32>(4).unwrap(), 0b0011);
    }

    #[test]
    fn get_signed_sign_extends() {
        let mut r = reader_over(&[0b1110_0100]);
        assert_eq!(r.get_signed(3).unwrap(), -1);
        assert_eq!(r.get_signed(3).unwrap(), 1);
    }

    #[test]
    fn realign_drops_partial_byte() {
        let mut r = reader_over(&[0xFF, 0xAB]);
        r.remove(3).unwrap();
        r.realign();
        assert_eq!(r.get::<u32>(8).unwrap(), 0xAB);
    }

    #[test]
    fn start_code_resync_skips_stuffing() {
        let mut r = reader_over(&[0xFF, 0x00, 0x00, 0x00, 0x01, 0xB3, 0x12]);
        r.remove(2).unwrap();
        r.next_start_code().unwrap();
        assert_eq!(r.get::<u32>(32).unwrap(), 0x000001B3);
    }

    #[test]
    fn crosses_chunk_boundaries_and_reports_metadata() {
        let queue = ChunkQueue::new(4);
        queue.push(EsChunk::from_data(vec![0xAA])).unwrap();
        queue
            .push(EsChunk {
                data: vec![0x55],
                pts: 40_000,
                dts: 39_000,
                rate: 1000,
                discontinuity: true,
            })
            .unwrap();
        queue.close();
        let mut r = BitReader::new(queue);
        assert_eq!(r.get::<u32>(8).unwrap(), 0xAA);
        assert!(r.take_boundary().is_some()); // first chunk
        assert_eq!(r.get::<u32>(8).unwrap(), 0x55);
        let b = r.take_boundary().unwrap();
        assert_eq!(b.pts, 40_000);
        assert!(b.discontinuity);
    }

    #[test]
    fn end_of_stream_and_shutdown() {
        let queue = ChunkQueue::new(4);
        queue.push(EsChunk::from_data(vec![0x01])).unwrap();
        queue.close();
        let mut r = BitReader::new(queue);
        assert_eq!(r.get::<u32>(8).unwrap(), 0x01);
        assert_eq!(r.show(8), Err(Error::EndOfStream));

        let queue = ChunkQueue::new(4);
        queue.kill();
        let mut r = BitReader::new(queue);
        assert_eq!(r.show(1), Err(Error::Shutdown));
    }
}
