//! The reconstruction pool.
//!
//! Two topologies behind one interface. Inline (zero workers): the parser
//! reconstructs each macroblock before parsing the next; one record, no
//! locks taken on the hot path. Pooled: records live in a fixed slab and
//! travel by 16-bit index through two queues under a single mutex, an
//! empty-LIFO the parser allocates from and an undecoded-FIFO the workers
//! drain. The parser blocks when every record is in flight; workers block
//! when there is nothing to decode; both wake immediately on the kill flag.
//!
//! Publication: the worker (or the inline path) that finishes a picture's
//! last macroblock hands it to the renderer and closes the synchro's timing
//! sample. Resizing the pool requires the idle barrier: every record back
//! in the empty list, nothing queued.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use lumiere_video::VideoOutput;

use super::{execute_macroblock, MacroblockRecord};
use crate::error::{Error, Result};
use crate::synchro::Synchro;

/// Upper bound of the record slab (power of two).
pub const VFIFO_SIZE: usize = 256;

/// Parser-side handle to a record: either the inline singleton or a slab
/// index it owns until dispatch or free.
pub enum RecordSlot {
    Inline,
    Pooled(u16),
}

struct RecordSlab(UnsafeCell<Box<[MacroblockRecord]>>);

// Soundness: a slab entry is only touched by whoever holds its index, and
// indices move between the parser and one worker through the queues.
unsafe impl Sync for RecordSlab {}

impl RecordSlab {
    #[allow(clippy::mut_from_ref)]
    unsafe fn entry(&self, index: u16) -> &mut MacroblockRecord {
        &mut (*self.0.get())[index as usize]
    }
}

struct PoolState {
    empty: Vec<u16>,
    undecoded: VecDeque<u16>,
    die: bool,
}

struct PoolShared {
    records: RecordSlab,
    capacity: usize,
    state: Mutex<PoolState>,
    /// A record returned to the empty list (parser and idle barrier wait).
    wait_empty: Condvar,
    /// Work arrived in the undecoded queue (workers wait).
    wait_undecoded: Condvar,
    output: Arc<Mutex<dyn VideoOutput>>,
    synchro: Arc<Mutex<Synchro>>,
    grayscale: bool,
}

impl PoolShared {
    /// Reconstruction epilogue, shared by workers and the inline path:
    /// count the macroblock and publish the picture when it was the last
    /// one.
    fn finish(record: &mut MacroblockRecord, output: &Mutex<dyn VideoOutput>, synchro: &Mutex<Synchro>) {
        if let Some(picture) = record.picture.as_ref() {
            if picture.finish_macroblock() {
                output
                    .lock()
                    .unwrap()
                    .display_picture(picture, record.repeat_period);
                synchro.lock().unwrap().end(false);
            }
        }
        record.release_pictures();
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let index = {
                let mut state = self.state.lock().unwrap();
                loop {
                    if state.die {
                        return;
                    }
                    if let Some(index) = state.undecoded.pop_front() {
                        break index;
                    }
                    state = self.wait_undecoded.wait(state).unwrap();
                }
            };

            let record = unsafe { self.records.entry(index) };
            execute_macroblock(record, self.grayscale);
            Self::finish(record, &self.output, &self.synchro);

            let mut state = self.state.lock().unwrap();
            state.empty.push(index);
            /* Covers both the parser waiting for a record and the idle
             * barrier. */
            self.wait_empty.notify_all();
        }
    }
}

pub struct DecoderPool {
    shared: Option<Arc<PoolShared>>,
    workers: Vec<JoinHandle<()>>,
    inline_record: Box<MacroblockRecord>,
    output: Arc<Mutex<dyn VideoOutput>>,
    synchro: Arc<Mutex<Synchro>>,
    grayscale: bool,
}

impl DecoderPool {
    pub fn new(
        workers: usize,
        output: Arc<Mutex<dyn VideoOutput>>,
        synchro: Arc<Mutex<Synchro>>,
        grayscale: bool,
    ) -> Self {
        let mut pool = Self {
            shared: None,
            workers: Vec::new(),
            inline_record: Box::default(),
            output,
            synchro,
            grayscale,
        };
        pool.spawn(workers);
        pool
    }

    fn spawn(&mut self, workers: usize) {
        if workers == 0 {
            return;
        }
        let capacity = (workers * 2).next_power_of_two().min(VFIFO_SIZE);
        let mut records = Vec::with_capacity(capacity);
        records.resize_with(capacity, MacroblockRecord::default);

        let shared = Arc::new(PoolShared {
            records: RecordSlab(UnsafeCell::new(records.into_boxed_slice())),
            capacity,
            state: Mutex::new(PoolState {
                empty: (0..capacity as u16).rev().collect(),
                undecoded: VecDeque::with_capacity(capacity),
                die: false,
            }),
            wait_empty: Condvar::new(),
            wait_undecoded: Condvar::new(),
            output: Arc::clone(&self.output),
            synchro: Arc::clone(&self.synchro),
            grayscale: self.grayscale,
        });

        for _ in 0..workers {
            let shared = Arc::clone(&shared);
            self.workers.push(std::thread::spawn(move || {
                shared.worker_loop();
            }));
        }
        self.shared = Some(shared);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Waits until every record is back in the empty list: no queued work,
    /// no worker mid-macroblock.
    pub fn wait_idle(&self) {
        let Some(shared) = self.shared.as_ref() else {
            return;
        };
        let mut state = shared.state.lock().unwrap();
        while state.empty.len() != shared.capacity && !state.die {
            state = shared.wait_empty.wait(state).unwrap();
        }
    }

    /// Changes the worker count. Must only be called between pictures; the
    /// idle barrier is taken here.
    pub fn resize(&mut self, workers: usize) {
        if workers == self.workers.len() {
            return;
        }
        self.wait_idle();
        self.shutdown();
        self.spawn(workers);
    }

    /// Claims a record to fill. Blocks while the pool is saturated.
    pub fn new_record(&mut self) -> Result<RecordSlot> {
        let Some(shared) = self.shared.as_ref() else {
            return Ok(RecordSlot::Inline);
        };
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.die {
                return Err(Error::Shutdown);
            }
            if let Some(index) = state.empty.pop() {
                return Ok(RecordSlot::Pooled(index));
            }
            state = shared.wait_empty.wait(state).unwrap();
        }
    }

    /// The record behind a slot the parser currently owns.
    pub fn record_mut(&mut self, slot: &mut RecordSlot) -> &mut MacroblockRecord {
        match slot {
            RecordSlot::Inline => &mut self.inline_record,
            RecordSlot::Pooled(index) => {
                let shared = self.shared.as_ref().expect("pooled slot without a pool");
                unsafe { shared.records.entry(*index) }
            }
        }
    }

    /// Sends a filled record to reconstruction. Inline topology decodes on
    /// the spot.
    pub fn dispatch(&mut self, slot: RecordSlot) {
        match slot {
            RecordSlot::Inline => {
                execute_macroblock(&self.inline_record, self.grayscale);
                PoolShared::finish(&mut self.inline_record, &self.output, &self.synchro);
            }
            RecordSlot::Pooled(index) => {
                let shared = self.shared.as_ref().expect("pooled slot without a pool");
                let mut state = shared.state.lock().unwrap();
                state.undecoded.push_back(index);
                shared.wait_undecoded.notify_one();
            }
        }
    }

    /// Returns a record claimed by `new_record` without reconstructing it
    /// (parse error); the macroblock stays unaccounted so the error
    /// recovery can re-issue its address.
    pub fn free(&mut self, slot: RecordSlot) {
        match slot {
            RecordSlot::Inline => self.inline_record.release_pictures(),
            RecordSlot::Pooled(index) => {
                let shared = self.shared.as_ref().expect("pooled slot without a pool");
                unsafe { shared.records.entry(index) }.release_pictures();
                let mut state = shared.state.lock().unwrap();
                state.empty.push(index);
                shared.wait_empty.notify_all();
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(shared) = self.shared.take() {
            {
                let mut state = shared.state.lock().unwrap();
                state.die = true;
                shared.wait_undecoded.notify_all();
                shared.wait_empty.notify_all();
            }
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for DecoderPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
