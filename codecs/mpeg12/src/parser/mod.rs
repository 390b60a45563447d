//! Start-code driven parsing.
//!
//! [`VideoParser`] owns the whole decode side of the pipeline: it pulls bits
//! from the chunk queue, dispatches on start codes, maintains the sequence
//! and picture contexts, and drives slice parsing, which in turn feeds
//! macroblock records to the reconstruction pool. The loop shape follows
//! the classic parser-thread design: resynchronise, switch on the next
//! start code, repeat until the stream ends or the queue dies.

use std::sync::{Arc, Mutex};

use lumiere_video::VideoOutput;

use crate::bitreader::{BitReader, ChunkQueue};
use crate::decoder::pool::DecoderPool;
use crate::decoder::DecoderConfig;
use crate::error::{Error, Result};
use crate::synchro::Synchro;
use crate::types::{
    CodingType, MacroblockContext, Picture, Sequence, SEQUENCE_END_CODE, SEQUENCE_HEADER_CODE,
};

mod blocks;
mod headers;
mod motion;
mod slice;
pub mod vlc;

/// Backoff while the renderer has no free picture buffer.
pub(crate) const OUTMEM_SLEEP: std::time::Duration = std::time::Duration::from_millis(20);

pub struct VideoParser {
    pub(crate) reader: BitReader,
    pub(crate) sequence: Sequence,
    pub(crate) picture: Picture,
    pub(crate) mb: MacroblockContext,
    pub(crate) synchro: Arc<Mutex<Synchro>>,
    pub(crate) output: Arc<Mutex<dyn VideoOutput>>,
    pub(crate) pool: DecoderPool,
}

impl VideoParser {
    pub fn new(
        queue: Arc<ChunkQueue>,
        output: Arc<Mutex<dyn VideoOutput>>,
        config: DecoderConfig,
    ) -> Self {
        let synchro = Arc::new(Mutex::new(Synchro::new(
            config.synchro,
            Arc::clone(&config.time),
        )));
        let pool = DecoderPool::new(
            config.workers,
            Arc::clone(&output),
            Arc::clone(&synchro),
            config.grayscale,
        );
        Self {
            reader: BitReader::new(queue),
            sequence: Sequence::default(),
            picture: Picture::default(),
            mb: MacroblockContext::default(),
            synchro,
            output,
            pool,
        }
    }

    /// Decodes the stream to completion. Returns `Ok(())` at a sequence end
    /// code or when the input queue closes; propagates [`Error::Shutdown`]
    /// when the queue is killed.
    pub fn run(&mut self) -> Result<()> {
        let outcome = self.run_inner();
        self.flush();
        match outcome {
            Ok(()) | Err(Error::EndOfStream) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn run_inner(&mut self) -> Result<()> {
        self.next_sequence_header()?;
        loop {
            match self.parse_header() {
                Ok(false) => {}
                Ok(true) => {
                    tracing::debug!("sequence end code received");
                    return Ok(());
                }
                Err(Error::Unsupported(what)) => {
                    /* Fatal for this sequence, not for the stream: drop the
                     * in-flight picture and wait for the next sequence
                     * header. */
                    tracing::warn!("unsupported stream ({what}), seeking next sequence header");
                    self.recover_fatal();
                    self.next_sequence_header()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Recovery from a fatal stream error: destroy the picture under
    /// reconstruction and null out the reference that would have become
    /// backward.
    fn recover_fatal(&mut self) {
        self.pool.wait_idle();
        if let Some(picture) = self.picture.picture.take() {
            if picture.deccount.load(std::sync::atomic::Ordering::Acquire) != 1 {
                self.synchro.lock().unwrap().end(true);
                self.output.lock().unwrap().destroy_picture(picture);
            }
        }
        self.picture.current_structure = 0;
        self.sequence.backward = None;
    }

    /// Skips forward to the next sequence header.
    pub(crate) fn next_sequence_header(&mut self) -> Result<()> {
        loop {
            self.reader.next_start_code()?;
            if self.reader.show(32)? == SEQUENCE_HEADER_CODE {
                return Ok(());
            }
            self.reader.remove(8)?;
        }
    }

    /// Parses one top-level syntactic unit; `Ok(true)` means sequence end.
    pub(crate) fn parse_header(&mut self) -> Result<bool> {
        loop {
            self.reader.next_start_code()?;
            self.apply_pes_signals();
            match self.reader.get::<u32>(32)? {
                SEQUENCE_HEADER_CODE => {
                    self.sequence_header()?;
                    return Ok(false);
                }
                crate::types::GROUP_START_CODE => {
                    self.group_header()?;
                    return Ok(false);
                }
                crate::types::PICTURE_START_CODE => {
                    self.picture_header()?;
                    return Ok(false);
                }
                SEQUENCE_END_CODE => return Ok(true),
                _ => {}
            }
        }
    }

    /// Folds chunk-boundary metadata into the sequence context. A transport
    /// discontinuity poisons the current picture and arms a reference flush
    /// at the next picture header.
    pub(crate) fn apply_pes_signals(&mut self) {
        if let Some(signals) = self.reader.take_boundary() {
            if signals.pts != 0 {
                self.sequence.next_pts = signals.pts;
            }
            if signals.dts != 0 {
                self.sequence.next_dts = signals.dts;
            }
            self.sequence.current_rate = signals.rate;
            if signals.discontinuity {
                tracing::debug!("transport discontinuity, flushing references");
                self.picture.error = true;
                self.sequence.expect_discontinuity = true;
            }
        }
    }

    /// End-of-life: drain the pool, destroy the picture being built, date
    /// and release both references.
    fn flush(&mut self) {
        self.pool.wait_idle();
        if let Some(picture) = self.picture.picture.take() {
            /* deccount 1 means the last macroblock already published it. */
            if picture.deccount.load(std::sync::atomic::Ordering::Acquire) != 1 {
                self.synchro.lock().unwrap().end(true);
                self.output.lock().unwrap().destroy_picture(picture);
                self.reference_replace(CodingType::I, None);
            }
        }
        self.picture.current_structure = 0;
        /* The PTS parked for the next anchor belongs to the last reference
         * now that no further picture will claim it. */
        self.synchro.lock().unwrap().take_backward_pts();
        self.reference_update(CodingType::I, None);
        self.reference_update(CodingType::I, None);
    }

    /// The presentation date of the picture most recently rotated out, per
    /// the synchro's reordering rules.
    pub(crate) fn synchro_date(&self) -> i64 {
        self.synchro.lock().unwrap().date()
    }

    /// The synchroniser, shared with the reconstruction pool. Exposed for
    /// inspection (decode-time statistics).
    pub fn synchro(&self) -> Arc<Mutex<Synchro>> {
        Arc::clone(&self.synchro)
    }

    /// Reference rotation at a non-B picture: the old forward reference
    /// dies, the backward one gets its date and moves forward, the new
    /// picture (or a hole, when skipping) becomes backward. B pictures are
    /// dated immediately and never enter the rotation.
    pub(crate) fn reference_update(
        &mut self,
        coding_type: CodingType,
        new_ref: Option<lumiere_video::PictureHandle>,
    ) {
        if coding_type != CodingType::B {
            let date = self.synchro_date();
            let mut output = self.output.lock().unwrap();
            if let Some(backward) = self.sequence.backward.as_ref() {
                output.date_picture(backward, date);
            }
            self.sequence.forward = self.sequence.backward.take();
            self.sequence.backward = new_ref;
        } else if let Some(picture) = new_ref.as_ref() {
            let date = self.synchro_date();
            self.output.lock().unwrap().date_picture(picture, date);
        }
    }

    /// Replaces the would-be backward reference after a picture is
    /// destroyed mid-decode.
    pub(crate) fn reference_replace(
        &mut self,
        coding_type: CodingType,
        new_ref: Option<lumiere_video::PictureHandle>,
    ) {
        if coding_type != CodingType::B {
            self.sequence.backward = new_ref;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::EsChunk;
    use crate::types::{MatrixId, DEFAULT_INTRA_QUANT, SCAN, SCAN_ZIGZAG};
    use lumiere_video::{ChromaFormat, PictureBuffer, PictureHandle};

    struct NullOutput;

    impl VideoOutput for NullOutput {
        fn allocate_picture(
            &mut self,
            chroma: ChromaFormat,
            width: usize,
            height: usize,
        ) -> Option<PictureHandle> {
            Some(Arc::new(PictureBuffer::new(chroma, width, height)))
        }
        fn date_picture(&mut self, _picture: &PictureHandle, _date: i64) {}
        fn display_picture(&mut self, _picture: &PictureHandle, _repeat_period: u8) {}
        fn destroy_picture(&mut self, _picture: PictureHandle) {}
    }

    /// Minimal MSB-first bit sink for header fixtures.
    #[derive(Default)]
    struct Bits {
        bytes: Vec<u8>,
        acc: u32,
        n: u32,
    }

    impl Bits {
        fn put(&mut self, value: u32, bits: u32) {
            self.acc = (self.acc << bits) | value;
            self.n += bits;
            while self.n >= 8 {
                self.n -= 8;
                self.bytes.push((self.acc >> self.n) as u8);
            }
        }

        fn start_code(&mut self, code: u8) {
            if self.n != 0 {
                self.put(0, 8 - self.n);
            }
            self.bytes.extend_from_slice(&[0, 0, 1, code]);
        }

        fn into_parser(mut self) -> VideoParser {
            if self.n != 0 {
                self.put(0, 8 - self.n);
            }
            /* Terminate so header parsing stops deterministically. */
            self.bytes.extend_from_slice(&[0, 0, 1, 0xB7]);
            let queue = ChunkQueue::new(2);
            queue.push(EsChunk::from_data(self.bytes)).unwrap();
            queue.close();
            let output: Arc<Mutex<dyn VideoOutput>> = Arc::new(Mutex::new(NullOutput));
            VideoParser::new(queue, output, crate::decoder::DecoderConfig::default())
        }
    }

    /// The mandatory sequence_extension (progressive 4:2:0), so that
    /// further extensions are read from extension_and_user_data.
    fn sequence_ext(b: &mut Bits) {
        b.start_code(0xB5);
        b.put(1, 4);
        b.put(0x48, 8);
        b.put(1, 1);
        b.put(1, 2);
        b.put(0, 2);
        b.put(0, 2);
        b.put(0, 12);
        b.put(1, 1);
        b.put(0, 8);
        b.put(0, 1);
        b.put(0, 2);
        b.put(0, 5);
    }

    fn sequence_prefix(b: &mut Bits, load_intra: bool) {
        b.start_code(0xB3);
        b.put(720, 12);
        b.put(576, 12);
        b.put(2, 4); // aspect
        b.put(3, 4); // 25 fps
        b.put(0x3FFFF, 18);
        b.put(1, 1);
        b.put(0, 10);
        b.put(0, 1);
        b.put(load_intra as u32, 1);
        if load_intra {
            for i in 0..64u32 {
                b.put(i + 1, 8);
            }
        }
        b.put(0, 1); // default non-intra matrix
    }

    #[test]
    fn mpeg1_sequence_header_defaults() {
        let mut b = Bits::default();
        sequence_prefix(&mut b, false);
        let mut parser = b.into_parser();
        parser.run().unwrap();

        assert!(!parser.sequence.mpeg2);
        assert!(parser.sequence.progressive);
        assert_eq!(parser.sequence.width, 720);
        assert_eq!(parser.sequence.height, 576);
        assert_eq!(parser.sequence.mb_size, 45 * 36);
        assert_eq!(parser.sequence.frame_rate, 25 * 1001);
        assert_eq!(
            parser.sequence.matrix(MatrixId::Intra, false),
            &DEFAULT_INTRA_QUANT
        );
        // Chrominance aliases luminance until a matrix extension says
        // otherwise.
        assert_eq!(
            parser.sequence.matrix(MatrixId::Intra, true),
            &DEFAULT_INTRA_QUANT
        );
    }

    #[test]
    fn downloaded_matrix_is_stored_through_the_zigzag_scan() {
        let mut b = Bits::default();
        sequence_prefix(&mut b, true);
        let mut parser = b.into_parser();
        parser.run().unwrap();

        let matrix = parser.sequence.matrix(MatrixId::Intra, false);
        for i in 0..64 {
            assert_eq!(matrix[SCAN[SCAN_ZIGZAG][i] as usize], (i + 1) as u8);
        }
        // And the chroma alias follows it.
        assert_eq!(parser.sequence.matrix(MatrixId::Intra, true), matrix);
    }

    #[test]
    fn sequence_extension_promotes_to_mpeg2_interlaced() {
        let mut b = Bits::default();
        sequence_prefix(&mut b, false);
        b.start_code(0xB5);
        b.put(1, 4); // sequence_extension
        b.put(0x48, 8);
        b.put(0, 1); // interlaced
        b.put(1, 2); // 4:2:0
        b.put(0, 2);
        b.put(0, 2);
        b.put(0, 12);
        b.put(1, 1);
        b.put(0, 8);
        b.put(0, 1);
        b.put(0, 2);
        b.put(0, 5);
        let mut parser = b.into_parser();
        parser.run().unwrap();

        assert!(parser.sequence.mpeg2);
        assert!(!parser.sequence.progressive);
        // Interlaced: an even number of macroblock rows.
        assert_eq!(parser.sequence.mb_height, 36);
    }

    #[test]
    fn chroma_422_is_refused_at_main_profile() {
        let mut b = Bits::default();
        sequence_prefix(&mut b, false);
        b.start_code(0xB5);
        b.put(1, 4);
        b.put(0x48, 8);
        b.put(1, 1);
        b.put(2, 2); // 4:2:2
        b.put(0, 2);
        b.put(0, 2);
        b.put(0, 12);
        b.put(1, 1);
        b.put(0, 8);
        b.put(0, 1);
        b.put(0, 2);
        b.put(0, 5);
        let mut parser = b.into_parser();
        // The sequence is skipped, not fatal to the decoder: it hunts for
        // the next sequence header and runs off the end of the stream.
        parser.run().unwrap();
        assert_eq!(parser.sequence.chroma_format, ChromaFormat::Chroma422);
    }

    #[test]
    fn copyright_extension_is_recorded() {
        let mut b = Bits::default();
        sequence_prefix(&mut b, false);
        sequence_ext(&mut b);
        b.start_code(0xB5);
        b.put(4, 4); // copyright_extension
        b.put(1, 1); // copyright_flag
        b.put(0x23, 8); // copyright_identifier
        b.put(1, 1); // original
        b.put(0, 7); // reserved
        b.put(0, 1);
        b.put(0xBEEF, 20); // number, high part
        b.put(1, 1);
        b.put(0x15, 22);
        b.put(1, 1);
        b.put(0x2A, 22);
        let mut parser = b.into_parser();
        parser.run().unwrap();

        assert!(parser.sequence.copyright_flag);
        assert_eq!(parser.sequence.copyright_id, 0x23);
        assert!(parser.sequence.original);
        assert_eq!(
            parser.sequence.copyright_number,
            (0xBEEF << 44) | (0x15 << 22) | 0x2A
        );
    }

    #[test]
    fn group_header_is_skipped() {
        let mut b = Bits::default();
        sequence_prefix(&mut b, false);
        b.start_code(0xB8);
        b.put(0, 24);
        b.put(0, 3); // time code, closed_gop, broken_link
        let mut parser = b.into_parser();
        parser.run().unwrap();
        assert_eq!(parser.sequence.width, 720);
    }

    #[test]
    fn sequence_display_extension_sets_matrix_coefficients() {
        let mut b = Bits::default();
        sequence_prefix(&mut b, false);
        sequence_ext(&mut b);
        b.start_code(0xB5);
        b.put(2, 4); // sequence_display_extension
        b.put(0, 3); // video_format
        b.put(1, 1); // colour_description
        b.put(1, 8); // colour_primaries
        b.put(1, 8); // transfer_characteristics
        b.put(5, 8); // matrix_coefficients
        b.put(720, 14);
        b.put(1, 1);
        b.put(576, 14);
        let mut parser = b.into_parser();
        parser.run().unwrap();
        assert_eq!(parser.sequence.matrix_coefficients, 5);
    }
}
