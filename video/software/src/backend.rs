//! The software backend proper: a decoder thread per stream plus an
//! in-memory frame sink.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use lumiere_codec_mpeg12::{
    ChunkQueue, DecoderConfig, EsChunk, SynchroMode, VideoParser,
};
use lumiere_video::{ChromaFormat, DisplayPicture, PictureBuffer, PictureHandle, VideoOutput};

/// Stream-level options, the decoder knobs a player exposes.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Decoder worker threads; 0 decodes inline on the parser thread.
    pub workers: usize,
    /// Luma-only output.
    pub grayscale: bool,
    /// Picture-selection policy: `auto`, `I`, `I+`, `IP`, `IP+` or `IPB`.
    pub synchro: Option<String>,
}

impl StreamOptions {
    fn into_config(self) -> DecoderConfig {
        let synchro = match self.synchro.as_deref() {
            None => SynchroMode::Auto,
            Some(name) => name.parse().unwrap_or_else(|_| {
                tracing::warn!("unknown synchro mode {:?}, using auto", name);
                SynchroMode::Auto
            }),
        };
        DecoderConfig {
            workers: self.workers,
            grayscale: self.grayscale,
            synchro,
            ..DecoderConfig::default()
        }
    }
}

/// Renderer stand-in that accumulates finished frames in memory.
///
/// Pictures are handed out on demand, dated as the decoder learns their
/// presentation times, and queued on display; `take_frames` drains them in
/// presentation order, which is where B-frame reordering becomes visible.
#[derive(Default)]
pub struct FrameCollector {
    frames: Vec<(PictureHandle, u8)>,
    render_time: i64,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated rendering cost, fed to the frame-dropping budget.
    pub fn set_render_time(&mut self, micros: i64) {
        self.render_time = micros;
    }

    /// Finished frames so far, oldest presentation date first. Dates are
    /// read here rather than at display time: a reference picture is
    /// displayable as soon as its last macroblock lands, but learns its
    /// date at the following reference rotation.
    pub fn take_frames(&mut self) -> Vec<DisplayPicture> {
        let mut frames: Vec<DisplayPicture> = std::mem::take(&mut self.frames)
            .into_iter()
            .map(|(picture, repeat_period)| DisplayPicture {
                date: picture.date.load(Ordering::Acquire),
                picture,
                repeat_period,
            })
            .collect();
        frames.sort_by_key(|f| f.date);
        frames
    }
}

impl VideoOutput for FrameCollector {
    fn allocate_picture(
        &mut self,
        chroma: ChromaFormat,
        width: usize,
        height: usize,
    ) -> Option<PictureHandle> {
        Some(Arc::new(PictureBuffer::new(chroma, width, height)))
    }

    fn date_picture(&mut self, picture: &PictureHandle, date: i64) {
        picture.date.store(date, Ordering::Release);
    }

    fn display_picture(&mut self, picture: &PictureHandle, repeat_period: u8) {
        self.frames.push((picture.clone(), repeat_period));
    }

    fn destroy_picture(&mut self, _picture: PictureHandle) {}

    fn render_time(&self) -> i64 {
        self.render_time
    }
}

/// One decoding MPEG video stream: a chunk queue, a parser thread and a
/// frame sink.
pub struct Mpeg12Stream {
    queue: Arc<ChunkQueue>,
    collector: Arc<Mutex<FrameCollector>>,
    thread: Option<JoinHandle<lumiere_codec_mpeg12::Result<()>>>,
}

impl Mpeg12Stream {
    /// Spawns the decoder thread for a new stream.
    pub fn spawn(options: StreamOptions) -> Self {
        let queue = ChunkQueue::new(64);
        let collector = Arc::new(Mutex::new(FrameCollector::new()));
        let output: Arc<Mutex<dyn VideoOutput>> = collector.clone();
        let parser_queue = Arc::clone(&queue);
        let config = options.into_config();
        let thread = std::thread::Builder::new()
            .name("mpeg12 video parser".into())
            .spawn(move || VideoParser::new(parser_queue, output, config).run())
            .expect("spawning the video parser thread");
        Self {
            queue,
            collector,
            thread: Some(thread),
        }
    }

    /// Feeds one PES payload worth of elementary stream.
    pub fn submit(&self, chunk: EsChunk) -> lumiere_codec_mpeg12::Result<()> {
        self.queue.push(chunk)
    }

    /// Finished frames so far, in presentation order.
    pub fn take_frames(&self) -> Vec<DisplayPicture> {
        self.collector.lock().unwrap().take_frames()
    }

    /// Abort decoding; every blocked side wakes up.
    pub fn kill(&self) {
        self.queue.kill();
    }

    /// Declare end of stream, wait for the decoder and drain the frames.
    pub fn finish(mut self) -> lumiere_codec_mpeg12::Result<Vec<DisplayPicture>> {
        self.queue.close();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("video parser thread panicked")?;
        }
        Ok(self.take_frames())
    }
}

impl Drop for Mpeg12Stream {
    fn drop(&mut self) {
        self.queue.kill();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_map_to_config() {
        let options = StreamOptions {
            workers: 3,
            grayscale: true,
            synchro: Some("ip+".into()),
        };
        let config = options.into_config();
        assert_eq!(config.workers, 3);
        assert!(config.grayscale);
        assert_eq!(config.synchro, SynchroMode::IPPlus);

        let config = StreamOptions {
            synchro: Some("garbage".into()),
            ..Default::default()
        }
        .into_config();
        assert_eq!(config.synchro, SynchroMode::Auto);
    }

    #[test]
    fn collector_orders_frames_by_date() {
        let mut collector = FrameCollector::new();
        let a: PictureHandle = Arc::new(PictureBuffer::new(ChromaFormat::Chroma420, 16, 16));
        let b: PictureHandle = Arc::new(PictureBuffer::new(ChromaFormat::Chroma420, 16, 16));
        collector.date_picture(&a, 80_000);
        collector.date_picture(&b, 40_000);
        collector.display_picture(&a, 2);
        collector.display_picture(&b, 2);
        let frames = collector.take_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].date, 40_000);
        assert_eq!(frames[1].date, 80_000);
    }

    #[test]
    fn empty_stream_finishes_cleanly() {
        let stream = Mpeg12Stream::spawn(StreamOptions::default());
        let frames = stream.finish().unwrap();
        assert!(frames.is_empty());
    }
}
