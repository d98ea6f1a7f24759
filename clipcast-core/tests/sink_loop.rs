use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use clipcast_core::clip::testing::{fixed_prober, PendingFetcher, StubFetcher};
use clipcast_core::{
    CatalogPool, Clip, ClipHandle, EncoderRunner, MuxerInput, PreloadPool, SinkError,
    StreamSection, StreamingSink,
};

fn clip(id: &str) -> Clip {
    Clip {
        id: id.to_string(),
        url: String::new(),
        broadcaster_name: "caster".into(),
        title: "title".into(),
        game_id: "g".into(),
        duration: 10.0,
    }
}

/// Encoder stand-in: records the offset each clip was scheduled at and
/// writes a recognizable marker into the muxer input.
#[derive(Default)]
struct RecordingEncoder {
    offsets: Mutex<Vec<(String, Duration)>>,
    fail_on: Option<String>,
}

impl RecordingEncoder {
    fn failing_on(id: &str) -> Self {
        Self {
            offsets: Mutex::new(Vec::new()),
            fail_on: Some(id.to_string()),
        }
    }

    fn offsets(&self) -> Vec<(String, Duration)> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl EncoderRunner for RecordingEncoder {
    async fn stream_clip(
        &self,
        clip: &Clip,
        source: &Path,
        offset: Duration,
        _cancel: &CancellationToken,
        output: &mut MuxerInput,
    ) -> Result<(), SinkError> {
        assert!(source.exists(), "clip must be on disk while streaming");
        if self.fail_on.as_deref() == Some(clip.id.as_str()) {
            return Err(SinkError::Encoder {
                status: Some(1),
                stderr: "synthetic encoder failure".into(),
            });
        }
        self.offsets
            .lock()
            .unwrap()
            .push((clip.id.clone(), offset));
        output
            .write_all(format!("TS {}\n", clip.id).as_bytes())
            .await
            .map_err(SinkError::Io)?;
        Ok(())
    }
}

fn sink_with(
    pool: Arc<CatalogPool>,
    encoder: Arc<RecordingEncoder>,
) -> (StreamingSink, Arc<RecordingEncoder>) {
    let stream = StreamSection::default();
    let preload = PreloadPool::new(pool, stream.preload_count, stream.preload_workers);
    let sink = StreamingSink::new(
        "rtmp://live.example.com/app/key",
        &stream,
        preload,
        Some(encoder.clone() as Arc<dyn EncoderRunner>),
    );
    (sink, encoder)
}

/// In-memory stand-in for the muxer stdin; returns the reader task that
/// collects everything the sink spliced.
fn memory_muxer() -> (MuxerInput, tokio::task::JoinHandle<String>) {
    let (writer, mut reader) = tokio::io::duplex(1 << 20);
    let collector = tokio::spawn(async move {
        let mut all = String::new();
        let _ = reader.read_to_string(&mut all).await;
        all
    });
    (Box::new(writer), collector)
}

#[tokio::test]
async fn offsets_advance_by_measured_duration_plus_gap() {
    let dir = TempDir::new().unwrap();
    let pool = Arc::new(CatalogPool::new());
    for i in 0..5 {
        pool.insert(ClipHandle::new(
            clip(&format!("clip-{i}")),
            dir.path(),
            StubFetcher::succeeding(),
            fixed_prober(10.0),
        ));
    }
    let (sink, encoder) = sink_with(pool, Arc::new(RecordingEncoder::default()));
    let (input, collector) = memory_muxer();
    let cancel = CancellationToken::new();

    sink.stream_to(&cancel, input).await.unwrap();

    let offsets = encoder.offsets();
    assert_eq!(offsets.len(), 5);
    // 10 s measured + 1 s artificial gap per clip
    let expected = [0u64, 11, 22, 33, 44];
    for ((_, offset), want) in offsets.iter().zip(expected) {
        assert_eq!(*offset, Duration::from_secs(want));
    }

    let spliced = collector.await.unwrap();
    assert_eq!(spliced.lines().count(), 5);

    // every streamed clip was released
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn failed_clips_are_skipped_without_touching_the_timeline() {
    let dir = TempDir::new().unwrap();
    let pool = Arc::new(CatalogPool::new());
    pool.insert(ClipHandle::new(
        clip("good-1"),
        dir.path(),
        StubFetcher::succeeding(),
        fixed_prober(10.0),
    ));
    pool.insert(ClipHandle::new(
        clip("bad"),
        dir.path(),
        StubFetcher::failing(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
        fixed_prober(10.0),
    ));
    pool.insert(ClipHandle::new(
        clip("good-2"),
        dir.path(),
        StubFetcher::succeeding(),
        fixed_prober(10.0),
    ));
    let (sink, encoder) = sink_with(pool, Arc::new(RecordingEncoder::default()));
    let (input, _collector) = memory_muxer();
    let cancel = CancellationToken::new();

    sink.stream_to(&cancel, input).await.unwrap();

    let offsets = encoder.offsets();
    assert_eq!(offsets.len(), 2, "the broken clip never reaches the encoder");
    assert_eq!(offsets[0].1, Duration::from_secs(0));
    assert_eq!(offsets[1].1, Duration::from_secs(11));
    assert!(offsets.iter().all(|(id, _)| id != "bad"));
}

#[tokio::test]
async fn encoder_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let pool = Arc::new(CatalogPool::new());
    pool.insert(ClipHandle::new(
        clip("doomed"),
        dir.path(),
        StubFetcher::succeeding(),
        fixed_prober(10.0),
    ));
    let (sink, _encoder) = sink_with(pool, Arc::new(RecordingEncoder::failing_on("doomed")));
    let (input, _collector) = memory_muxer();
    let cancel = CancellationToken::new();

    let err = sink.stream_to(&cancel, input).await.unwrap_err();
    assert!(matches!(err, SinkError::Encoder { .. }));
    // the failed clip was still released
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn empty_catalog_reports_no_clips() {
    let pool = Arc::new(CatalogPool::new());
    let (sink, _encoder) = sink_with(pool, Arc::new(RecordingEncoder::default()));
    let (input, _collector) = memory_muxer();
    let cancel = CancellationToken::new();

    let err = sink.stream_to(&cancel, input).await.unwrap_err();
    assert!(matches!(err, SinkError::NoClips));
}

#[tokio::test]
async fn cancellation_ends_the_run_cleanly() {
    let dir = TempDir::new().unwrap();
    let pool = Arc::new(CatalogPool::new());
    for i in 0..3 {
        pool.insert(ClipHandle::new(
            clip(&format!("stuck-{i}")),
            dir.path(),
            Arc::new(PendingFetcher),
            fixed_prober(10.0),
        ));
    }
    let (sink, encoder) = sink_with(pool, Arc::new(RecordingEncoder::default()));
    let (input, _collector) = memory_muxer();
    let cancel = CancellationToken::new();

    let (result, _) = tokio::join!(sink.stream_to(&cancel, input), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    assert!(result.is_ok(), "cancellation is a normal termination");
    assert!(encoder.offsets().is_empty());
}
