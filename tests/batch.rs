mod common;

use std::sync::Arc;

use common::CountingDecoder;
use unwatermark::{
    BatchOptions, BatchProcessor, Encoder, Error, ItemError, ItemStatus, Notice, OutputFormat,
    OutputSpec, Phase, ValidationError,
};

fn batch(engine: &unwatermark::WatermarkEngine, count: usize) -> Vec<unwatermark::SourceFile> {
    (0..count)
        .map(|i| common::png_file(engine, &format!("photo {i}.png"), 160, 120))
        .collect()
}

#[tokio::test]
async fn one_corrupt_file_does_not_stop_the_batch() {
    let (_dir, engine) = common::engine();
    let processor = BatchProcessor::new(Arc::clone(&engine));

    let mut files = batch(&engine, 4);
    files.insert(2, common::corrupt_file("broken.png"));

    let summary = processor
        .process(files, OutputSpec::new(OutputFormat::Jpeg, 0.9))
        .await
        .unwrap();

    assert_eq!((summary.total, summary.completed, summary.failed), (5, 4, 1));
    assert!(!summary.superseded);
    assert!(summary.first_error.unwrap().contains("broken.png"));

    let items = processor.items();
    assert_eq!(items[2].status, ItemStatus::Error);
    assert!(items[2].error.is_some());
    assert_eq!(items[2].label, "Failed");
    assert_eq!(items[0].label, "Done");
    assert!(processor.output(2).is_none());
    assert_eq!(
        items[0].output_filename.as_deref(),
        Some("unwatermarked_photo_0.jpg")
    );

    let archive = processor.archive().unwrap();
    assert_eq!(archive.entries.len(), 4);
    assert!(archive.name.starts_with("unwatermarked_"));
    assert!(archive.name.ends_with(".zip"));
    assert!(archive
        .entries
        .iter()
        .all(|e| e.filename.ends_with(".jpg")));

    let progress = processor.progress();
    assert_eq!(progress.phase, Phase::Processed);
    assert_eq!((progress.done, progress.total), (5, 5));
}

#[tokio::test]
async fn batch_size_limits() {
    let (_dir, engine) = common::engine();
    let processor = BatchProcessor::new(Arc::clone(&engine));

    let err = processor
        .process(vec![], OutputSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::EmptyBatch)));

    let err = processor
        .process(batch(&engine, 11), OutputSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::TooManyFiles { count: 11, max: 10 })
    ));
    assert!(processor.items().is_empty());

    let summary = processor
        .process(batch(&engine, 10), OutputSpec::default())
        .await
        .unwrap();
    assert_eq!(summary.completed, 10);
}

#[tokio::test]
async fn reprocessing_reuses_decoded_rasters() {
    let (_dir, engine) = common::engine();
    let decoder = Arc::new(CountingDecoder::default());
    let processor = BatchProcessor::new(Arc::clone(&engine)).with_decoder(decoder.clone());

    processor
        .process(batch(&engine, 3), OutputSpec::new(OutputFormat::Png, 1.0))
        .await
        .unwrap();
    assert_eq!(decoder.calls(), 3);
    assert_eq!(processor.live_outputs(), 3);
    let first = processor.output(0).unwrap();

    let summary = processor
        .run(OutputSpec::new(OutputFormat::Webp, 0.5))
        .await
        .unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(decoder.calls(), 3, "decoded rasters must be reused");
    assert_eq!(processor.live_outputs(), 3, "old outputs must be released");

    let second = processor.output(0).unwrap();
    assert_eq!(first.filename, "unwatermarked_photo_0.png");
    assert_eq!(second.filename, "unwatermarked_photo_0.webp");
    let decoded = image::load_from_memory(&second.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (160, 120));
}

#[tokio::test]
async fn superseded_run_does_not_write_into_newer_run() {
    let (_dir, engine) = common::engine();
    let decoder = Arc::new(CountingDecoder::default());
    let processor = BatchProcessor::new(Arc::clone(&engine)).with_decoder(decoder.clone());
    processor.load(batch(&engine, 5)).unwrap();

    let (a, b) = tokio::join!(
        processor.run(OutputSpec::new(OutputFormat::Png, 1.0)),
        processor.run(OutputSpec::new(OutputFormat::Jpeg, 0.8)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.superseded != b.superseded, "exactly one run must win");
    let winner = if a.superseded { b } else { a };
    assert_eq!(winner.completed, 5);
    assert_eq!(decoder.calls(), 5);
    assert_eq!(processor.live_outputs(), 5);
    assert!(processor
        .items()
        .iter()
        .all(|item| item.status == ItemStatus::Completed));
}

#[tokio::test]
async fn loading_a_batch_mid_run_supersedes_the_run() {
    let (_dir, engine) = common::engine();
    let decoder = Arc::new(CountingDecoder::default());
    let processor = BatchProcessor::new(Arc::clone(&engine)).with_decoder(decoder.clone());
    processor.load(batch(&engine, 3)).unwrap();
    let replacement = vec![
        common::png_file(&engine, "next a.png", 160, 120),
        common::png_file(&engine, "next b.png", 160, 120),
    ];

    let (summary, loaded) = tokio::join!(
        processor.run(OutputSpec::new(OutputFormat::Png, 1.0)),
        async {
            // let the workers get past decoding first
            tokio::task::yield_now().await;
            processor.load(replacement)
        },
    );
    assert_eq!(loaded.unwrap(), 2);
    assert!(summary.unwrap().superseded);

    let items = processor.items();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.status == ItemStatus::Queued));
    assert!(items[0].name.starts_with("next"));
    assert_eq!(processor.live_outputs(), 0);
    let progress = processor.progress();
    assert_eq!(progress.phase, Phase::Ready);
    assert_eq!((progress.done, progress.total), (0, 2));

    let before = decoder.calls();
    let summary = processor.run(OutputSpec::default()).await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(decoder.calls(), before + 2, "new items must decode their own sources");
    assert_eq!(processor.live_outputs(), 2);
}

#[tokio::test]
async fn reset_mid_run_supersedes_the_run() {
    let (_dir, engine) = common::engine();
    let processor = BatchProcessor::new(Arc::clone(&engine));
    processor.load(batch(&engine, 4)).unwrap();

    let (summary, ()) = tokio::join!(
        processor.run(OutputSpec::new(OutputFormat::Jpeg, 0.9)),
        async {
            tokio::task::yield_now().await;
            processor.reset();
        },
    );
    assert!(summary.unwrap().superseded);
    assert!(processor.items().is_empty());
    assert_eq!(processor.live_outputs(), 0);
    assert!(processor.archive().is_none());
    assert_eq!(processor.progress().phase, Phase::Idle);
}

#[tokio::test]
async fn rerun_decodes_only_items_that_failed_to_decode() {
    let (_dir, engine) = common::engine();
    let decoder = Arc::new(CountingDecoder::default());
    let processor = BatchProcessor::new(Arc::clone(&engine)).with_decoder(decoder.clone());

    let mut files = batch(&engine, 3);
    files.push(common::corrupt_file("broken.png"));
    let summary = processor
        .process(files, OutputSpec::default())
        .await
        .unwrap();
    assert_eq!((summary.completed, summary.failed), (3, 1));
    assert_eq!(decoder.calls(), 4);

    let summary = processor
        .run(OutputSpec::new(OutputFormat::Jpeg, 0.8))
        .await
        .unwrap();
    assert_eq!((summary.completed, summary.failed), (3, 1));
    assert_eq!(decoder.calls(), 5, "only the undecodable item is retried");
    assert_eq!(processor.items()[3].status, ItemStatus::Error);
}

#[tokio::test]
async fn new_batch_and_reset_release_outputs() {
    let (_dir, engine) = common::engine();
    let processor = BatchProcessor::new(Arc::clone(&engine));

    processor
        .process(batch(&engine, 4), OutputSpec::default())
        .await
        .unwrap();
    assert_eq!(processor.live_outputs(), 4);

    processor
        .process(batch(&engine, 2), OutputSpec::default())
        .await
        .unwrap();
    assert_eq!(processor.live_outputs(), 2);
    assert_eq!(processor.items().len(), 2);

    processor.reset();
    assert_eq!(processor.live_outputs(), 0);
    assert!(processor.items().is_empty());
    assert!(processor.archive().is_none());
    assert!(matches!(
        processor.run(OutputSpec::default()).await,
        Err(Error::Validation(ValidationError::EmptyBatch))
    ));
}

#[tokio::test]
async fn too_small_image_fails_alone() {
    let (_dir, engine) = common::engine();
    let processor = BatchProcessor::new(Arc::clone(&engine));
    let tiny = common::encode_png(&common::scene(50, 50));
    let files = vec![
        unwatermark::SourceFile::new("tiny.png", "image/png", tiny),
        common::png_file(&engine, "ok.png", 160, 120),
    ];

    let summary = processor.process(files, OutputSpec::default()).await.unwrap();
    assert_eq!((summary.completed, summary.failed), (1, 1));
    let items = processor.items();
    assert_eq!(
        items[0].error.as_deref(),
        Some(ItemError::ImageTooSmall { width: 50, height: 50, logo_size: 48 }.to_string().as_str())
    );
}

#[tokio::test]
async fn missing_quantizer_degrades_once_per_run() {
    let (_dir, engine) = common::engine();
    let processor = BatchProcessor::new(Arc::clone(&engine))
        .with_encoder(Encoder::without_palette_encoder());

    let summary = processor
        .process(batch(&engine, 3), OutputSpec::new(OutputFormat::Png, 0.5))
        .await
        .unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.notice, Some(Notice::QuantizerUnavailable));

    let download = processor.output(1).unwrap();
    let decoded = image::load_from_memory(&download.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (160, 120));
}

#[tokio::test]
async fn progress_is_published_to_subscribers() {
    let (_dir, engine) = common::engine();
    let processor = BatchProcessor::new(Arc::clone(&engine)).with_options(BatchOptions {
        workers: 3,
        max_files: 10,
    });
    let mut progress = processor.subscribe();

    processor
        .process(batch(&engine, 4), OutputSpec::default())
        .await
        .unwrap();

    assert!(progress.has_changed().unwrap());
    let last = *progress.borrow_and_update();
    assert_eq!(last.phase, Phase::Processed);
    assert_eq!((last.done, last.total), (4, 4));
}
