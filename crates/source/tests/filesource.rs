//! Integration tests driving the file source against the in-memory store.

use bytes::Bytes;
use chainstream_forkable::{ForkableBuilder, ForkableObject};
use chainstream_source::{
    BlockIndexer, BlockNumGate, FileSourceBuilder, FileSourceFactory, SourceError, SourceObject,
    SourceResult,
    mem::{JsonBlockReaderFactory, MemObjectStore},
};
use chainstream_types::{Block, BlockNum, BlockRef, Cursor, Step, handler_fn};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

fn blk(num: u64, lib: u64) -> Block {
    Block::new(format!("{num}a"), num, format!("{}a", num - 1), lib)
}

fn chain(range: std::ops::RangeInclusive<u64>) -> Vec<Block> {
    range.map(|num| blk(num, 1)).collect()
}

fn r(id: &str, num: u64) -> BlockRef {
    BlockRef::new(id, num)
}

type Seen = Arc<Mutex<Vec<u64>>>;

fn collecting_nums() -> (
    Seen,
    chainstream_types::HandlerFn<
        impl FnMut(Arc<Block>, SourceObject<()>) -> chainstream_types::HandlerResult,
    >,
) {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    let handler = handler_fn(move |block: Arc<Block>, _obj: SourceObject<()>| {
        sink.lock().unwrap().push(block.num);
        Ok(())
    });
    (seen, handler)
}

#[tokio::test]
async fn streams_bundles_in_order_until_stop() {
    let store = MemObjectStore::new();
    store.put_bundle(0, &chain(1..=99));
    store.put_bundle(100, &chain(100..=199));

    let (seen, handler) = collecting_nums();
    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 95)
        .stop_block_num(150)
        .build(handler);
    let progress = source.progress();

    source.run().await.unwrap();

    let nums = seen.lock().unwrap().clone();
    assert_eq!(nums.first(), Some(&95));
    assert_eq!(nums.last(), Some(&199));
    assert!(nums.windows(2).all(|w| w[0] < w[1]), "blocks must arrive in ascending order");
    assert_eq!(progress.highest_processed_block(), Some(r("199a", 199)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_preprocess_preserves_order() {
    let store = MemObjectStore::new();
    store.put_bundle(0, &chain(1..=10));

    let delivered: Arc<Mutex<Vec<(u64, Option<u64>)>>> = Arc::default();
    let sink = delivered.clone();
    let handler = handler_fn(move |block: Arc<Block>, obj: SourceObject<u64>| {
        sink.lock().unwrap().push((block.num, obj.obj));
        Ok(())
    });

    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1)
        .stop_block_num(10)
        .concurrent_preprocess(
            |block| {
                // later blocks preprocess faster, earlier ones slower
                std::thread::sleep(Duration::from_millis(3 * (11 - block.num)));
                Ok(block.num * 2)
            },
            4,
        )
        .build(handler);

    source.run().await.unwrap();

    let delivered = delivered.lock().unwrap().clone();
    let expected: Vec<(u64, Option<u64>)> = (1..=10).map(|n| (n, Some(n * 2))).collect();
    assert_eq!(delivered, expected);
}

#[tokio::test(start_paused = true)]
async fn missing_bundle_is_retried_until_it_appears() {
    let store = MemObjectStore::new();

    let (seen, handler) = collecting_nums();
    let source = FileSourceBuilder::new(store.clone(), JsonBlockReaderFactory, 1)
        .stop_block_num(5)
        .retry_delay(Duration::from_secs(4))
        .build(handler);

    // the bundle appears after two retry windows have elapsed
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        store.put_bundle(0, &chain(1..=5));
    });

    source.run().await.unwrap();
    assert_eq!(seen.lock().unwrap().clone(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn gator_drops_blocks_before_preprocessing() {
    let store = MemObjectStore::new();
    store.put_bundle(0, &chain(1..=10));

    let (seen, handler) = collecting_nums();
    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1)
        .stop_block_num(10)
        .gator(BlockNumGate::new(5))
        .build(handler);

    source.run().await.unwrap();
    assert_eq!(seen.lock().unwrap().clone(), vec![5, 6, 7, 8, 9, 10]);
}

struct SparseIndex;

impl BlockIndexer for SparseIndex {
    fn blocks_in_range(&self, base: BlockNum, _bundle_size: u64) -> SourceResult<Vec<BlockNum>> {
        Ok(match base {
            0 => vec![10, 50],
            _ => vec![],
        })
    }
}

#[tokio::test]
async fn block_indexer_restricts_delivered_blocks() {
    let store = MemObjectStore::new();
    store.put_bundle(0, &chain(1..=99));

    let (seen, handler) = collecting_nums();
    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1)
        .stop_block_num(60)
        .block_indexer(SparseIndex)
        .build(handler);

    source.run().await.unwrap();
    // the start block is synthesized, then only indexed blocks flow
    assert_eq!(seen.lock().unwrap().clone(), vec![1, 10, 50]);
}

#[tokio::test]
async fn handler_error_shuts_the_source_down() {
    let store = MemObjectStore::new();
    store.put_bundle(0, &chain(1..=99));

    let seen: Seen = Arc::default();
    let sink = seen.clone();
    let handler = handler_fn(move |block: Arc<Block>, _obj: SourceObject<()>| {
        if block.num == 3 {
            return Err("handler gave up".into());
        }
        sink.lock().unwrap().push(block.num);
        Ok(())
    });

    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1).build(handler);
    let err = source.run().await.unwrap_err();
    assert!(matches!(err, SourceError::Handler(_)));
    assert_eq!(seen.lock().unwrap().clone(), vec![1, 2]);
}

#[tokio::test]
async fn preprocess_error_shuts_the_source_down() {
    let store = MemObjectStore::new();
    store.put_bundle(0, &chain(1..=99));

    let handler = handler_fn(move |_block: Arc<Block>, _obj: SourceObject<u64>| Ok(()));
    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1)
        .concurrent_preprocess(
            |block| {
                if block.num == 3 { Err("cannot decode payload".into()) } else { Ok(block.num) }
            },
            2,
        )
        .build(handler);

    let err = source.run().await.unwrap_err();
    assert!(matches!(err, SourceError::Preprocess { .. }));
}

#[tokio::test]
async fn undecodable_bundle_is_fatal() {
    let store = MemObjectStore::new();
    store.put("0000000000", Bytes::from_static(&[5, 0, 0, 0, b'x', b'x', b'x', b'x', b'x']));

    let (_seen, handler) = collecting_nums();
    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1).build(handler);
    let err = source.run().await.unwrap_err();
    assert!(matches!(err, SourceError::Bundle { .. }));
}

#[tokio::test(start_paused = true)]
async fn external_cancellation_stops_cleanly() {
    let store = MemObjectStore::new(); // no bundles: the source keeps retrying

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
    });

    let (seen, handler) = collecting_nums();
    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1)
        .cancel_token(token)
        .build(handler);

    source.run().await.unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

type Delivered = Arc<Mutex<Vec<(String, Option<Step>)>>>;

fn collecting_steps() -> (
    Delivered,
    chainstream_types::HandlerFn<
        impl FnMut(Arc<Block>, SourceObject<()>) -> chainstream_types::HandlerResult,
    >,
) {
    let delivered: Delivered = Arc::default();
    let sink = delivered.clone();
    let handler = handler_fn(move |block: Arc<Block>, obj: SourceObject<()>| {
        sink.lock().unwrap().push((block.id.clone(), obj.cursor.step));
        Ok(())
    });
    (delivered, handler)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cursor_resume_on_canonical_chain_passes_through() {
    let merged = MemObjectStore::new();
    merged.put_bundle(0, &chain(1..=10));
    let one_blocks = MemObjectStore::new();

    let (delivered, handler) = collecting_steps();
    let factory = FileSourceFactory::new(merged, one_blocks, JsonBlockReaderFactory)
        .stop_block_num(10);

    let cursor = Cursor::new(Step::New, r("5a", 5), r("5a", 5), r("3a", 3));
    let source = factory.source_from_cursor(&cursor, handler).unwrap();
    source.run().await.unwrap();

    let ids: Vec<String> = delivered.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(ids, ["6a", "7a", "8a", "9a", "10a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cursor_resume_from_fork_unwinds_first() {
    let merged = MemObjectStore::new();
    merged.put_bundle(0, &chain(1..=8));

    // the consumer followed 5b, a dead fork of 4a, known only as a one-block
    let fork_block = Block::new("5b", 5, "4a", 1);
    let one_blocks = MemObjectStore::new();
    one_blocks.put_one_block(&fork_block);

    let (delivered, handler) = collecting_steps();
    let factory = FileSourceFactory::new(merged, one_blocks, JsonBlockReaderFactory)
        .stop_block_num(8);

    let cursor = Cursor::new(Step::New, r("5b", 5), r("5b", 5), r("3a", 3));
    let source = factory.source_from_cursor(&cursor, handler).unwrap();
    source.run().await.unwrap();

    let delivered = delivered.lock().unwrap().clone();
    let ids: Vec<&str> = delivered.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["5b", "5a", "6a", "7a", "8a"]);
    assert_eq!(delivered[0].1, Some(Step::Undo));
    assert!(delivered[1..].iter().all(|(_, step)| *step == Some(Step::NewIrreversible)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cursor_resume_fails_without_fork_ancestry() {
    let merged = MemObjectStore::new();
    merged.put_bundle(0, &chain(1..=8));
    let one_blocks = MemObjectStore::new(); // fork block missing

    let (_delivered, handler) = collecting_steps();
    let factory = FileSourceFactory::new(merged, one_blocks, JsonBlockReaderFactory)
        .stop_block_num(8);

    let cursor = Cursor::new(Step::New, r("5b", 5), r("5b", 5), r("3a", 3));
    let source = factory.source_from_cursor(&cursor, handler).unwrap();
    assert!(source.run().await.is_err());
}

#[tokio::test]
async fn empty_cursor_cannot_resume() {
    let factory = FileSourceFactory::new(
        MemObjectStore::new(),
        MemObjectStore::new(),
        JsonBlockReaderFactory,
    );
    let (_delivered, handler) = collecting_steps();
    assert!(factory.source_from_cursor(&Cursor::empty(), handler).is_err());
}

#[tokio::test]
async fn file_source_feeds_forkable() {
    let store = MemObjectStore::new();
    store.put_bundle(
        0,
        &[blk(1, 1), blk(2, 1), blk(3, 2), blk(4, 3), blk(5, 4)],
    );

    let events: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = events.clone();
    let forkable = ForkableBuilder::new().build(handler_fn(
        move |_block: Arc<Block>, obj: ForkableObject<SourceObject<()>>| {
            sink.lock().unwrap().push(format!("{}:{}", obj.step(), obj.block().id()));
            Ok(())
        },
    ));

    let source = FileSourceBuilder::new(store, JsonBlockReaderFactory, 1)
        .stop_block_num(5)
        .build(forkable);
    source.run().await.unwrap();

    assert_eq!(
        events.lock().unwrap().clone(),
        [
            "new-irreversible:1a",
            "new:2a",
            "new:3a",
            "irreversible:2a",
            "new:4a",
            "irreversible:3a",
            "new:5a",
            "irreversible:4a",
        ]
    );
}
