//! The file-backed block source.
//!
//! Streams historical blocks out of fixed-size bundles in an object store:
//! the main loop probes bundle files in order (retrying missing ones at a
//! fixed delay), a reader task decodes each bundle and fans blocks into a
//! bounded preprocessing stage, and a sink task delivers the rejoined,
//! strictly ordered stream to the handler.
//!
//! # Ordering and backpressure
//!
//! The bundle channel has capacity 1, which serialises bundle boundaries
//! while the next bundle is prepared. Within a bundle, preprocessing runs
//! on up to `preprocessor_threads` blocks concurrently, but results are
//! forwarded in read order through a FIFO of per-block result channels. A
//! slow handler therefore blocks the sink, which blocks the reader, which
//! blocks the main loop.

use crate::{
    BlockIndexer, BlockReader, BlockReaderFactory, Gator, ObjectStore, Shutdown, SourceError,
    SourceResult,
};
use chainstream_types::{
    Block, BlockNum, BlockRef, Cursor, Handler, HandlerError, PreprocessedBlock, Step,
};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default number of blocks per bundle file.
pub const DEFAULT_BUNDLE_SIZE: u64 = 100;

/// Default delay between probes for a missing bundle.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(4);

/// Process-wide count of bundle files currently open (diagnostic only).
static OPEN_FILES: AtomicI64 = AtomicI64::new(0);

/// The number of bundle files currently open across all sources.
pub fn open_files_count() -> i64 {
    OPEN_FILES.load(Ordering::Relaxed)
}

struct OpenFilesGuard;

impl OpenFilesGuard {
    fn enter(filename: &str) -> Self {
        let count = OPEN_FILES.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(count, filename, "open files");
        Self
    }
}

impl Drop for OpenFilesGuard {
    fn drop(&mut self) {
        OPEN_FILES.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The bundle filename for a base block number: its zero-padded 10-digit
/// decimal representation.
pub fn bundle_filename(base: BlockNum) -> String {
    format!("{base:010}")
}

/// A preprocessing function applied to every block before delivery.
pub type PreprocessFunc<O> =
    Arc<dyn Fn(Arc<Block>) -> Result<O, HandlerError> + Send + Sync + 'static>;

/// The object delivered by a file source alongside every block.
///
/// Carries a bootstrap resume cursor (the block is final by definition in
/// a historical bundle) and the preprocessing result, if a preprocessor is
/// configured.
#[derive(Debug, Clone)]
pub struct SourceObject<O> {
    /// The resume cursor for this block.
    pub cursor: Cursor,
    /// The preprocessing result, if any.
    pub obj: Option<O>,
}

/// One bundle in flight between the main loop and the sink.
struct IncomingBlocksFile<O> {
    filename: String,
    blocks: mpsc::Receiver<PreprocessedBlock<SourceObject<O>>>,
}

/// Handle observing the progress of a running source.
#[derive(Debug, Clone, Default)]
pub struct SourceProgress {
    highest: Arc<Mutex<Option<BlockRef>>>,
}

impl SourceProgress {
    /// The highest block delivered to the handler so far.
    pub fn highest_processed_block(&self) -> Option<BlockRef> {
        self.highest.lock().clone()
    }
}

/// Builder for [`FileSource`] instances.
pub struct FileSourceBuilder<S, F, O = ()> {
    store: Arc<S>,
    reader_factory: Arc<F>,
    start_block_num: BlockNum,
    stop_block_num: BlockNum,
    bundle_size: u64,
    retry_delay: Duration,
    preprocessor_threads: usize,
    preprocess: Option<PreprocessFunc<O>>,
    gator: Option<Arc<dyn Gator>>,
    block_indexer: Option<Arc<dyn BlockIndexer>>,
    cancel_token: Option<CancellationToken>,
}

impl<S, F, O> std::fmt::Debug for FileSourceBuilder<S, F, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSourceBuilder")
            .field("start_block_num", &self.start_block_num)
            .field("stop_block_num", &self.stop_block_num)
            .field("bundle_size", &self.bundle_size)
            .finish_non_exhaustive()
    }
}

impl<S, F> FileSourceBuilder<S, F, ()> {
    /// Start building a source reading bundles from `store`, decoding them
    /// with `reader_factory`, starting at `start_block_num`.
    pub fn new(store: S, reader_factory: F, start_block_num: BlockNum) -> Self {
        Self::from_shared(Arc::new(store), Arc::new(reader_factory), start_block_num)
    }

    pub(crate) fn from_shared(
        store: Arc<S>,
        reader_factory: Arc<F>,
        start_block_num: BlockNum,
    ) -> Self {
        Self {
            store,
            reader_factory,
            start_block_num,
            stop_block_num: 0,
            bundle_size: DEFAULT_BUNDLE_SIZE,
            retry_delay: DEFAULT_RETRY_DELAY,
            preprocessor_threads: 1,
            preprocess: None,
            gator: None,
            block_indexer: None,
            cancel_token: None,
        }
    }
}

impl<S, F, O> FileSourceBuilder<S, F, O> {
    /// Stop once the bundle containing this block has been dispatched
    /// (zero means open-ended).
    #[must_use]
    pub const fn stop_block_num(mut self, stop_block_num: BlockNum) -> Self {
        self.stop_block_num = stop_block_num;
        self
    }

    /// The number of blocks per bundle file.
    #[must_use]
    pub const fn bundle_size(mut self, bundle_size: u64) -> Self {
        self.bundle_size = bundle_size;
        self
    }

    /// The delay between probes for a bundle that does not exist yet.
    #[must_use]
    pub const fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Drop blocks rejected by the gate before preprocessing.
    #[must_use]
    pub fn gator(mut self, gator: impl Gator + 'static) -> Self {
        self.gator = Some(Arc::new(gator));
        self
    }

    /// Skip bundles and blocks according to a sparse block index.
    #[must_use]
    pub fn block_indexer(mut self, indexer: impl BlockIndexer + 'static) -> Self {
        self.block_indexer = Some(Arc::new(indexer));
        self
    }

    /// Drive shutdown from an external cancellation token.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Preprocess every block with `preprocess`, running up to `threads`
    /// blocks concurrently. Output order is unaffected.
    #[must_use]
    pub fn concurrent_preprocess<O2>(
        self,
        preprocess: impl Fn(Arc<Block>) -> Result<O2, HandlerError> + Send + Sync + 'static,
        threads: usize,
    ) -> FileSourceBuilder<S, F, O2> {
        FileSourceBuilder {
            store: self.store,
            reader_factory: self.reader_factory,
            start_block_num: self.start_block_num,
            stop_block_num: self.stop_block_num,
            bundle_size: self.bundle_size,
            retry_delay: self.retry_delay,
            preprocessor_threads: threads,
            preprocess: Some(Arc::new(preprocess)),
            gator: self.gator,
            block_indexer: self.block_indexer,
            cancel_token: self.cancel_token,
        }
    }

    pub(crate) fn preprocess_shared<O2>(
        self,
        preprocess: Option<PreprocessFunc<O2>>,
        threads: usize,
    ) -> FileSourceBuilder<S, F, O2> {
        FileSourceBuilder {
            store: self.store,
            reader_factory: self.reader_factory,
            start_block_num: self.start_block_num,
            stop_block_num: self.stop_block_num,
            bundle_size: self.bundle_size,
            retry_delay: self.retry_delay,
            preprocessor_threads: threads,
            preprocess,
            gator: self.gator,
            block_indexer: self.block_indexer,
            cancel_token: self.cancel_token,
        }
    }

    pub(crate) fn shared_gator(mut self, gator: Arc<dyn Gator>) -> Self {
        self.gator = Some(gator);
        self
    }

    pub(crate) fn shared_block_indexer(mut self, indexer: Arc<dyn BlockIndexer>) -> Self {
        self.block_indexer = Some(indexer);
        self
    }

    /// Attach the handler and build the source.
    pub fn build<H>(self, handler: H) -> FileSource<S, F, H, O>
    where
        S: ObjectStore,
        F: BlockReaderFactory<S::Reader>,
        H: Handler<SourceObject<O>>,
    {
        let shutdown = match self.cancel_token {
            Some(token) => Shutdown::with_token(token),
            None => Shutdown::new(),
        };

        FileSource {
            shared: Arc::new(ReaderShared {
                store: self.store,
                reader_factory: self.reader_factory,
                start_block_num: self.start_block_num,
                preprocessor_threads: self.preprocessor_threads,
                preprocess: self.preprocess,
                gator: self.gator,
                shutdown,
            }),
            handler,
            start_block_num: self.start_block_num,
            stop_block_num: self.stop_block_num,
            bundle_size: self.bundle_size,
            retry_delay: self.retry_delay,
            block_indexer: self.block_indexer,
            progress: SourceProgress::default(),
        }
    }
}

/// The state shared by the main loop, the bundle readers and the
/// preprocessor tasks.
struct ReaderShared<S, F, O> {
    store: Arc<S>,
    reader_factory: Arc<F>,
    start_block_num: BlockNum,
    preprocessor_threads: usize,
    preprocess: Option<PreprocessFunc<O>>,
    gator: Option<Arc<dyn Gator>>,
    shutdown: Shutdown,
}

/// A source of historical blocks backed by bundle files in an object
/// store.
///
/// Built through [`FileSourceBuilder`] (or a
/// [`FileSourceFactory`](crate::FileSourceFactory)); consumed by
/// [`run`](Self::run).
pub struct FileSource<S, F, H, O> {
    shared: Arc<ReaderShared<S, F, O>>,
    handler: H,
    start_block_num: BlockNum,
    stop_block_num: BlockNum,
    bundle_size: u64,
    retry_delay: Duration,
    block_indexer: Option<Arc<dyn BlockIndexer>>,
    progress: SourceProgress,
}

impl<S, F, H, O> std::fmt::Debug for FileSource<S, F, H, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("start_block_num", &self.start_block_num)
            .field("stop_block_num", &self.stop_block_num)
            .field("bundle_size", &self.bundle_size)
            .finish_non_exhaustive()
    }
}

impl<S, F, H, O> FileSource<S, F, H, O>
where
    S: ObjectStore,
    F: BlockReaderFactory<S::Reader>,
    H: Handler<SourceObject<O>> + 'static,
    O: Send + 'static,
{
    /// A shutter handle to stop the source from outside.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shared.shutdown.clone()
    }

    /// A handle observing delivery progress.
    pub fn progress(&self) -> SourceProgress {
        self.progress.clone()
    }

    /// Run the source until the stop block is dispatched, the handler or a
    /// task fails, or the shutter is triggered.
    #[instrument(skip_all, fields(start = self.start_block_num, stop = self.stop_block_num))]
    pub async fn run(self) -> SourceResult<()> {
        let FileSource {
            shared,
            handler,
            start_block_num,
            stop_block_num,
            bundle_size,
            retry_delay,
            block_indexer,
            progress,
        } = self;
        let shutdown = shared.shutdown.clone();

        let (file_tx, file_rx) = mpsc::channel::<IncomingBlocksFile<O>>(1);
        let sink = tokio::spawn(sink_loop(file_rx, handler, shutdown.clone(), progress));

        let mut base = start_block_num - (start_block_num % bundle_size);
        let mut delay = Duration::ZERO;
        loop {
            if delay.is_zero() {
                if shutdown.is_terminated() {
                    info!("blocks archive streaming was asked to stop");
                    break;
                }
            } else {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("blocks archive streaming was asked to stop");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let mut filtered_blocks = None;
            if let Some(indexer) = &block_indexer {
                match lookup_block_index(
                    indexer.as_ref(),
                    base,
                    bundle_size,
                    start_block_num,
                    stop_block_num,
                ) {
                    Ok((indexed_base, blocks)) => {
                        base = indexed_base;
                        filtered_blocks = blocks;
                    }
                    Err(err) => {
                        shutdown.shutdown(err);
                        break;
                    }
                }
            }

            let filename = bundle_filename(base);
            debug!(base_block_num = base, "file stream looking for bundle");

            let exists = match shared.store.object_exists(&filename).await {
                Ok(exists) => exists,
                Err(err) => {
                    shutdown.shutdown(err);
                    break;
                }
            };
            if !exists {
                info!(
                    filename = %shared.store.object_path(&filename),
                    retry_delay = ?retry_delay,
                    "bundle does not (yet?) exist, retrying",
                );
                delay = retry_delay;
                continue;
            }
            delay = Duration::ZERO;

            let (blocks_tx, blocks_rx) = mpsc::channel(1);
            let incoming = IncomingBlocksFile { filename: filename.clone(), blocks: blocks_rx };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                sent = file_tx.send(incoming) => {
                    if sent.is_err() {
                        break;
                    }
                    debug!(filename = %filename, "new incoming bundle");
                }
            }

            let task_shared = shared.clone();
            tokio::spawn(async move {
                debug!(filename = %filename, "launching processing of bundle");
                if let Err(source) =
                    stream_bundle(task_shared.clone(), &filename, filtered_blocks, blocks_tx).await
                {
                    task_shared
                        .shutdown
                        .shutdown(SourceError::Bundle { filename, source: Box::new(source) });
                }
            });

            base += bundle_size;
            if stop_block_num != 0 && base > stop_block_num {
                debug!(stop_block_num, "stop block reached, draining");
                break;
            }
        }

        // closing the bundle channel lets the sink drain what is in flight
        drop(file_tx);
        let _ = sink.await;

        match shutdown.take_first_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Resolve the next bundle base and block list from a sparse index.
///
/// Bundles without relevant blocks are skipped unless they overlap the
/// configured start or stop block, in which case those sentinels are
/// synthesized so the boundary blocks still flow.
fn lookup_block_index(
    indexer: &dyn BlockIndexer,
    in_base: BlockNum,
    bundle_size: u64,
    start_block_num: BlockNum,
    stop_block_num: BlockNum,
) -> SourceResult<(BlockNum, Option<Vec<BlockNum>>)> {
    if stop_block_num != 0 && in_base > stop_block_num {
        return Err(SourceError::IndexBeyondStopBlock { base: in_base, stop: stop_block_num });
    }

    let mut base = in_base;
    loop {
        let blocks = indexer.blocks_in_range(base, bundle_size)?;

        let mut out: Vec<BlockNum> = Vec::new();
        for blk in blocks {
            if blk < start_block_num {
                continue;
            }
            if in_base <= start_block_num && blk > start_block_num && out.is_empty() {
                out.push(start_block_num);
            }
            if stop_block_num != 0 && blk >= stop_block_num {
                out.push(stop_block_num);
                return Ok((base, Some(out)));
            }
            out.push(blk);
        }

        if out.is_empty() {
            let contains_start = base <= start_block_num && base + bundle_size > start_block_num;
            let contains_stop = stop_block_num != 0
                && base <= stop_block_num
                && base + bundle_size > stop_block_num;
            return match (contains_start, contains_stop) {
                (true, true) => Ok((base, Some(vec![start_block_num, stop_block_num]))),
                (true, false) => Ok((base, Some(vec![start_block_num]))),
                (false, true) => Ok((base, Some(vec![stop_block_num]))),
                (false, false) => {
                    base += bundle_size;
                    continue;
                }
            };
        }

        return Ok((base, Some(out)));
    }
}

async fn stream_bundle<S, F, O>(
    shared: Arc<ReaderShared<S, F, O>>,
    filename: &str,
    filtered_blocks: Option<Vec<BlockNum>>,
    output: mpsc::Sender<PreprocessedBlock<SourceObject<O>>>,
) -> SourceResult<()>
where
    S: ObjectStore,
    F: BlockReaderFactory<S::Reader>,
    O: Send + 'static,
{
    let _open = OpenFilesGuard::enter(filename);

    let reader = shared.store.open_object(filename).await?;
    let block_reader = shared.reader_factory.new_reader(reader)?;
    stream_reader(shared, block_reader, None, filtered_blocks, output).await
}

/// Decode a bundle, preprocess kept blocks on up to
/// `preprocessor_threads` tasks, and forward results in read order.
async fn stream_reader<S, F, O>(
    shared: Arc<ReaderShared<S, F, O>>,
    mut block_reader: F::Reader,
    prev_last_block_read: Option<BlockRef>,
    filtered_blocks: Option<Vec<BlockNum>>,
    output: mpsc::Sender<PreprocessedBlock<SourceObject<O>>>,
) -> SourceResult<()>
where
    S: ObjectStore,
    F: BlockReaderFactory<S::Reader>,
    O: Send + 'static,
{
    type ResultRx<O> = oneshot::Receiver<PreprocessedBlock<SourceObject<O>>>;

    let (ready_tx, mut ready_rx) =
        mpsc::channel::<ResultRx<O>>(shared.preprocessor_threads.max(1));

    // the ordering task: pulls per-block result channels in read order and
    // forwards each result as it completes
    let forward_shutdown = shared.shutdown.clone();
    let forward = tokio::spawn(async move {
        loop {
            let result_rx = tokio::select! {
                _ = forward_shutdown.cancelled() => return,
                maybe = ready_rx.recv() => match maybe {
                    Some(rx) => rx,
                    None => return,
                },
            };
            // a dropped sender means the preprocessor shut the source down
            let Ok(preprocessed) = result_rx.await else { return };
            debug!(block = %preprocessed.block, "got preprocessor result");
            tokio::select! {
                _ = forward_shutdown.cancelled() => return,
                sent = output.send(preprocessed) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    });

    let mut previous_last_block_passed = prev_last_block_read.is_none();
    loop {
        if shared.shutdown.is_terminated() {
            break;
        }

        let Some(block) = block_reader.read_block().await? else { break };
        let block = Arc::new(block);

        if block.num < shared.start_block_num {
            continue;
        }
        if let Some(kept) = &filtered_blocks {
            if kept.binary_search(&block.num).is_err() {
                continue;
            }
        }
        if let Some(prev) = &prev_last_block_read {
            if !previous_last_block_passed {
                debug!(block = %block, prev_last = %prev, "skipping already-delivered block");
                if prev.id() == block.id {
                    previous_last_block_passed = true;
                }
                continue;
            }
        }
        if let Some(gator) = &shared.gator {
            if !gator.pass(&block) {
                debug!(block = %block, "gator rejected block");
                continue;
            }
        }

        let (result_tx, result_rx) = oneshot::channel();
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            sent = ready_tx.send(result_rx) => {
                if sent.is_err() {
                    break;
                }
            }
        }
        tokio::spawn(preprocess_block(shared.clone(), block, result_tx));
    }

    // closing the ready queue lets the ordering task drain and, through it,
    // close the bundle's block channel
    drop(ready_tx);
    let _ = forward.await;
    Ok(())
}

async fn preprocess_block<S, F, O>(
    shared: Arc<ReaderShared<S, F, O>>,
    block: Arc<Block>,
    result_tx: oneshot::Sender<PreprocessedBlock<SourceObject<O>>>,
) where
    S: ObjectStore,
    F: BlockReaderFactory<S::Reader>,
    O: Send + 'static,
{
    let obj = match &shared.preprocess {
        Some(preprocess) => match preprocess(block.clone()) {
            Ok(obj) => Some(obj),
            Err(source) => {
                // dropping `result_tx` unblocks the ordering task
                shared
                    .shutdown
                    .shutdown(SourceError::Preprocess { block: block.to_ref(), source });
                return;
            }
        },
        None => None,
    };

    let cursor =
        Cursor::new(Step::NewIrreversible, block.to_ref(), block.to_ref(), block.to_ref());
    debug!(block = %block, "block preprocessed");
    let _ = result_tx.send(PreprocessedBlock::new(block, SourceObject { cursor, obj }));
}

async fn sink_loop<H, O>(
    mut file_rx: mpsc::Receiver<IncomingBlocksFile<O>>,
    mut handler: H,
    shutdown: Shutdown,
    progress: SourceProgress,
) where
    H: Handler<SourceObject<O>> + 'static,
    O: Send + 'static,
{
    loop {
        let mut incoming = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("sink terminating");
                return;
            }
            maybe = file_rx.recv() => match maybe {
                Some(incoming) => incoming,
                None => return,
            },
        };
        debug!(filename = %incoming.filename, "feeding from incoming bundle");

        loop {
            let preprocessed = tokio::select! {
                _ = shutdown.cancelled() => return,
                maybe = incoming.blocks.recv() => match maybe {
                    Some(preprocessed) => preprocessed,
                    None => break,
                },
            };

            let PreprocessedBlock { block, obj } = preprocessed;
            let block_ref = block.to_ref();
            if let Err(source) = handler.process_block(block, obj) {
                shutdown.shutdown(SourceError::Handler(source));
                return;
            }

            let mut highest = progress.highest.lock();
            if highest.as_ref().is_none_or(|h| block_ref.num() > h.num()) {
                *highest = Some(block_ref);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedIndexer(Vec<(BlockNum, Vec<BlockNum>)>);

    impl BlockIndexer for FixedIndexer {
        fn blocks_in_range(&self, base: BlockNum, _bundle_size: u64) -> SourceResult<Vec<BlockNum>> {
            Ok(self
                .0
                .iter()
                .find(|(b, _)| *b == base)
                .map(|(_, blocks)| blocks.clone())
                .unwrap_or_default())
        }
    }

    #[test]
    fn bundle_filenames_are_zero_padded() {
        assert_eq!(bundle_filename(0), "0000000000");
        assert_eq!(bundle_filename(12300), "0000012300");
        assert_eq!(bundle_filename(9_999_999_999), "9999999999");
    }

    #[test]
    fn index_lookup_prepends_start_block() {
        let indexer = FixedIndexer(vec![(0, vec![10, 50])]);
        let (base, blocks) = lookup_block_index(&indexer, 0, 100, 1, 0).unwrap();
        assert_eq!(base, 0);
        assert_eq!(blocks, Some(vec![1, 10, 50]));
    }

    #[test]
    fn index_lookup_caps_at_stop_block() {
        let indexer = FixedIndexer(vec![(0, vec![10, 50, 80])]);
        let (base, blocks) = lookup_block_index(&indexer, 0, 100, 10, 60).unwrap();
        assert_eq!(base, 0);
        assert_eq!(blocks, Some(vec![10, 50, 60]));
    }

    #[test]
    fn index_lookup_skips_empty_bundles() {
        // bundles past the start with nothing indexed are skipped entirely
        let indexer = FixedIndexer(vec![(100, vec![]), (200, vec![]), (300, vec![310])]);
        let (base, blocks) = lookup_block_index(&indexer, 100, 100, 45, 0).unwrap();
        assert_eq!(base, 300);
        assert_eq!(blocks, Some(vec![310]));
    }

    #[test]
    fn index_lookup_synthesizes_boundary_sentinels() {
        // nothing indexed anywhere: the bundle containing the start block
        // still yields the start sentinel
        let indexer = FixedIndexer(vec![]);
        let (base, blocks) = lookup_block_index(&indexer, 0, 100, 42, 0).unwrap();
        assert_eq!(base, 0);
        assert_eq!(blocks, Some(vec![42]));

        // start and stop within the same empty bundle
        let (base, blocks) = lookup_block_index(&indexer, 0, 100, 42, 80).unwrap();
        assert_eq!(base, 0);
        assert_eq!(blocks, Some(vec![42, 80]));

        // an empty bundle overlapping only the stop block
        let (base, blocks) = lookup_block_index(&indexer, 100, 100, 42, 150).unwrap();
        assert_eq!(base, 100);
        assert_eq!(blocks, Some(vec![150]));
    }

    #[test]
    fn index_lookup_rejects_base_beyond_stop() {
        let indexer = FixedIndexer(vec![]);
        let err = lookup_block_index(&indexer, 200, 100, 1, 150).unwrap_err();
        assert!(matches!(err, SourceError::IndexBeyondStopBlock { base: 200, stop: 150 }));
    }
}
