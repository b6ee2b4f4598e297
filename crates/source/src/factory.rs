//! Factory producing file sources for fresh starts and cursor resumes.

use crate::{
    BlockIndexer, BlockReaderFactory, CursorResolverHandler, FileSource, FileSourceBuilder, Gator,
    ObjectStore, PreprocessFunc, SourceError, SourceObject, SourceResult,
    filesource::{DEFAULT_BUNDLE_SIZE, DEFAULT_RETRY_DELAY},
};
use chainstream_types::{Block, BlockNum, Cursor, Handler, HandlerError};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Produces [`FileSource`] instances over a pair of stores: the merged
/// bundle store, and the one-block store used to reconcile resumed
/// cursors.
///
/// [`source_from_block_num`](Self::source_from_block_num) starts a plain
/// stream; [`source_from_cursor`](Self::source_from_cursor) starts at the
/// cursor's LIB and wraps the handler in a [`CursorResolverHandler`].
pub struct FileSourceFactory<S, F, O = ()> {
    merged_blocks_store: Arc<S>,
    one_blocks_store: Arc<S>,
    reader_factory: Arc<F>,
    stop_block_num: BlockNum,
    bundle_size: u64,
    retry_delay: Duration,
    preprocessor_threads: usize,
    preprocess: Option<PreprocessFunc<O>>,
    gator: Option<Arc<dyn Gator>>,
    block_indexer: Option<Arc<dyn BlockIndexer>>,
    cancel_token: Option<CancellationToken>,
}

impl<S, F, O> std::fmt::Debug for FileSourceFactory<S, F, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSourceFactory")
            .field("stop_block_num", &self.stop_block_num)
            .field("bundle_size", &self.bundle_size)
            .finish_non_exhaustive()
    }
}

impl<S, F> FileSourceFactory<S, F, ()> {
    /// Create a factory over the merged bundle store and the one-block
    /// store.
    pub fn new(merged_blocks_store: S, one_blocks_store: S, reader_factory: F) -> Self {
        Self {
            merged_blocks_store: Arc::new(merged_blocks_store),
            one_blocks_store: Arc::new(one_blocks_store),
            reader_factory: Arc::new(reader_factory),
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

impl<S, F, O> FileSourceFactory<S, F, O> {
    /// Stop sources once the bundle containing this block has been
    /// dispatched (zero means open-ended).
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

    /// Drive shutdown of produced sources from an external token.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Preprocess every block with `preprocess` on up to `threads`
    /// concurrent tasks.
    #[must_use]
    pub fn concurrent_preprocess<O2>(
        self,
        preprocess: impl Fn(Arc<Block>) -> Result<O2, HandlerError> + Send + Sync + 'static,
        threads: usize,
    ) -> FileSourceFactory<S, F, O2> {
        FileSourceFactory {
            merged_blocks_store: self.merged_blocks_store,
            one_blocks_store: self.one_blocks_store,
            reader_factory: self.reader_factory,
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

    fn builder(&self, start_block_num: BlockNum) -> FileSourceBuilder<S, F, O> {
        let mut builder = FileSourceBuilder::from_shared(
            self.merged_blocks_store.clone(),
            self.reader_factory.clone(),
            start_block_num,
        )
        .stop_block_num(self.stop_block_num)
        .bundle_size(self.bundle_size)
        .retry_delay(self.retry_delay)
        .preprocess_shared(self.preprocess.clone(), self.preprocessor_threads);
        if let Some(gator) = &self.gator {
            builder = builder.shared_gator(gator.clone());
        }
        if let Some(indexer) = &self.block_indexer {
            builder = builder.shared_block_indexer(indexer.clone());
        }
        if let Some(token) = &self.cancel_token {
            builder = builder.cancel_token(token.clone());
        }
        builder
    }

    /// A source streaming from `start_block_num` into `handler`.
    pub fn source_from_block_num<H>(
        &self,
        start_block_num: BlockNum,
        handler: H,
    ) -> FileSource<S, F, H, O>
    where
        S: ObjectStore,
        F: BlockReaderFactory<S::Reader>,
        H: Handler<SourceObject<O>>,
    {
        self.builder(start_block_num).build(handler)
    }

    /// A source resuming from `cursor` into `handler`.
    ///
    /// Streaming starts at the cursor's LIB; the handler is wrapped in a
    /// [`CursorResolverHandler`] that reconciles the resume boundary using
    /// the one-block store.
    pub fn source_from_cursor<H>(
        &self,
        cursor: &Cursor,
        handler: H,
    ) -> SourceResult<FileSource<S, F, CursorResolverHandler<S, F, H, O>, O>>
    where
        S: ObjectStore,
        F: BlockReaderFactory<S::Reader>,
        H: Handler<SourceObject<O>>,
        O: Send,
    {
        if cursor.is_empty() {
            return Err(SourceError::CursorResolution {
                cursor: cursor.to_string(),
                reason: "cannot resume from the empty cursor".into(),
            });
        }

        let wrapped = CursorResolverHandler::new(
            self.one_blocks_store.clone(),
            self.reader_factory.clone(),
            cursor.clone(),
            handler,
        );
        Ok(self.builder(cursor.lib.num()).build(wrapped))
    }
}
