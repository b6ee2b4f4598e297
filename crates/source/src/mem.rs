//! In-memory object store and JSON bundle codec for testing.
//!
//! [`MemObjectStore`] keeps named byte objects in a shared map.
//! [`JsonBlockReaderFactory`] decodes the length-prefixed JSON framing
//! produced by [`encode_bundle`]. Both are intended for tests and
//! development only.

use crate::{BlockReader, BlockReaderFactory, ObjectStore, SourceError, SourceResult};
use bytes::Bytes;
use chainstream_types::{Block, BlockNum};
use parking_lot::RwLock;
use std::{collections::HashMap, io, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt};

/// An in-memory [`ObjectStore`].
///
/// Clones share the same object map, so a test can hold one clone and feed
/// objects while a source reads from another.
#[derive(Debug, Clone, Default)]
pub struct MemObjectStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a named object.
    pub fn put(&self, name: impl Into<String>, bytes: Bytes) {
        self.objects.write().insert(name.into(), bytes);
    }

    /// Insert a bundle file for the given base block number.
    pub fn put_bundle(&self, base: BlockNum, blocks: &[Block]) {
        self.put(crate::bundle_filename(base), encode_bundle(blocks));
    }

    /// Insert a one-block object keyed by the block's id.
    pub fn put_one_block(&self, block: &Block) {
        self.put(block.id.clone(), encode_bundle(std::slice::from_ref(block)));
    }
}

impl ObjectStore for MemObjectStore {
    type Reader = io::Cursor<Vec<u8>>;

    async fn object_exists(&self, name: &str) -> SourceResult<bool> {
        Ok(self.objects.read().contains_key(name))
    }

    async fn open_object(&self, name: &str) -> SourceResult<Self::Reader> {
        let bytes = self.objects.read().get(name).cloned().ok_or_else(|| {
            SourceError::Io(io::Error::new(io::ErrorKind::NotFound, format!("no object {name}")))
        })?;
        Ok(io::Cursor::new(bytes.to_vec()))
    }

    fn object_path(&self, name: &str) -> String {
        format!("mem://{name}")
    }
}

/// Encode blocks into the length-prefixed JSON bundle framing.
pub fn encode_bundle(blocks: &[Block]) -> Bytes {
    let mut buf = Vec::new();
    for block in blocks {
        let json = serde_json::to_vec(block).expect("blocks serialize to JSON");
        buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
        buf.extend_from_slice(&json);
    }
    buf.into()
}

/// Factory for [`JsonBlockReader`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBlockReaderFactory;

impl<R> BlockReaderFactory<R> for JsonBlockReaderFactory
where
    R: AsyncRead + Send + Unpin + 'static,
{
    type Reader = JsonBlockReader<R>;

    fn new_reader(&self, reader: R) -> SourceResult<Self::Reader> {
        Ok(JsonBlockReader { reader })
    }
}

/// Reads length-prefixed JSON blocks out of a raw reader.
#[derive(Debug)]
pub struct JsonBlockReader<R> {
    reader: R,
}

impl<R> BlockReader for JsonBlockReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read_block(&mut self) -> SourceResult<Option<Block>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;

        let block = serde_json::from_slice(&buf)
            .map_err(|e| SourceError::InvalidData(format!("undecodable block frame: {e}")))?;
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blk(id: &str, num: u64) -> Block {
        Block::new(id, num, format!("{}a", num - 1), 1)
    }

    #[tokio::test]
    async fn bundle_round_trip() {
        let blocks = vec![blk("1a", 1), blk("2a", 2), blk("3a", 3)];
        let encoded = encode_bundle(&blocks);

        let mut reader =
            JsonBlockReaderFactory.new_reader(io::Cursor::new(encoded.to_vec())).unwrap();
        let mut decoded = Vec::new();
        while let Some(block) = reader.read_block().await.unwrap() {
            decoded.push(block);
        }
        assert_eq!(decoded, blocks);
    }

    #[tokio::test]
    async fn store_round_trip() {
        let store = MemObjectStore::new();
        assert!(!store.object_exists("0000000000").await.unwrap());

        store.put_bundle(0, &[blk("1a", 1)]);
        assert!(store.object_exists("0000000000").await.unwrap());
        assert_eq!(store.object_path("0000000000"), "mem://0000000000");

        let reader = store.open_object("0000000000").await.unwrap();
        let mut block_reader = JsonBlockReaderFactory.new_reader(reader).unwrap();
        assert_eq!(block_reader.read_block().await.unwrap().unwrap().id, "1a");
        assert!(block_reader.read_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_object_is_io_error() {
        let store = MemObjectStore::new();
        let err = store.open_object("nope").await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[tokio::test]
    async fn truncated_frame_errors() {
        let store = MemObjectStore::new();
        store.put("bad", Bytes::from_static(&[8, 0, 0, 0, b'{', b'}'])); // frame shorter than its prefix

        let reader = store.open_object("bad").await.unwrap();
        let mut block_reader = JsonBlockReaderFactory.new_reader(reader).unwrap();
        assert!(block_reader.read_block().await.is_err());
    }
}
