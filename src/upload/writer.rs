//! Chunked append writer
//!
//! Streams a request body into a session's blob in fixed-size blocks, so
//! memory use is bounded by the block size and not the payload size.
//!
//! # Offset contract
//!
//! The session offset is advanced after every block that has been written
//! and flushed. When the body stream fails part way (client disconnect,
//! network error) the bytes already received are still appended and the
//! offset stays at exactly the number of bytes in the store, so the client
//! can resume from the offset reported by the next status query. A write
//! that fails part way through a block cuts the store back to the last
//! committed offset, dropping the partial block.

use super::session::UploadSession;
use super::store::BlobAppender;
use super::UploadError;
use bytes::{Bytes, BytesMut};
use futures::{pin_mut, Stream, StreamExt};
use std::cmp;
use std::io;
use tokio::io::AsyncWriteExt;

/// Writes payload streams into a blob block by block
#[derive(Debug, Clone, Copy)]
pub struct ChunkWriter {
    chunk_size: usize,
}

impl ChunkWriter {
    /// Create a writer with the given block size (clamped to at least 1)
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: cmp::max(chunk_size, 1),
        }
    }

    /// Block size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy `body` into `sink`, committing progress on `session`.
    ///
    /// The caller must hold the session's write lock. Returns the offset
    /// after the last committed block.
    pub async fn copy<S, E>(
        &self,
        session: &UploadSession,
        sink: &mut BlobAppender,
        body: S,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        pin_mut!(body);
        let mut pending = BytesMut::with_capacity(self.chunk_size);

        while let Some(frame) = body.next().await {
            let mut frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    let source = io::Error::other(e);
                    tracing::warn!(
                        upload_id = %session.id(),
                        offset = session.offset(),
                        buffered = pending.len(),
                        error = %source,
                        "Payload stream failed"
                    );
                    // Keep what arrived intact before reporting the failure
                    self.flush_block(session, sink, &mut pending).await?;
                    return Err(UploadError::Io {
                        offset: session.offset(),
                        source,
                    });
                }
            };

            while !frame.is_empty() {
                let take = cmp::min(self.chunk_size - pending.len(), frame.len());
                pending.extend_from_slice(&frame.split_to(take));

                if pending.len() == self.chunk_size {
                    self.flush_block(session, sink, &mut pending).await?;
                }
            }
        }

        self.flush_block(session, sink, &mut pending).await?;
        Ok(session.offset())
    }

    /// Append the buffered block and advance the offset.
    ///
    /// Never writes past the declared size: the part that fits is appended
    /// and `ExceedsDeclaredSize` is returned for the rest.
    async fn flush_block(
        &self,
        session: &UploadSession,
        sink: &mut BlobAppender,
        pending: &mut BytesMut,
    ) -> Result<(), UploadError> {
        if pending.is_empty() {
            return Ok(());
        }

        let remaining = session.remaining();
        let overflow = pending.len() as u64 > remaining;
        let block = if overflow {
            pending.split_to(remaining as usize)
        } else {
            pending.split()
        };

        if !block.is_empty() {
            if let Err(source) = write_block(sink, &block).await {
                // Part of the block may have landed; the store must end at the offset
                session.discard_uncommitted().await;
                return Err(UploadError::Io {
                    offset: session.offset(),
                    source,
                });
            }
            session.commit(block.len() as u64);

            tracing::debug!(
                upload_id = %session.id(),
                block = block.len(),
                offset = session.offset(),
                "Appended block"
            );
        }

        if overflow {
            pending.clear();
            return Err(UploadError::ExceedsDeclaredSize {
                offset: session.offset(),
                declared_size: session.declared_size(),
            });
        }

        Ok(())
    }
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new(super::DEFAULT_CHUNK_SIZE)
    }
}

async fn write_block(sink: &mut BlobAppender, block: &[u8]) -> io::Result<()> {
    sink.write_all(block).await?;
    sink.flush().await
}
