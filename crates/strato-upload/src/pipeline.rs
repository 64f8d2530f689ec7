//! Chunked, verified, bounded-concurrency block upload.

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use strato_api::dto::{BlockMetadataDto, BlockTokenDto, ThumbnailMetadataDto};
use strato_api::{MetricName, MetricRecord};
use strato_tools::try_map_bounded;
use strato_types::{errors::categorize, Error, Node, Result};

use crate::drafts::{CommitMetadata, Draft, Uploader};
use crate::verifier::BlockVerifier;

/// Plaintext chunk size of content blocks.
pub const FILE_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Maximum concurrently in-flight block uploads.
const UPLOAD_CONCURRENCY: usize = 10;

/// Thumbnail kind sent with upload token requests.
const THUMBNAIL_KIND: u8 = 1;

/// Caller-supplied metadata of an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    /// Expected plaintext size; when set, the chunker's output is checked
    /// against it before anything is uploaded.
    pub expected_size: Option<u64>,
    /// Unix seconds of the client-side modification time.
    pub modification_time: Option<i64>,
}

struct PreparedBlock {
    index: u32,
    plain_size: u64,
    data: Vec<u8>,
    hash: String,
    verification_token: String,
    manifest_digest: [u8; 20],
}

struct PreparedThumbnail {
    data: Vec<u8>,
    hash: String,
    manifest_digest: [u8; 20],
}

impl Uploader {
    /// Upload a file's content into a draft and commit it.
    ///
    /// Chunks the stream into 4 MiB blocks, encrypts and verifies each,
    /// requests upload tokens (blocks and thumbnail together) in one round
    /// trip, uploads with bounded concurrency and one-off retries, and
    /// commits with a SHA-1 manifest and the block-size array. On failure
    /// the draft is cleaned up before the error propagates.
    pub async fn upload_file(
        &self,
        draft: &Draft,
        content: &mut (dyn AsyncRead + Unpin + Send),
        metadata: &UploadMetadata,
        thumbnail: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let context = self
            .inner
            .shares
            .volume_metric_context(draft.node_uid.volume_id())
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        match self
            .run_upload(draft, content, metadata, thumbnail, cancel)
            .await
        {
            Ok(node) => {
                self.inner.telemetry.log_event(
                    MetricRecord::new(MetricName::Upload).with_context(context),
                );
                Ok(node)
            }
            Err(error) => {
                let mut record = MetricRecord::new(MetricName::Upload).with_context(context);
                if let Some(category) = categorize(&error) {
                    record = record.with_error(category);
                }
                self.inner.telemetry.log_event(record);
                self.cleanup_draft(draft, cancel).await;
                Err(error)
            }
        }
    }

    async fn run_upload(
        &self,
        draft: &Draft,
        content: &mut (dyn AsyncRead + Unpin + Send),
        metadata: &UploadMetadata,
        thumbnail: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let verifier = BlockVerifier::new(
            self.inner.api.clone(),
            self.inner.crypto.clone(),
            self.inner.telemetry.clone(),
            draft.revision_uid.clone(),
        );

        // Chunk, encrypt, verify.
        let mut blocks: Vec<PreparedBlock> = Vec::new();
        let mut content_sha1 = Sha1::new();
        let mut total_size: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            let chunk = read_chunk(content).await?;
            if chunk.is_empty() {
                break;
            }
            content_sha1.update(&chunk);
            total_size += chunk.len() as u64;

            let encrypted = self
                .inner
                .crypto
                .encrypt_block(&chunk, &draft.content_session_key, &draft.signing.address_key)
                .await?;
            let verification_token = verifier.verify_block(&encrypted.data, cancel).await?;
            blocks.push(PreparedBlock {
                index: blocks.len() as u32 + 1,
                plain_size: chunk.len() as u64,
                manifest_digest: Sha1::digest(&encrypted.data).into(),
                hash: encrypted.hash,
                data: encrypted.data,
                verification_token,
            });
        }

        // The chunker's output must account for exactly the promised bytes.
        if let Some(expected_size) = metadata.expected_size {
            let expected_blocks = expected_size.div_ceil(FILE_CHUNK_SIZE as u64);
            if blocks.len() as u64 != expected_blocks {
                return Err(Error::Integrity {
                    debug: Some(format!(
                        "chunked into {} blocks, expected {expected_blocks}",
                        blocks.len()
                    )),
                });
            }
            if total_size != expected_size {
                return Err(Error::Integrity {
                    debug: Some(format!(
                        "read {total_size} bytes, expected {expected_size}"
                    )),
                });
            }
        }

        let thumbnail = match thumbnail {
            Some(data) => {
                let encrypted = self
                    .inner
                    .crypto
                    .encrypt_block(data, &draft.content_session_key, &draft.signing.address_key)
                    .await?;
                Some(PreparedThumbnail {
                    manifest_digest: Sha1::digest(&encrypted.data).into(),
                    hash: encrypted.hash,
                    data: encrypted.data,
                })
            }
            None => None,
        };

        self.upload_blocks(draft, &blocks, thumbnail.as_ref(), cancel)
            .await?;

        // Thumbnail digest leads the manifest, content blocks follow in
        // upload order.
        let mut manifest = Vec::new();
        if let Some(thumbnail) = &thumbnail {
            manifest.extend_from_slice(&thumbnail.manifest_digest);
        }
        for block in &blocks {
            manifest.extend_from_slice(&block.manifest_digest);
        }

        let commit = CommitMetadata {
            modification_time: metadata.modification_time,
            size: Some(total_size),
            sha1: Some(hex(&content_sha1.finalize())),
            block_sizes: blocks.iter().map(|b| b.plain_size).collect(),
        };
        debug!(
            uid = %draft.node_uid,
            blocks = blocks.len(),
            bytes = total_size,
            "upload complete, committing"
        );
        self.commit_draft(draft, &manifest, &commit, cancel).await
    }

    async fn upload_blocks(
        &self,
        draft: &Draft,
        blocks: &[PreparedBlock],
        thumbnail: Option<&PreparedThumbnail>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if blocks.is_empty() && thumbnail.is_none() {
            return Ok(());
        }

        let block_metas: Vec<BlockMetadataDto> = blocks.iter().map(block_metadata).collect();
        let thumbnail_metas: Vec<ThumbnailMetadataDto> = thumbnail
            .iter()
            .map(|t| ThumbnailMetadataDto {
                kind: THUMBNAIL_KIND,
                size: t.data.len() as u64,
                hash: t.hash.clone(),
            })
            .collect();

        // One round trip for every token, thumbnails included.
        let tokens = self
            .inner
            .api
            .request_block_upload(&draft.revision_uid, &block_metas, &thumbnail_metas, cancel)
            .await?;

        let mut jobs: Vec<(Option<&PreparedBlock>, &[u8], BlockTokenDto)> = Vec::new();
        for block in blocks {
            let token = tokens
                .blocks
                .iter()
                .find(|t| t.index == block.index)
                .ok_or_else(|| Error::Integrity {
                    debug: Some(format!("no upload token for block {}", block.index)),
                })?;
            jobs.push((Some(block), &block.data, token.clone()));
        }
        if let Some(thumbnail) = thumbnail {
            let token = tokens.thumbnails.first().ok_or_else(|| Error::Integrity {
                debug: Some("no upload token for the thumbnail".to_string()),
            })?;
            jobs.push((
                None,
                &thumbnail.data,
                BlockTokenDto {
                    index: 0,
                    token: token.token.clone(),
                    upload_url: token.upload_url.clone(),
                },
            ));
        }

        try_map_bounded(jobs, UPLOAD_CONCURRENCY, |(block, data, token)| {
            let uploader = self.clone();
            let draft = draft.clone();
            let cancel = cancel.clone();
            let block_metadata = block.map(block_metadata);
            async move {
                uploader.inner.pause.wait_if_paused(&cancel).await?;
                uploader
                    .upload_one(&draft, block_metadata, data, &token, &cancel)
                    .await
            }
        })
        .await?;
        Ok(())
    }

    /// Upload one block, retrying once: an expired token (404) is
    /// re-requested first, any other failure retries as-is.
    async fn upload_one(
        &self,
        draft: &Draft,
        block_metadata: Option<BlockMetadataDto>,
        data: &[u8],
        token: &BlockTokenDto,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self
            .inner
            .block_transport
            .upload_block(&token.upload_url, &token.token, data, cancel)
            .await
        {
            Ok(()) => Ok(()),
            Err(Error::NotFound(_)) => {
                let Some(block_metadata) = block_metadata else {
                    return Err(Error::NotFound(
                        "thumbnail upload token expired".to_string(),
                    ));
                };
                warn!(index = block_metadata.index, "upload token expired, re-requesting");
                let fresh = self
                    .inner
                    .api
                    .request_block_upload(
                        &draft.revision_uid,
                        std::slice::from_ref(&block_metadata),
                        &[],
                        cancel,
                    )
                    .await?;
                let token = fresh.blocks.first().ok_or_else(|| Error::Integrity {
                    debug: Some(format!(
                        "no fresh token for block {}",
                        block_metadata.index
                    )),
                })?;
                self.inner
                    .block_transport
                    .upload_block(&token.upload_url, &token.token, data, cancel)
                    .await
            }
            Err(first_error) => {
                warn!(%first_error, "block upload failed, retrying once");
                self.inner
                    .block_transport
                    .upload_block(&token.upload_url, &token.token, data, cancel)
                    .await
            }
        }
    }
}

fn block_metadata(block: &PreparedBlock) -> BlockMetadataDto {
    BlockMetadataDto {
        index: block.index,
        size: block.data.len() as u64,
        hash: block.hash.clone(),
        verification_token: block.verification_token.clone(),
    }
}

async fn read_chunk(content: &mut (dyn AsyncRead + Unpin + Send)) -> Result<Vec<u8>> {
    let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
    let mut filled = 0;
    while filled < FILE_CHUNK_SIZE {
        let read = content
            .read(&mut chunk[filled..])
            .await
            .map_err(|e| Error::Connection(format!("content stream failed: {e}")))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
