//! The sending half of the per-file loop.

use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::constants::INITIAL_CHUNK_SIZE;
use crate::error::{Result, TrzszError};
use crate::files::FileRecord;
use crate::progress::ProgressListener;
use crate::protocol::FrameTag;

use super::{encode_digest, Transfer};

impl Transfer {
    /// Send the expanded file list to the peer.
    ///
    /// Returns the local names the receiver chose for the top-level
    /// records, for the final summary message.
    #[instrument(skip_all, fields(files = records.len()))]
    pub async fn send_files(
        &self,
        records: &[FileRecord],
        progress: Option<&dyn ProgressListener>,
    ) -> Result<Vec<String>> {
        let config = self.config();

        self.send_frame(FrameTag::Num, records.len().to_string().as_bytes())
            .await?;
        if let Some(p) = progress {
            p.on_num(records.len() as u64);
        }

        let mut names = Vec::new();
        for record in records {
            let wire_name = record.wire_name(config.directory);
            self.send_frame(FrameTag::Name, wire_name.as_bytes()).await?;

            let local_name = self.recv_succ().await?;
            if record.is_top_level() {
                names.push(local_name.clone());
            }
            if let Some(p) = progress {
                p.on_name(&record.name);
            }

            // Directory entries carry no body; the receiver mkdirs and acks.
            if record.is_dir {
                continue;
            }

            self.send_frame(FrameTag::Size, record.size.to_string().as_bytes())
                .await?;
            if let Some(p) = progress {
                p.on_size(record.size);
            }

            self.send_file_data(record, config.binary, config.max_buf_size, progress)
                .await?;

            if let Some(p) = progress {
                p.on_done(&local_name);
            }
            debug!(name = %record.name, local = %local_name, "file sent");
        }
        Ok(names)
    }

    /// Stream one file's content as `DATA`/`MD5` chunk pairs, then the
    /// whole-file digest.
    async fn send_file_data(
        &self,
        record: &FileRecord,
        binary: bool,
        max_buf_size: u64,
        progress: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        let mut file = tokio::fs::File::open(&record.abs_path).await?;

        // Text mode slow-starts to stay polite on an interactive stream;
        // binary mode goes straight to the ceiling.
        let mut chunk_size = if binary {
            max_buf_size
        } else {
            INITIAL_CHUNK_SIZE.min(max_buf_size)
        };

        let mut whole = md5::Context::new();
        let mut sent: u64 = 0;

        while sent < record.size {
            let want = chunk_size.min(record.size - sent) as usize;
            let mut chunk = vec![0u8; want];
            file.read_exact(&mut chunk).await?;
            whole.consume(&chunk);

            let digest = md5::compute(&chunk);
            self.send_frame(FrameTag::Data, &chunk).await?;
            self.send_frame(FrameTag::Md5, &encode_digest(&digest, binary))
                .await?;

            self.wait_chunk_ack(&mut chunk_size, max_buf_size).await?;
            sent += want as u64;
            if let Some(p) = progress {
                p.on_step(sent);
            }
        }

        let digest = whole.compute();
        self.send_frame(FrameTag::Md5, &encode_digest(&digest, binary))
            .await?;
        self.recv_succ().await?;
        Ok(())
    }

    /// Wait for the receiver's per-chunk acknowledgement.
    ///
    /// Each ack doubles the next chunk up to the ceiling. A timed-out ack
    /// halves the next chunk (floor 1024) and waits once more; a second
    /// failure aborts the file with `FAIL`. The chunk itself is never
    /// resent, only the wait retried.
    async fn wait_chunk_ack(&self, chunk_size: &mut u64, max_buf_size: u64) -> Result<()> {
        match self.recv_succ().await {
            Ok(_) => {
                *chunk_size = chunk_size.saturating_mul(2).min(max_buf_size);
                Ok(())
            }
            Err(TrzszError::Timeout) => {
                *chunk_size = (*chunk_size / 2).max(INITIAL_CHUNK_SIZE);
                debug!(chunk_size, "ack timeout, halving chunk size");
                match self.recv_succ().await {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        let _ = self
                            .send_frame(FrameTag::Fail, b"Receive ack timeout")
                            .await;
                        Err(err)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }
}
