//! The receiving half of the per-file loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::{Result, TrzszError};
use crate::files::allocate_unique_name;
use crate::progress::ProgressListener;
use crate::protocol::FrameTag;

use super::{decode_digest, Transfer};

/// Where one incoming record lands on disk.
struct LocalTarget {
    path: PathBuf,
    /// Name acknowledged back to the sender.
    chosen: String,
    is_dir: bool,
    /// Whether `chosen` belongs in the final summary.
    top_level: bool,
}

impl Transfer {
    /// Receive the announced file list into `dest`.
    ///
    /// Returns the local names chosen for the top-level records.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn recv_files(
        &self,
        dest: &Path,
        progress: Option<&dyn ProgressListener>,
    ) -> Result<Vec<String>> {
        let config = self.config();

        let num_payload = self.recv_expect(FrameTag::Num).await?;
        let num: u64 = std::str::from_utf8(&num_payload)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TrzszError::protocol("NUM payload is not a decimal count"))?;
        if let Some(p) = progress {
            p.on_num(num);
        }

        let mut names = Vec::new();
        // Directory mode: top-level components remapped for uniqueness.
        let mut root_map: HashMap<String, String> = HashMap::new();

        for _ in 0..num {
            let name_payload = self.recv_expect(FrameTag::Name).await?;
            let wire_name = String::from_utf8(name_payload)
                .map_err(|_| TrzszError::protocol("NAME payload is not valid UTF-8"))?;

            let target = match self.resolve_target(dest, &wire_name, &config, &mut root_map) {
                Ok(target) => target,
                Err(err) => {
                    // Tell the sender why before the session dies.
                    self.send_error(&err).await;
                    return Err(err);
                }
            };
            if let Some(p) = progress {
                p.on_name(&wire_name);
            }

            if target.is_dir {
                tokio::fs::create_dir_all(&target.path).await?;
                self.send_frame(FrameTag::Succ, target.chosen.as_bytes())
                    .await?;
                if target.top_level {
                    names.push(target.chosen);
                }
                continue;
            }

            let mut file = match tokio::fs::File::create(&target.path).await {
                Ok(file) => file,
                Err(e) => {
                    let err =
                        TrzszError::path(format!("Cannot create {}: {e}", target.path.display()));
                    self.send_error(&err).await;
                    return Err(err);
                }
            };
            self.send_frame(FrameTag::Succ, target.chosen.as_bytes())
                .await?;

            let size_payload = self.recv_expect(FrameTag::Size).await?;
            let size: u64 = std::str::from_utf8(&size_payload)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| TrzszError::protocol("SIZE payload is not a decimal size"))?;
            if let Some(p) = progress {
                p.on_size(size);
            }

            self.recv_file_data(&mut file, size, config.binary, config.max_buf_size, progress)
                .await?;

            file.flush().await?;
            if target.top_level {
                names.push(target.chosen.clone());
            }
            if let Some(p) = progress {
                p.on_done(&target.chosen);
            }
            debug!(name = %wire_name, local = %target.chosen, size, "file received");
        }
        Ok(names)
    }

    /// Verify and store one file's chunk stream.
    async fn recv_file_data(
        &self,
        file: &mut tokio::fs::File,
        size: u64,
        binary: bool,
        max_buf_size: u64,
        progress: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        let mut whole = md5::Context::new();
        let mut received: u64 = 0;

        while received < size {
            let chunk = self.recv_expect(FrameTag::Data).await?;
            if chunk.len() as u64 > max_buf_size {
                return Err(TrzszError::protocol(format!(
                    "DATA chunk of {} bytes exceeds negotiated maximum {}",
                    chunk.len(),
                    max_buf_size
                )));
            }
            if received + chunk.len() as u64 > size {
                return Err(TrzszError::protocol("DATA overruns announced size"));
            }

            let md5_payload = self.recv_expect(FrameTag::Md5).await?;
            let expected = decode_digest(&md5_payload, binary)?;
            if md5::compute(&chunk).0 != expected {
                let message = format!("md5 mismatch @{received}");
                let _ = self.send_frame(FrameTag::Fail, message.as_bytes()).await;
                return Err(TrzszError::ChecksumMismatch { offset: received });
            }

            file.write_all(&chunk).await?;
            whole.consume(&chunk);
            received += chunk.len() as u64;

            self.send_frame(FrameTag::Succ, b"ok").await?;
            if let Some(p) = progress {
                p.on_step(received);
            }
        }

        // Whole-file digest over the streamed content.
        let md5_payload = self.recv_expect(FrameTag::Md5).await?;
        let expected = decode_digest(&md5_payload, binary)?;
        if whole.compute().0 != expected {
            let message = format!("md5 mismatch @{received}");
            let _ = self.send_frame(FrameTag::Fail, message.as_bytes()).await;
            return Err(TrzszError::ChecksumMismatch { offset: received });
        }
        self.send_frame(FrameTag::Succ, b"ok").await?;
        Ok(())
    }

    /// Map an incoming wire name onto a safe, unique local target.
    fn resolve_target(
        &self,
        dest: &Path,
        wire_name: &str,
        config: &crate::protocol::TransferConfig,
        root_map: &mut HashMap<String, String>,
    ) -> Result<LocalTarget> {
        if !config.directory {
            if wire_name.is_empty() || wire_name.contains('/') {
                return Err(TrzszError::protocol(format!(
                    "invalid file name: {wire_name:?}"
                )));
            }
            let chosen = if config.overwrite {
                wire_name.to_string()
            } else {
                allocate_unique_name(dest, wire_name)
            };
            return Ok(LocalTarget {
                path: dest.join(&chosen),
                chosen,
                is_dir: false,
                top_level: true,
            });
        }

        let is_dir = wire_name.ends_with('/');
        let trimmed = wire_name.trim_end_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.is_empty()
            || parts
                .iter()
                .any(|p| p.is_empty() || *p == "." || *p == "..")
        {
            return Err(TrzszError::protocol(format!(
                "unsafe relative path: {wire_name:?}"
            )));
        }

        if parts.len() == 1 {
            let root = parts[0];
            let chosen = if config.overwrite {
                root.to_string()
            } else {
                allocate_unique_name(dest, root)
            };
            root_map.insert(root.to_string(), chosen.clone());
            return Ok(LocalTarget {
                path: dest.join(&chosen),
                chosen,
                is_dir,
                top_level: true,
            });
        }

        let mapped_root = root_map.get(parts[0]).ok_or_else(|| {
            TrzszError::protocol(format!("record {wire_name:?} precedes its root directory"))
        })?;
        let mut path = dest.join(mapped_root);
        for part in &parts[1..] {
            path.push(part);
        }
        Ok(LocalTarget {
            path,
            chosen: parts.last().unwrap().to_string(),
            is_dir,
            top_level: false,
        })
    }
}
