use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::audio_format::AudioFormat;
use crate::models::error::{CaptureError, CapturePhase};
use crate::processing::wav_format;

/// Streaming WAV writer whose size fields are patched when the stream ends.
///
/// ## File Format
///
/// **Standard formats:**
/// ```text
/// [46-byte WAV header, sizes zero until finalize]
/// [raw interleaved samples...]
/// ```
///
/// **Extensible formats:** raw interleaved samples, no header.
///
/// Only the drain context writes; finalize runs after the last write.
pub struct ContainerWriter {
    file_path: PathBuf,
    file: Option<File>,
    header_size: u32,
    data_size: u32,
    max_data_size: u32,
}

impl ContainerWriter {
    /// Create (truncating) the destination and write the provisional header.
    pub fn create(file_path: impl Into<PathBuf>, format: &AudioFormat) -> Result<Self, CaptureError> {
        let file_path = file_path.into();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::io(CapturePhase::Header, format!("failed to create directory: {}", e))
            })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&file_path)
            .map_err(|e| {
                CaptureError::io(
                    CapturePhase::Header,
                    format!("failed to open {}: {}", file_path.display(), e),
                )
            })?;

        let header_size = match wav_format::generate_wav_header(format) {
            Some(header) => {
                file.write_all(&header)
                    .map_err(|e| CaptureError::io(CapturePhase::Header, format!("header write failed: {}", e)))?;
                header.len() as u32
            }
            None => {
                log::warn!(
                    "Capture format {} has no fixed WAV record; writing headerless raw samples",
                    format
                );
                0
            }
        };

        log::debug!("Opened {} ({} header bytes)", file_path.display(), header_size);

        Ok(Self {
            file_path,
            file: Some(file),
            header_size,
            data_size: 0,
            max_data_size: wav_format::max_data_size(header_size),
        })
    }

    /// Whether appending `bytes` more would exceed what the size fields can hold.
    pub fn would_overflow(&self, bytes: u64) -> bool {
        self.data_size as u64 + bytes > self.max_data_size as u64
    }

    /// Append sample bytes after the header.
    pub fn write(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        if self.would_overflow(data.len() as u64) {
            return Err(CaptureError::io(
                CapturePhase::Drain,
                format!("{} more bytes would exceed the container limit", data.len()),
            ));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::io(CapturePhase::Drain, "file is not open"))?;
        file.write_all(data)
            .map_err(|e| CaptureError::io(CapturePhase::Drain, format!("write failed: {}", e)))?;
        self.data_size += data.len() as u32;
        Ok(())
    }

    /// Patch both size fields (standard header only), flush to stable
    /// storage and close. Returns the SHA-256 of the finished file.
    pub fn finalize(&mut self) -> Result<String, CaptureError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| CaptureError::io(CapturePhase::Finalize, "file is not open"))?;

        if self.header_size > 0 {
            let patch = |file: &mut File, offset: u64, value: u32| -> Result<(), CaptureError> {
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| CaptureError::io(CapturePhase::Finalize, format!("seek failed: {}", e)))?;
                file.write_all(&value.to_le_bytes())
                    .map_err(|e| CaptureError::io(CapturePhase::Finalize, format!("size patch failed: {}", e)))
            };

            patch(
                &mut file,
                wav_format::data_size_offset(self.header_size),
                self.data_size,
            )?;
            patch(
                &mut file,
                wav_format::RIFF_SIZE_OFFSET,
                wav_format::riff_size(self.data_size, self.header_size),
            )?;
        }

        file.flush()
            .map_err(|e| CaptureError::io(CapturePhase::Finalize, format!("flush failed: {}", e)))?;
        file.sync_all()
            .map_err(|e| CaptureError::io(CapturePhase::Finalize, format!("sync failed: {}", e)))?;
        drop(file);

        log::info!(
            "Finalized {} ({} data bytes)",
            self.file_path.display(),
            self.data_size
        );

        sha256_file(&self.file_path)
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    /// Sample bytes written so far (header excluded).
    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    #[cfg(test)]
    pub(crate) fn with_max_data_size(mut self, max_data_size: u32) -> Self {
        self.max_data_size = max_data_size;
        self
    }
}

/// SHA-256 hex digest of a file, read in chunks.
fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let checksum_error =
        |e: io::Error| CaptureError::io(CapturePhase::Finalize, format!("failed to read file for checksum: {}", e));

    let mut file = File::open(path).map_err(checksum_error)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(checksum_error)?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
