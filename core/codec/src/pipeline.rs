//! Chunked load and save of encrypted save files.
//!
//! Each operation is one sequential pass: CBC chaining forbids processing
//! chunks out of order. Between chunks the pipeline checks the
//! cancellation token, reports progress and yields to the runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use atosave_common::{Error, Result};
use atosave_crypto::{DesCbcDecryptor, DesCbcEncryptor};
use atosave_graph::{decode, encode, Node, TypeForwardingRegistry};

use crate::bridge::{apply_document, document_from_graph, document_to_graph};
use crate::config::CodecConfig;
use crate::document::SaveDocument;
use crate::progress::{Outcome, ProgressReporter};

const READ_END: u8 = 90;
const DECODE_STARTED: u8 = 95;
const ENCODED: u8 = 30;
/// Writing stops short of 100 until the destination is final.
const WRITE_END: u8 = 99;

/// Cap on the initial cleartext buffer, in chunks.
const MAX_PREALLOCATED_CHUNKS: usize = 64;

/// Suffix of the copy kept when a save replaces an existing file.
pub const BACKUP_SUFFIX: &str = ".backup";

/// A loaded save: the document plus the graph it was read from.
///
/// Saving with `graph` as the base keeps every field the document does not
/// cover.
#[derive(Debug, Clone)]
pub struct LoadedSave {
    pub document: SaveDocument,
    pub graph: Node,
}

/// Loads and saves documents with one configuration.
///
/// Cloning is cheap; clones share the immutable forwarding registry.
#[derive(Debug, Clone)]
pub struct SaveCodec {
    config: Arc<CodecConfig>,
    registry: Arc<TypeForwardingRegistry>,
}

impl SaveCodec {
    /// Validate `config` and build the codec.
    ///
    /// # Errors
    /// - Invalid configuration (see `CodecConfig::validate`)
    pub fn new(config: CodecConfig) -> Result<Self> {
        let registry = config.validate()?;
        debug!(
            chunk_size = config.chunk_size,
            forwarding_rules = registry.len(),
            "Save codec configured"
        );
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
        })
    }

    /// Read, decrypt and decode a save from `reader`.
    ///
    /// `total_len` is the expected ciphertext length, used only to scale
    /// progress. Reading maps to 0-90%, decoding reports 95% when it starts
    /// and 100% when the document is ready.
    ///
    /// # Postconditions
    /// - No progress is reported after cancellation or failure
    ///
    /// # Errors
    /// - Read failure
    /// - Empty, misaligned or badly padded ciphertext (wrong key or corrupt file)
    /// - Malformed or unsupported graph
    /// - Graph does not hold a save document
    pub async fn load_document<R, F>(
        &self,
        mut reader: R,
        total_len: u64,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<Outcome<LoadedSave>>
    where
        R: AsyncRead + Unpin,
        F: FnMut(u8),
    {
        let mut progress = ProgressReporter::new(on_progress);
        let mut decryptor = DesCbcDecryptor::new(&self.config.key, &self.config.iv)?;
        let mut cleartext = Vec::with_capacity(capacity_hint(total_len, self.config.chunk_size));
        let mut chunk = vec![0u8; self.config.chunk_size];
        let mut read_total = 0u64;

        loop {
            if cancel.is_cancelled() {
                debug!(bytes_read = read_total, "Load cancelled");
                return Ok(Outcome::Cancelled);
            }
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            read_total += n as u64;
            cleartext.extend_from_slice(&decryptor.update(&chunk[..n]));
            progress.report_fraction(read_total, total_len, 0, READ_END);
            tokio::task::yield_now().await;
        }
        cleartext.extend_from_slice(&decryptor.finish()?);

        if cancel.is_cancelled() {
            debug!(bytes_read = read_total, "Load cancelled before decode");
            return Ok(Outcome::Cancelled);
        }
        progress.report(READ_END);
        progress.report(DECODE_STARTED);

        let graph = decode(&cleartext, &self.registry)?;
        let document = document_from_graph(&graph)?;
        progress.report(100);

        debug!(
            ciphertext = read_total,
            cleartext = cleartext.len(),
            "Save decoded"
        );
        Ok(Outcome::Completed(LoadedSave { document, graph }))
    }

    /// Load a save file from disk.
    ///
    /// # Errors
    /// - File cannot be opened
    /// - Any `load_document` error
    pub async fn load_file<F>(
        &self,
        path: impl AsRef<Path>,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<Outcome<LoadedSave>>
    where
        F: FnMut(u8),
    {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading save file");

        let file = fs::File::open(path).await?;
        let total_len = file.metadata().await?.len();
        let outcome = self
            .load_document(file, total_len, on_progress, cancel)
            .await?;

        if !outcome.is_cancelled() {
            info!(path = %path.display(), size = total_len, "Save file loaded");
        }
        Ok(outcome)
    }

    /// Encode, encrypt and write a document to `writer`.
    ///
    /// With a `base_graph` (normally the graph the document was loaded
    /// from) the document fields are written into a copy of it and every
    /// other field is kept. Without one a fresh graph is built.
    ///
    /// Encoding reports 30%, writing maps to 30-99%, and 100% follows the
    /// final flush. Returns the number of bytes written.
    ///
    /// # Postconditions
    /// - On cancellation `writer` may hold a partial, invalid prefix; use
    ///   `save_file` to keep the destination intact
    ///
    /// # Errors
    /// - Document does not fit the base graph
    /// - Write failure
    pub async fn save_document<W, F>(
        &self,
        document: &SaveDocument,
        base_graph: Option<&Node>,
        mut writer: W,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<Outcome<u64>>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u8),
    {
        let mut progress = ProgressReporter::new(on_progress);
        let outcome = self
            .write_encrypted(document, base_graph, &mut writer, &mut progress, cancel)
            .await?;
        if !outcome.is_cancelled() {
            progress.report(100);
        }
        Ok(outcome)
    }

    /// Save a document to `path` atomically.
    ///
    /// Output goes to a temporary file next to `path`, which is renamed
    /// into place only after a complete write. If `path` already exists and
    /// backups are enabled it is first copied to `<path>.backup`; a failed
    /// backup is logged and the save continues.
    ///
    /// # Postconditions
    /// - On cancellation or failure `path` is untouched and the temporary
    ///   file is removed
    ///
    /// # Errors
    /// - Any `save_document` error
    /// - Temporary file cannot be created, synced or renamed
    pub async fn save_file<F>(
        &self,
        document: &SaveDocument,
        base_graph: Option<&Node>,
        path: impl AsRef<Path>,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<Outcome<()>>
    where
        F: FnMut(u8),
    {
        let path = path.as_ref();
        debug!(path = %path.display(), "Saving save file");

        let mut progress = ProgressReporter::new(on_progress);
        let temp_path = temp_path_for(path)?;
        let mut file = fs::File::create(&temp_path).await?;

        let written = match self
            .write_encrypted(document, base_graph, &mut file, &mut progress, cancel)
            .await
        {
            Ok(Outcome::Completed(written)) => written,
            Ok(Outcome::Cancelled) => {
                drop(file);
                discard(&temp_path).await;
                debug!(path = %path.display(), "Save cancelled");
                return Ok(Outcome::Cancelled);
            }
            Err(e) => {
                drop(file);
                discard(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = file.sync_all().await {
            drop(file);
            discard(&temp_path).await;
            return Err(e.into());
        }
        drop(file);

        if self.config.backup && fs::try_exists(path).await.unwrap_or(false) {
            let backup = backup_path(path);
            match fs::copy(path, &backup).await {
                Ok(_) => debug!(backup = %backup.display(), "Backup written"),
                Err(e) => warn!(backup = %backup.display(), error = %e, "Could not write backup"),
            }
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            discard(&temp_path).await;
            return Err(e.into());
        }
        progress.report(100);

        info!(path = %path.display(), size = written, "Save file written");
        Ok(Outcome::Completed(()))
    }

    async fn write_encrypted<W, F>(
        &self,
        document: &SaveDocument,
        base_graph: Option<&Node>,
        writer: &mut W,
        progress: &mut ProgressReporter<F>,
        cancel: &CancellationToken,
    ) -> Result<Outcome<u64>>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u8),
    {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let graph = match base_graph {
            Some(base) => {
                let mut graph = base.clone();
                apply_document(document, &mut graph)?;
                graph
            }
            None => document_to_graph(document),
        };
        let cleartext = encode(&graph)?;
        progress.report(ENCODED);

        let mut encryptor = DesCbcEncryptor::new(&self.config.key, &self.config.iv)?;
        let total = cleartext.len() as u64;
        let mut processed = 0u64;
        let mut written = 0u64;

        for chunk in cleartext.chunks(self.config.chunk_size) {
            if cancel.is_cancelled() {
                debug!(bytes_written = written, "Write cancelled");
                return Ok(Outcome::Cancelled);
            }
            let ciphertext = encryptor.update(chunk);
            writer.write_all(&ciphertext).await?;
            processed += chunk.len() as u64;
            written += ciphertext.len() as u64;
            progress.report_fraction(processed, total, ENCODED, WRITE_END);
            tokio::task::yield_now().await;
        }

        let tail = encryptor.finish();
        writer.write_all(&tail).await?;
        writer.flush().await?;
        written += tail.len() as u64;
        progress.report(WRITE_END);

        debug!(cleartext = total, ciphertext = written, "Save encoded");
        Ok(Outcome::Completed(written))
    }
}

/// Initial cleartext buffer size. `total_len` is a caller hint and is
/// never trusted beyond a bounded number of chunks.
fn capacity_hint(total_len: u64, chunk_size: usize) -> usize {
    let limit = chunk_size.saturating_mul(MAX_PREALLOCATED_CHUNKS);
    usize::try_from(total_len).map_or(limit, |len| len.min(limit))
}

/// `<path>.backup`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// A unique hidden sibling of `path`.
fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("{} is not a file path", path.display())))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(format!(".{}.tmp", Uuid::new_v4()));
    Ok(path.with_file_name(temp_name))
}

async fn discard(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path).await {
        warn!(path = %temp_path.display(), error = %e, "Could not remove temporary file");
    }
}
