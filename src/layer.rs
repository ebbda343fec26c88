use std::{
    fs::File,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use reqwest::{Response, Url};
use tar::Archive;
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, info, warn};

use crate::{registry::HttpTransport, RepossessedError, Result};

/// Name of the archive written next to the extracted tree while a layer downloads.
pub const ARCHIVE_NAME: &str = "data.tgz";

const CHUNK_SIZE: usize = 8 * 1024;

/// Magic value for `--first` (drop the trailing layer) and `--index` (last layer).
pub const LAST_LAYER_SENTINEL: usize = 99;

/// Which layers of a manifest to pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSelection {
    /// The first `n` layers. `n == 99` keeps all of them but the last, which
    /// is usually the base image and rarely interesting.
    First(usize),
    /// A single layer by position. `99` means the last one.
    Index(usize),
    Nothing,
}

impl LayerSelection {
    /// `first` wins over `index`. A zero `first` counts as unset.
    pub fn from_args(index: Option<usize>, first: Option<usize>) -> Self {
        match (first, index) {
            (Some(n), _) if n > 0 => LayerSelection::First(n),
            (_, Some(i)) => LayerSelection::Index(i),
            _ => LayerSelection::Nothing,
        }
    }

    pub fn apply<'a>(&self, digests: &'a [String]) -> Result<Vec<&'a String>> {
        match *self {
            LayerSelection::First(n) => {
                let mut picked: Vec<_> = digests.iter().take(n).collect();
                if n == LAST_LAYER_SENTINEL {
                    picked.pop();
                }
                Ok(picked)
            }
            LayerSelection::Index(i) => {
                let i = if i == LAST_LAYER_SENTINEL {
                    digests.len().saturating_sub(1)
                } else {
                    i
                };

                digests
                    .get(i)
                    .map(|digest| vec![digest])
                    .ok_or(RepossessedError::LayerIndexOutOfRange {
                        index: i,
                        len: digests.len(),
                    })
            }
            LayerSelection::Nothing => Ok(Vec::new()),
        }
    }
}

/// Download the blob at `blob_url` into `dest/data.tgz`, unpack it into
/// `dest` and delete the archive.
///
/// A failed request or a non-2xx status is an error. If the connection drops
/// while the body streams, the partial archive is removed and `Ok(None)` comes
/// back without touching the rest of `dest`.
pub async fn fetch_and_extract(
    transport: &HttpTransport,
    blob_url: &Url,
    dest: &Path,
) -> Result<Option<PathBuf>> {
    fs::create_dir_all(dest).await?;
    let archive_path = dest.join(ARCHIVE_NAME);

    info!("Downloading {blob_url} to {}", archive_path.display());
    let response = transport.get_stream(blob_url).await?;

    match download_and_unpack(response, &archive_path, dest).await {
        Ok(true) => {
            fs::remove_file(&archive_path).await?;
            debug!(dest = %dest.display(), "Layer extracted");
            Ok(Some(dest.to_path_buf()))
        }
        Ok(false) => {
            warn!(%blob_url, "Download interrupted, skipping layer");
            fs::remove_file(&archive_path).await?;
            Ok(None)
        }
        Err(err) => {
            if let Err(cleanup) = fs::remove_file(&archive_path).await {
                debug!(%cleanup, "Cannot remove {}", archive_path.display());
            }
            Err(err)
        }
    }
}

/// Stream the body into `archive_path` and unpack it into `dest`. `Ok(false)`
/// when the body broke off midway; nothing is unpacked then.
async fn download_and_unpack(
    mut response: Response,
    archive_path: &Path,
    dest: &Path,
) -> Result<bool> {
    let file = fs::File::create(archive_path).await?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => writer.write_all(&chunk).await?,
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "Body stream failed");
                return Ok(false);
            }
        }
    }
    writer.flush().await?;
    drop(writer);

    let archive = archive_path.to_path_buf();
    let target = dest.to_path_buf();
    tokio::task::spawn_blocking(move || decompress_layer(&archive, &target)).await??;

    Ok(true)
}

/// Unpack a gzip-compressed tar archive into `dest`, overwriting files that
/// earlier layers left at the same paths.
///
/// The tar crate skips entries with `..` components and re-roots absolute
/// paths under `dest`, so nothing lands outside it.
pub fn decompress_layer<P: AsRef<Path>>(archive_path: &Path, dest: P) -> Result<()> {
    let gz = GzDecoder::new(File::open(archive_path)?);
    let mut archive = Archive::new(gz);
    archive.set_overwrite(true);
    archive
        .unpack(dest)
        .map_err(|err| RepossessedError::Extraction(format!("{}: {err}", archive_path.display())))?;
    Ok(())
}
