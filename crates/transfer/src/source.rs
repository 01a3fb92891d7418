use bytes::Bytes;
use futures::TryStreamExt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use haulbay_store::ByteStream;

/// Single forward-only cursor shared by every segment cut from a sequential
/// source.
pub type SharedReader = Arc<tokio::sync::Mutex<Box<dyn AsyncRead + Send + Unpin>>>;

/// The content behind an upload, with its total length known up front.
///
/// A `File` source is seekable: any byte range can be opened independently
/// and parts may be transferred in any order. A `Stream` source has one
/// shared cursor; segments cut from it must be consumed in strictly
/// increasing part-number order, which the part generator cannot enforce.
#[derive(Clone)]
pub enum ContentSource {
    File { path: PathBuf, length: u64 },
    Stream { reader: SharedReader, length: u64 },
}

impl ContentSource {
    /// File source, with the length taken from filesystem metadata.
    pub async fn for_file(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let length = tokio::fs::metadata(&path).await?.len();

        Ok(Self::File { path, length })
    }

    pub fn for_reader(reader: impl AsyncRead + Send + Unpin + 'static, length: u64) -> Self {
        Self::Stream {
            reader: Arc::new(tokio::sync::Mutex::new(Box::new(reader))),
            length,
        }
    }

    pub fn length(&self) -> u64 {
        match self {
            Self::File { length, .. } | Self::Stream { length, .. } => *length,
        }
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    /// View scoped to exactly `[offset, offset + size)`. For a sequential
    /// source the offset is implied by the cursor position.
    pub(crate) fn slice(&self, offset: u64, size: u64) -> PartData {
        match self {
            Self::File { path, .. } => PartData::FileRange {
                path: path.clone(),
                offset,
                size,
            },
            Self::Stream { reader, .. } => PartData::StreamSegment {
                reader: reader.clone(),
                size,
            },
        }
    }
}

/// The byte view carried by one part request.
pub enum PartData {
    FileRange { path: PathBuf, offset: u64, size: u64 },
    StreamSegment { reader: SharedReader, size: u64 },
}

impl PartData {
    pub fn size(&self) -> u64 {
        match self {
            Self::FileRange { size, .. } | Self::StreamSegment { size, .. } => *size,
        }
    }

    /// Materialize the view as a stream of exactly `size` bytes.
    ///
    /// For a stream segment this advances the shared cursor, so segments must
    /// be opened in the order the generator produced them.
    pub async fn open(self) -> std::io::Result<ByteStream> {
        match self {
            PartData::FileRange { path, offset, size } => {
                let mut file = tokio::fs::File::open(&path).await?;
                file.seek(SeekFrom::Start(offset)).await?;

                let reader = tokio::io::BufReader::new(file).take(size);
                let stream = ReaderStream::new(reader).map_err(anyhow::Error::from);

                Ok(Box::pin(stream))
            }
            PartData::StreamSegment { reader, size } => {
                let mut buf = vec![0u8; size as usize];
                {
                    let mut cursor = reader.lock().await;
                    cursor.read_exact(&mut buf).await?;
                }

                let chunk = Bytes::from(buf);
                Ok(Box::pin(futures::stream::once(async move {
                    Ok::<_, anyhow::Error>(chunk)
                })))
            }
        }
    }
}
