use async_compression::tokio::bufread::{BzDecoder, GzipDecoder};
use tokio::io::{AsyncRead, BufReader};

/// 🗜️ Which decoder sits between the fetch and the parser.
///
/// Picked from the URL suffix alone. No magic-byte sniffing: the replay hosts name their
/// files honestly, and a wrong guess fails loudly in the parser anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decompression {
    Bzip2,
    Gzip,
    Passthrough,
}

impl Decompression {
    pub fn from_url(url: &str) -> Self {
        if url.ends_with("bz2") {
            Decompression::Bzip2
        } else if url.ends_with(".gz") {
            Decompression::Gzip
        } else {
            Decompression::Passthrough
        }
    }

    /// 🔧 Wrap `reader` in the matching decoder.
    pub fn wrap<R>(self, reader: R) -> Box<dyn AsyncRead + Send + Unpin>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        match self {
            Decompression::Bzip2 => {
                let mut decoder = BzDecoder::new(BufReader::new(reader));
                // -- parallel compressors write several bzip2 streams back to back
                decoder.multiple_members(true);
                Box::new(decoder)
            }
            Decompression::Gzip => {
                let mut decoder = GzipDecoder::new(BufReader::new(reader));
                decoder.multiple_members(true);
                Box::new(decoder)
            }
            Decompression::Passthrough => Box::new(reader),
        }
    }
}
