use alloc::string::String;
use enough::StopReason;

use crate::decode::DecodeState;

/// Errors from stream access, decoding, buffer allocation and marshaling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ImageError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("operation not allowed in decoder state {0:?}")]
    InvalidState(DecodeState),

    #[error("source data incomplete")]
    SourceIncomplete,

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unrecognized format magic bytes")]
    UnrecognizedFormat,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid pixel data: {0}")]
    InvalidData(String),

    #[error("unsupported format variant: {0}")]
    UnsupportedVariant(String),

    #[error("decode failed: {0}")]
    DecodeAbnormal(String),

    #[error("allocation of {0} bytes failed")]
    MallocAbnormal(usize),

    #[error("dimensions too large: {width}x{height}")]
    DimensionsTooLarge { width: u32, height: u32 },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("frame index {index} out of range ({count} frames)")]
    FrameOutOfRange { index: u32, count: u32 },

    #[error("buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("parcel error: {0}")]
    Parcel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled(StopReason),
}

impl From<StopReason> for ImageError {
    fn from(r: StopReason) -> Self {
        ImageError::Cancelled(r)
    }
}

/// The error category surfaced to callers.
///
/// Several [`ImageError`] variants share a kind; callers that only need to
/// decide between "retry with more data", "give up" and "fix the call" should
/// match on this instead of the variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Wrong arguments or an operation issued in the wrong state.
    InvalidParameter,
    /// More bytes are needed; feed the stream and repeat the call.
    SourceIncomplete,
    /// The bitstream violates its format. Terminal for the session.
    SourceMalformed,
    /// The bitstream codec failed. Terminal for the session.
    DecodeAbnormal,
    /// Memory could not be obtained. Terminal for the session.
    MallocAbnormal,
    /// The output would exceed the configured maximum. Nothing was allocated.
    TooLarge,
    /// A stop token fired.
    Cancelled,
    /// Parcel layout or descriptor transfer failure.
    Ipc,
}

impl ImageError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_)
            | Self::InvalidState(_)
            | Self::FrameOutOfRange { .. }
            | Self::BufferTooSmall { .. } => ErrorKind::InvalidParameter,
            Self::SourceIncomplete => ErrorKind::SourceIncomplete,
            Self::UnexpectedEof
            | Self::UnrecognizedFormat
            | Self::InvalidHeader(_)
            | Self::InvalidData(_) => ErrorKind::SourceMalformed,
            Self::UnsupportedVariant(_) | Self::DecodeAbnormal(_) | Self::Io(_) => {
                ErrorKind::DecodeAbnormal
            }
            Self::MallocAbnormal(_) => ErrorKind::MallocAbnormal,
            Self::DimensionsTooLarge { .. } | Self::LimitExceeded(_) => ErrorKind::TooLarge,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Parcel(_) => ErrorKind::Ipc,
        }
    }

    /// Whether repeating the call after supplying more data can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::SourceIncomplete | ErrorKind::Cancelled)
    }
}
