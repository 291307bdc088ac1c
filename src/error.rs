//! Error types shared by every tagging operation.

use thiserror::Error;

/// Result type for tagging operations
pub type TagResult<T> = Result<T, TagError>;

/// Every way a carrier parse or rewrite can fail.
///
/// Errors propagate to the caller unchanged; the library never retries and
/// never swallows. The CLI maps any of these to exit code 1 with a one-line
/// diagnostic on stderr.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("data truncated")]
    Truncated,

    #[error("bad number of bytes in ASN.1 length: {0}")]
    BadAsn1Length(u8),

    #[error("ASN.1 parse/unparse test failed")]
    AsnRoundTripFailed,

    #[error("ASN.1 error: {0}")]
    Asn1(#[from] der::Error),

    // PE32
    #[error("PE header not found at expected offset")]
    MissingPeSignature,

    #[error("file is not an executable image")]
    NotExecutableImage,

    #[error("file is a DLL")]
    IsDll,

    #[error("unknown magic in optional header: {0:#x}")]
    BadOptionalHeaderMagic(u16),

    #[error("invalid number of directory entries: {0}")]
    TooManyDirectoryEntries(u32),

    #[error("optional header contains extra data after data directory")]
    TrailingBytesInOptionalHeader,

    #[error("file does not have certificate data")]
    NoCertificateData,

    #[error("certificate entry is not at end of file")]
    CertTableNotAtEof,

    #[error("certificate table size does not match the data directory entry")]
    CertTableSizeMismatch,

    #[error("multiple attribute certificates found")]
    MultipleAttributeCerts,

    #[error("unknown attribute certificate revision: {0:#x}")]
    UnknownRevision(u16),

    #[error("unknown attribute certificate type: {0}")]
    UnknownCertType(u16),

    // MSI / compound file
    #[error("msi header signature missing")]
    BadMagic,

    #[error("msi header clsid is not zero as required")]
    BadClsid,

    #[error("unexpected msi sector shift {0}, wanted sector size 4096 or 512")]
    UnexpectedSectorShift(u16),

    #[error("did not find signature stream in msi file")]
    SignatureStreamMissing,

    #[error("ran out of sectors in copying stream {0:?}")]
    RanOutOfSectors(&'static str),

    #[error("appended tags not supported in msi files")]
    UnsupportedOnMsi,

    #[error("writing SignedData smaller than the mini-stream cutoff is not supported, got {0} bytes")]
    UnsupportedMiniStreamWrite(usize),

    // Certificate synthesis
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("signing error: {0}")]
    Signature(#[from] rsa::signature::Error),

    #[error("public key encoding error: {0}")]
    Spki(#[from] x509_cert::spki::Error),

    // Tag location
    #[error("no tag found")]
    TagNotFound,

    #[error("tag or its length field extends beyond the end of the data")]
    TagTooShort,

    #[error("want final tag length in range [256, 65535], got {0}")]
    TagLengthOutOfRange(usize),

    // Dispatch and CLI
    #[error("could not parse input as either PE32 or MSI:\nPE32: {pe}\nMSI: {msi}")]
    UnrecognizedFormat {
        pe: Box<TagError>,
        msi: Box<TagError>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
