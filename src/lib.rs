//! Manipulates "tags" in Authenticode-signed Windows binaries.
//!
//! Tag data has traditionally been inserted after the PKCS#7 blob in the
//! attribute-certificate table (an "appended tag" here). That area is not
//! hashed when checking the signature, so it can be altered at serving time
//! without invalidating the Authenticode signature.
//!
//! Verifiers are moving to forbid trailing data, so a second carrier is also
//! supported: a "superfluous certificate" — a dummy certificate inserted into
//! the PKCS#7 certificate set that holds arbitrary data in an extension.
//! Certificates that no SignerInfo references are not hashed either, so that
//! data can equally be changed after signing.
//!
//! PE32/PE32+ executables support both carriers; MSI (compound file)
//! installers support only the superfluous certificate.

pub mod cert;
pub mod codec;
pub mod error;
pub mod msi;
pub mod pe;
pub mod pkcs7;
pub mod tag;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{TagError, TagResult};
pub use msi::MsiBinary;
pub use pe::PeBinary;
pub use tag::{find_tag, TagLocation};

/// A taggable binary of either supported format.
///
/// There is no behavior shared between the formats, only a shared operation
/// set; operations an MSI cannot support fail inside the MSI arm rather than
/// in some common layer.
#[derive(Debug)]
pub enum Binary {
    Pe(PeBinary),
    Msi(MsiBinary),
}

impl Binary {
    /// Parses `contents` as PE32 first, then as MSI. If neither parser
    /// accepts the input, both errors are reported.
    pub fn parse(contents: &[u8]) -> TagResult<Self> {
        let pe_err = match PeBinary::parse(contents.to_vec()) {
            Ok(pe) => return Ok(Binary::Pe(pe)),
            Err(err) => err,
        };
        let msi_err = match MsiBinary::parse(contents) {
            Ok(msi) => return Ok(Binary::Msi(msi)),
            Err(err) => err,
        };
        Err(TagError::UnrecognizedFormat {
            pe: Box::new(pe_err),
            msi: Box::new(msi_err),
        })
    }

    /// The appended tag, if any.
    #[must_use]
    pub fn appended_tag(&self) -> Option<&[u8]> {
        match self {
            Binary::Pe(bin) => bin.appended_tag(),
            Binary::Msi(bin) => bin.appended_tag(),
        }
    }

    /// The PKCS#7 SignedData in DER form, as found in the input.
    #[must_use]
    pub fn asn1_data(&self) -> &[u8] {
        match self {
            Binary::Pe(bin) => bin.asn1_data(),
            Binary::Msi(bin) => bin.asn1_data(),
        }
    }

    /// Rebuilds the binary with the appended tag removed.
    pub fn remove_appended_tag(&self) -> TagResult<Vec<u8>> {
        match self {
            Binary::Pe(bin) => bin.remove_appended_tag(),
            Binary::Msi(bin) => bin.remove_appended_tag(),
        }
    }

    /// Rebuilds the binary with the given appended tag.
    pub fn set_appended_tag(&self, tag_contents: &[u8]) -> TagResult<Vec<u8>> {
        match self {
            Binary::Pe(bin) => bin.set_appended_tag(tag_contents),
            Binary::Msi(bin) => bin.set_appended_tag(tag_contents),
        }
    }

    /// Returns whether the certificate set already contains a tag carrier.
    pub fn has_superfluous_cert(&self) -> TagResult<bool> {
        match self {
            Binary::Pe(bin) => bin.has_superfluous_cert(),
            Binary::Msi(bin) => bin.has_superfluous_cert(),
        }
    }

    /// Rebuilds the binary with a superfluous certificate carrying `tag`,
    /// replacing any previous one.
    pub fn set_superfluous_cert_tag(&mut self, tag: &[u8]) -> TagResult<Vec<u8>> {
        match self {
            Binary::Pe(bin) => bin.set_superfluous_cert_tag(tag),
            Binary::Msi(bin) => bin.set_superfluous_cert_tag(tag),
        }
    }

    /// Offset of the certificate region, against which [`find_tag`] searches.
    /// For PE this is the attribute-certificate table; for MSI it is where
    /// the relocated SignedData will start.
    #[must_use]
    pub fn certificate_offset(&self) -> u64 {
        match self {
            Binary::Pe(bin) => bin.certificate_offset(),
            Binary::Msi(bin) => bin.certificate_offset(),
        }
    }
}
