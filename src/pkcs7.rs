//! PKCS#7 `SignedData` round-tripping.
//!
//! The attribute-certificate section of a signed binary contains a DER
//! `SignedData` whose bytes are covered by the Authenticode digest of other
//! consumers. Any re-encoding drift would corrupt the signature for them, so
//! the model here is deliberately shallow: `digestAlgorithms`, `contentInfo`
//! and `signerInfos` stay as raw [`Any`] values and the certificate set is an
//! order-preserving list of raw certificates. Parsing re-encodes and compares
//! against the input, refusing to proceed on any mismatch.

use der::asn1::{Any, ContextSpecificRef, ObjectIdentifier};
use der::{
    Decode, DecodeValue, Encode, EncodeValue, FixedTag, Header, Length, Reader, Tag, TagMode,
    TagNumber, Writer,
};
use x509_cert::Certificate;

use crate::cert;
use crate::error::{TagError, TagResult};

/// OID of the extension carrying the tag in the superfluous certificate.
/// It lies in the Google arc but is not officially assigned.
pub const TAG_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.1.9999");

/// `[0] IMPLICIT` certificate set inside `SignedData`.
const CERTIFICATES_TAG: Tag = Tag::ContextSpecific {
    constructed: true,
    number: TagNumber::N0,
};

/// `[0] EXPLICIT` wrapper around the `SignedData` body.
const CONTENT_TAG: Tag = Tag::ContextSpecific {
    constructed: true,
    number: TagNumber::N0,
};

/// Reads the DER length prefix at `asn1[1..]` and returns the total length of
/// the outer object, including the tag and length bytes. Accepts the short
/// form and the long form with one or two size bytes.
pub fn asn1_length(asn1: &[u8]) -> TagResult<usize> {
    if asn1.len() < 2 {
        return Err(TagError::Truncated);
    }
    if asn1[1] & 0x80 == 0 {
        // Short form.
        return Ok(usize::from(asn1[1]) + 2);
    }
    let num_bytes = usize::from(asn1[1] & 0x7f);
    if num_bytes == 0 || num_bytes > 2 {
        return Err(TagError::BadAsn1Length(asn1[1] & 0x7f));
    }
    if asn1.len() < num_bytes + 2 {
        return Err(TagError::Truncated);
    }
    let mut length = usize::from(asn1[2]);
    if num_bytes == 2 {
        length = (length << 8) | usize::from(asn1[3]);
    }
    Ok(length + 2 + num_bytes)
}

/// A PKCS#7 `SignedData` structure: the content-type OID and the
/// `[0] EXPLICIT`-wrapped body.
#[derive(Debug, Clone)]
pub struct SignedData {
    pub content_type: ObjectIdentifier,
    pub content: SignedDataContent,
}

/// The body of a `SignedData`. Only `certificates` is interpreted; the other
/// fields round-trip untouched.
#[derive(Debug, Clone)]
pub struct SignedDataContent {
    pub version: u8,
    pub digest_algorithms: Any,
    pub content_info: Any,
    /// Raw certificates, in file order. DER `SET OF` ordering is *not*
    /// re-imposed on encode; signed files in the wild do not sort this set and
    /// re-sorting would break the round-trip guarantee.
    pub certificates: Vec<Any>,
    pub signer_infos: Any,
}

impl FixedTag for SignedData {
    const TAG: Tag = Tag::Sequence;
}

impl<'a> DecodeValue<'a> for SignedData {
    fn decode_value<R: Reader<'a>>(reader: &mut R, _header: Header) -> der::Result<Self> {
        let content_type = reader.decode()?;
        let header = Header::decode(reader)?;
        header.tag.assert_eq(CONTENT_TAG)?;
        let content = reader.read_nested(header.length, |nested| {
            SignedDataContent::decode(nested)
        })?;
        Ok(Self {
            content_type,
            content,
        })
    }
}

impl EncodeValue for SignedData {
    fn value_len(&self) -> der::Result<Length> {
        let wrapper = ContextSpecificRef {
            tag_number: TagNumber::N0,
            tag_mode: TagMode::Explicit,
            value: &self.content,
        };
        self.content_type.encoded_len()? + wrapper.encoded_len()?
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        self.content_type.encode(writer)?;
        ContextSpecificRef {
            tag_number: TagNumber::N0,
            tag_mode: TagMode::Explicit,
            value: &self.content,
        }
        .encode(writer)
    }
}

impl FixedTag for SignedDataContent {
    const TAG: Tag = Tag::Sequence;
}

impl<'a> DecodeValue<'a> for SignedDataContent {
    fn decode_value<R: Reader<'a>>(reader: &mut R, _header: Header) -> der::Result<Self> {
        let version = reader.decode()?;
        let digest_algorithms = reader.decode()?;
        let content_info = reader.decode()?;
        let mut certificates = Vec::new();
        if !reader.is_finished() && reader.peek_tag()? == CERTIFICATES_TAG {
            let header = Header::decode(reader)?;
            reader.read_nested(header.length, |nested| {
                while !nested.is_finished() {
                    certificates.push(nested.decode()?);
                }
                Ok(())
            })?;
        }
        let signer_infos = reader.decode()?;
        Ok(Self {
            version,
            digest_algorithms,
            content_info,
            certificates,
            signer_infos,
        })
    }
}

impl EncodeValue for SignedDataContent {
    fn value_len(&self) -> der::Result<Length> {
        let certs_content = self.certificates_len()?;
        let certs_header = Header {
            tag: CERTIFICATES_TAG,
            length: certs_content,
        };
        let mut len = self.version.encoded_len()?;
        len = (len + self.digest_algorithms.encoded_len()?)?;
        len = (len + self.content_info.encoded_len()?)?;
        len = (len + certs_header.encoded_len()?)?;
        len = (len + certs_content)?;
        len = (len + self.signer_infos.encoded_len()?)?;
        Ok(len)
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        self.version.encode(writer)?;
        self.digest_algorithms.encode(writer)?;
        self.content_info.encode(writer)?;
        // The certificate set is emitted even when empty, so a SignedData
        // without one fails the round-trip guard rather than being silently
        // rewritten with an extra element.
        Header {
            tag: CERTIFICATES_TAG,
            length: self.certificates_len()?,
        }
        .encode(writer)?;
        for certificate in &self.certificates {
            certificate.encode(writer)?;
        }
        self.signer_infos.encode(writer)
    }
}

impl SignedDataContent {
    fn certificates_len(&self) -> der::Result<Length> {
        let mut len = Length::ZERO;
        for certificate in &self.certificates {
            len = (len + certificate.encoded_len()?)?;
        }
        Ok(len)
    }
}

/// Parses a DER `SignedData` and verifies that re-encoding reproduces the
/// input byte for byte.
pub fn parse_signed_data(asn1_data: &[u8]) -> TagResult<SignedData> {
    let signed_data = SignedData::from_der(asn1_data)?;
    if signed_data.to_der()? != asn1_data {
        return Err(TagError::AsnRoundTripFailed);
    }
    Ok(signed_data)
}

impl SignedData {
    /// Returns the index of the first certificate carrying the non-critical
    /// tag extension, if any.
    pub fn superfluous_cert_index(&self) -> TagResult<Option<usize>> {
        for (index, raw) in self.content.certificates.iter().enumerate() {
            let certificate = Certificate::from_der(&raw.to_der()?)?;
            if let Some(extensions) = &certificate.tbs_certificate.extensions {
                for extension in extensions {
                    if !extension.critical && extension.extn_id == TAG_OID {
                        return Ok(Some(index));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Replaces any existing superfluous certificate with a freshly generated
    /// one carrying `tag`, and returns the new DER serialization.
    pub fn set_superfluous_cert_tag(&mut self, tag: &[u8]) -> TagResult<Vec<u8>> {
        if let Some(index) = self.superfluous_cert_index()? {
            self.content.certificates.remove(index);
        }
        let der = cert::new_dummy_cert(tag)?;
        self.content.certificates.push(Any::from_der(&der)?);
        Ok(self.to_der()?)
    }
}
