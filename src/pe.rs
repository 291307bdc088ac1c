//! PE32 attribute-certificate carrier.
//!
//! Structure offsets follow the Microsoft Portable Executable and Common
//! Object File Format specification. The attribute-certificate table sits at
//! the very end of a signed file and its bytes are excluded from the
//! Authenticode digest, which is what makes in-place tag edits possible.

use crate::codec::ByteReader;
use crate::error::{TagError, TagResult};
use crate::pkcs7::{self, SignedData};

/// Offset of the PE-header offset in the DOS stub.
const PE_HEADER_POINTER_OFFSET: usize = 0x3c;

/// Size of IMAGE_FILE_HEADER.
const FILE_HEADER_SIZE: usize = 20;

const COFF_CHARACTERISTIC_EXECUTABLE_IMAGE: u16 = 0x0002;
const COFF_CHARACTERISTIC_DLL: u16 = 0x2000;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

/// Index of the Certificate Table in the data-directory array.
const CERT_TABLE_INDEX: u32 = 4;

/// WIN_CERTIFICATE constants. Despite MSDN claiming 0x100 is the only current
/// revision, in practice it is 0x200.
const ATTRIBUTE_CERT_REVISION: u16 = 0x0200;
const ATTRIBUTE_CERT_TYPE_PKCS7_SIGNED_DATA: u16 = 0x0002;

/// A parsed PE32/PE32+ binary with a single attribute certificate.
#[derive(Debug)]
pub struct PeBinary {
    /// The full input file.
    contents: Vec<u8>,
    /// Offset of the attribute-certificate table.
    attr_cert_offset: usize,
    /// Offset of the table's 32-bit size field inside the data directory.
    cert_size_offset: usize,
    /// The PKCS#7 SignedData in DER form.
    asn1_bytes: Vec<u8>,
    /// Trailing bytes in the table beyond the DER object.
    appended_tag: Vec<u8>,
    signed_data: SignedData,
}

struct AttrCertTable {
    offset: usize,
    size: usize,
    size_offset: usize,
}

/// Walks the PE headers to the Certificate Table data-directory entry and
/// returns the table's position plus the file offset of its size field.
fn attribute_certificate_table(contents: &[u8]) -> TagResult<AttrCertTable> {
    if contents.len() < PE_HEADER_POINTER_OFFSET + 4 {
        return Err(TagError::Truncated);
    }
    let pe_offset = u32::from_le_bytes([
        contents[PE_HEADER_POINTER_OFFSET],
        contents[PE_HEADER_POINTER_OFFSET + 1],
        contents[PE_HEADER_POINTER_OFFSET + 2],
        contents[PE_HEADER_POINTER_OFFSET + 3],
    ]) as usize;
    let signature_end = pe_offset.checked_add(4).ok_or(TagError::Truncated)?;
    if signature_end > contents.len() {
        return Err(TagError::Truncated);
    }
    if &contents[pe_offset..signature_end] != b"PE\0\0" {
        return Err(TagError::MissingPeSignature);
    }

    let mut reader = ByteReader::new(&contents[signature_end..]);

    // IMAGE_FILE_HEADER.
    let _machine = reader.read_u16()?;
    let _number_of_sections = reader.read_u16()?;
    let _time_date_stamp = reader.read_u32()?;
    let _pointer_to_symbol_table = reader.read_u32()?;
    let _number_of_symbols = reader.read_u32()?;
    let size_of_optional_header = reader.read_u16()?;
    let characteristics = reader.read_u16()?;

    if characteristics & COFF_CHARACTERISTIC_EXECUTABLE_IMAGE == 0 {
        return Err(TagError::NotExecutableImage);
    }
    if characteristics & COFF_CHARACTERISTIC_DLL != 0 {
        return Err(TagError::IsDll);
    }

    // The optional header is bounded by SizeOfOptionalHeader and must be
    // exhausted exactly by the data-directory array.
    let optional = reader.take(usize::from(size_of_optional_header))?;
    let mut reader = ByteReader::new(optional);

    let magic = reader.read_u16()?;
    let _major_linker_version = reader.read_u8()?;
    let _minor_linker_version = reader.read_u8()?;
    let _size_of_code = reader.read_u32()?;
    let _size_of_initialized_data = reader.read_u32()?;
    let _size_of_uninitialized_data = reader.read_u32()?;
    let _address_of_entry_point = reader.read_u32()?;
    let _base_of_code = reader.read_u32()?;

    // addressSize is the width of the address-valued fields in the
    // Windows-specific header to follow.
    let address_size = match magic {
        PE32_PLUS_MAGIC => 8,
        PE32_MAGIC => {
            // PE32 carries an extra BaseOfData field.
            let _base_of_data = reader.read_u32()?;
            4
        }
        other => return Err(TagError::BadOptionalHeaderMagic(other)),
    };

    // Skip the Windows-specific header up to NumberOfRvaAndSizes.
    reader.skip(address_size + 40 + 4 * address_size + 4)?;

    let num_directory_entries = reader.read_u32()?;
    if num_directory_entries > 4096 {
        return Err(TagError::TooManyDirectoryEntries(num_directory_entries));
    }
    if num_directory_entries <= CERT_TABLE_INDEX {
        return Err(TagError::NoCertificateData);
    }

    let mut cert_entry = (0u32, 0u32);
    for index in 0..num_directory_entries {
        let virtual_address = reader.read_u32()?;
        let size = reader.read_u32()?;
        if index == CERT_TABLE_INDEX {
            cert_entry = (virtual_address, size);
        }
    }
    if !reader.is_empty() {
        return Err(TagError::TrailingBytesInOptionalHeader);
    }

    let (virtual_address, size) = cert_entry;
    if virtual_address == 0 {
        return Err(TagError::NoCertificateData);
    }
    let table_end = virtual_address
        .checked_add(size)
        .ok_or(TagError::CertTableNotAtEof)?;
    if table_end as usize != contents.len() {
        return Err(TagError::CertTableNotAtEof);
    }

    // The size field of data-directory entry 4, counted back from the end of
    // the optional header.
    let size_offset = (pe_offset + 4 + FILE_HEADER_SIZE + usize::from(size_of_optional_header))
        .checked_sub(8 * (num_directory_entries as usize - CERT_TABLE_INDEX as usize))
        .ok_or(TagError::Truncated)?
        + 4;
    let stored = contents
        .get(size_offset..size_offset + 4)
        .ok_or(TagError::Truncated)?;
    if u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]) != size {
        return Err(TagError::CertTableSizeMismatch);
    }

    Ok(AttrCertTable {
        offset: virtual_address as usize,
        size: size as usize,
        size_offset,
    })
}

/// Splits an attribute-certificate table into the DER SignedData and the
/// trailing appended-tag bytes, validating the WIN_CERTIFICATE wrapper.
fn split_attribute_certificates(table: &[u8]) -> TagResult<(Vec<u8>, Vec<u8>)> {
    let mut reader = ByteReader::new(table);
    let length = reader.read_u32()?;
    let revision = reader.read_u16()?;
    let cert_type = reader.read_u16()?;

    if length as usize != table.len() {
        return Err(TagError::MultipleAttributeCerts);
    }
    if revision != ATTRIBUTE_CERT_REVISION {
        return Err(TagError::UnknownRevision(revision));
    }
    if cert_type != ATTRIBUTE_CERT_TYPE_PKCS7_SIGNED_DATA {
        return Err(TagError::UnknownCertType(cert_type));
    }

    let rest = &table[8..];
    let asn1_len = pkcs7::asn1_length(rest)?;
    if asn1_len > rest.len() {
        return Err(TagError::Truncated);
    }
    Ok((rest[..asn1_len].to_vec(), rest[asn1_len..].to_vec()))
}

impl PeBinary {
    /// Parses a PE32/PE32+ binary and its attribute-certificate table.
    pub fn parse(contents: Vec<u8>) -> TagResult<Self> {
        let table = attribute_certificate_table(&contents)?;
        let (asn1_bytes, appended_tag) =
            split_attribute_certificates(&contents[table.offset..table.offset + table.size])?;
        let signed_data = pkcs7::parse_signed_data(&asn1_bytes)?;
        Ok(Self {
            contents,
            attr_cert_offset: table.offset,
            cert_size_offset: table.size_offset,
            asn1_bytes,
            appended_tag,
            signed_data,
        })
    }

    /// The appended tag, if one is present. A trailer shorter than eight bytes
    /// that is entirely zero is alignment padding, not a tag.
    #[must_use]
    pub fn appended_tag(&self) -> Option<&[u8]> {
        let is_all_zero = self.appended_tag.iter().all(|&b| b == 0);
        if is_all_zero && self.appended_tag.len() < 8 {
            return None;
        }
        Some(&self.appended_tag)
    }

    /// The PKCS#7 SignedData in DER form.
    #[must_use]
    pub fn asn1_data(&self) -> &[u8] {
        &self.asn1_bytes
    }

    /// Rebuilds the file with the given SignedData and appended tag. The tag
    /// is zero-padded so the table stays 8-byte aligned, and both copies of
    /// the table size are rewritten.
    fn build_binary(&self, asn1_data: &[u8], tag: &[u8]) -> Vec<u8> {
        let mut tag = tag.to_vec();
        while (asn1_data.len() + tag.len()) % 8 != 0 {
            tag.push(0);
        }
        let section_length = (8 + asn1_data.len() + tag.len()) as u32;

        let mut contents =
            Vec::with_capacity(self.attr_cert_offset + 8 + asn1_data.len() + tag.len());
        contents.extend_from_slice(&self.contents[..self.cert_size_offset]);
        contents.extend_from_slice(&section_length.to_le_bytes());
        contents
            .extend_from_slice(&self.contents[self.cert_size_offset + 4..self.attr_cert_offset]);
        contents.extend_from_slice(&section_length.to_le_bytes());
        contents.extend_from_slice(&ATTRIBUTE_CERT_REVISION.to_le_bytes());
        contents.extend_from_slice(&ATTRIBUTE_CERT_TYPE_PKCS7_SIGNED_DATA.to_le_bytes());
        contents.extend_from_slice(asn1_data);
        contents.extend_from_slice(&tag);
        contents
    }

    /// Rebuilds the file without an appended tag. Errors if none is present.
    pub fn remove_appended_tag(&self) -> TagResult<Vec<u8>> {
        if self.appended_tag().is_none() {
            return Err(TagError::TagNotFound);
        }
        Ok(self.build_binary(&self.asn1_bytes, &[]))
    }

    /// Rebuilds the file with the given appended tag.
    pub fn set_appended_tag(&self, tag_contents: &[u8]) -> TagResult<Vec<u8>> {
        Ok(self.build_binary(&self.asn1_bytes, tag_contents))
    }

    /// Returns whether the certificate set already contains a tag carrier.
    pub fn has_superfluous_cert(&self) -> TagResult<bool> {
        Ok(self.signed_data.superfluous_cert_index()?.is_some())
    }

    /// Rebuilds the file with a superfluous certificate carrying `tag`,
    /// preserving any appended tag. The parsed SignedData is modified;
    /// `asn1_data()` keeps returning the original bytes.
    pub fn set_superfluous_cert_tag(&mut self, tag: &[u8]) -> TagResult<Vec<u8>> {
        let asn1_data = self.signed_data.set_superfluous_cert_tag(tag)?;
        Ok(self.build_binary(&asn1_data, &self.appended_tag))
    }

    /// File offset of the attribute-certificate table.
    #[must_use]
    pub fn certificate_offset(&self) -> u64 {
        self.attr_cert_offset as u64
    }
}
