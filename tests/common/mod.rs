//! Shared fixtures: synthetic SignedData blobs, signed PE32 images and MSI
//! compound files, built byte by byte so tests depend on nothing on disk.

#![allow(dead_code)]

pub const FREESECT: u32 = 0xFFFF_FFFF;
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
pub const FATSECT: u32 = 0xFFFF_FFFD;
pub const DIFSECT: u32 = 0xFFFF_FFFC;
pub const RESERVED: u32 = 0xFFFF_FFFB;
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

pub const SECTOR_SIZE: usize = 512;

/// `1.2.840.113549.1.7.2` (PKCS#7 signedData), pre-encoded.
pub const OID_PKCS7_SIGNED_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02,
];

/// `1.2.840.113549.1.7.1` (PKCS#7 data), pre-encoded.
pub const OID_PKCS7_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01,
];

fn der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else {
        assert!(len <= 0xffff, "fixture too large for a two-byte length");
        vec![0x82, (len >> 8) as u8, len as u8]
    }
}

/// One DER element: tag, minimal definite length, content.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&der_len(content.len()));
    out.extend_from_slice(content);
    out
}

/// A minimal, valid `SignedData`: version 1, empty digest algorithms, a bare
/// `data` content info, the given raw certificates, empty signer infos.
pub fn signed_data_der(certs: &[&[u8]]) -> Vec<u8> {
    let mut inner = vec![0x02, 0x01, 0x01]; // version INTEGER 1
    inner.extend_from_slice(&[0x31, 0x00]); // digestAlgorithms SET {}
    inner.extend_from_slice(&tlv(0x30, OID_PKCS7_DATA)); // contentInfo
    inner.extend_from_slice(&tlv(0xa0, &certs.concat())); // certificates
    inner.extend_from_slice(&[0x31, 0x00]); // signerInfos SET {}

    let mut body = OID_PKCS7_SIGNED_DATA.to_vec();
    body.extend_from_slice(&tlv(0xa0, &tlv(0x30, &inner)));
    tlv(0x30, &body)
}

/// A syntactically valid X.509 certificate with no extensions and `pad` bytes
/// of zero public-key material. The signature is garbage; nothing verifies it.
pub fn filler_cert(pad: usize) -> Vec<u8> {
    let alg_sha1_rsa = tlv(
        0x30,
        &[
            &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x05][..],
            &[0x05, 0x00][..],
        ]
        .concat(),
    );
    let alg_rsa = tlv(
        0x30,
        &[
            &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01][..],
            &[0x05, 0x00][..],
        ]
        .concat(),
    );
    let name = tlv(
        0x30,
        &tlv(
            0x31,
            &tlv(
                0x30,
                &[&tlv(0x06, &[0x55, 0x04, 0x03])[..], &tlv(0x13, b"Filler")[..]].concat(),
            ),
        ),
    );
    let validity = tlv(
        0x30,
        &[
            &tlv(0x17, b"130101100000Z")[..],
            &tlv(0x17, b"130401100000Z")[..],
        ]
        .concat(),
    );
    let mut key_bits = vec![0u8];
    key_bits.extend(std::iter::repeat(0u8).take(pad));
    let spki = tlv(0x30, &[&alg_rsa[..], &tlv(0x03, &key_bits)[..]].concat());

    let tbs = tlv(
        0x30,
        &[
            &[0x02, 0x01, 0x02][..], // serial INTEGER 2
            &alg_sha1_rsa[..],
            &name[..],
            &validity[..],
            &name[..],
            &spki[..],
        ]
        .concat(),
    );
    let signature = tlv(0x03, &[0x00, 0x55, 0x55, 0x55, 0x55]);
    tlv(
        0x30,
        &[&tbs[..], &alg_sha1_rsa[..], &signature[..]].concat(),
    )
}

/// Offset of the attribute-certificate table in images from [`build_pe`].
pub const PE_CERT_TABLE_OFFSET: usize = 224;

/// A minimal signed PE32 image: DOS stub pointer, PE signature, file header,
/// a 136-byte optional header with five data-directory entries, and the
/// attribute-certificate table at end of file.
pub fn build_pe(asn1: &[u8], appended_tag: &[u8]) -> Vec<u8> {
    let table_size = 8 + asn1.len() + appended_tag.len();
    let mut image = vec![0u8; PE_CERT_TABLE_OFFSET + table_size];

    image[0x3c..0x40].copy_from_slice(&64u32.to_le_bytes());
    image[64..68].copy_from_slice(b"PE\0\0");

    // IMAGE_FILE_HEADER: machine, zero sections, SizeOfOptionalHeader 136,
    // characteristics = executable image (not a DLL).
    image[68..70].copy_from_slice(&0x014cu16.to_le_bytes());
    image[84..86].copy_from_slice(&136u16.to_le_bytes());
    image[86..88].copy_from_slice(&0x0002u16.to_le_bytes());

    // Optional header: PE32 magic at 88, NumberOfRvaAndSizes = 5 at 180,
    // data-directory entry 4 at 216.
    image[88..90].copy_from_slice(&0x10bu16.to_le_bytes());
    image[180..184].copy_from_slice(&5u32.to_le_bytes());
    image[216..220].copy_from_slice(&(PE_CERT_TABLE_OFFSET as u32).to_le_bytes());
    image[220..224].copy_from_slice(&(table_size as u32).to_le_bytes());

    // WIN_CERTIFICATE: length, revision 0x200, type 2 (PKCS#7 SignedData).
    image[224..228].copy_from_slice(&(table_size as u32).to_le_bytes());
    image[228..230].copy_from_slice(&0x0200u16.to_le_bytes());
    image[230..232].copy_from_slice(&0x0002u16.to_le_bytes());
    image[232..232 + asn1.len()].copy_from_slice(asn1);
    image[232 + asn1.len()..].copy_from_slice(appended_tag);
    image
}

fn utf16le(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in name.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// UTF-16LE "\x05DigitalSignature" including the NUL terminator.
pub fn signature_stream_name() -> Vec<u8> {
    utf16le("\u{5}DigitalSignature")
}

fn dir_entry(name_utf16: &[u8], object_type: u8, first_sector: u32, size: u64) -> [u8; 128] {
    let mut out = [0u8; 128];
    out[..name_utf16.len()].copy_from_slice(name_utf16);
    out[64..66].copy_from_slice(&(name_utf16.len() as u16).to_le_bytes());
    out[66] = object_type;
    out[67] = 1; // black
    out[68..72].copy_from_slice(&NOSTREAM.to_le_bytes());
    out[72..76].copy_from_slice(&NOSTREAM.to_le_bytes());
    out[76..80].copy_from_slice(&NOSTREAM.to_le_bytes());
    out[116..120].copy_from_slice(&first_sector.to_le_bytes());
    out[120..128].copy_from_slice(&size.to_le_bytes());
    out
}

/// The one non-signature data stream every [`build_msi`] image carries:
/// eight 512-byte sectors of a fixed non-zero pattern.
pub fn msi_data_stream() -> Vec<u8> {
    (0..8 * SECTOR_SIZE).map(|i| (i % 251) as u8 + 1).collect()
}

/// Sector layout of images from [`build_msi`]: FAT at sector 0, directory at
/// sector 1, the data stream in sectors 2-9, the signature stream from
/// sector 10.
pub const MSI_SIG_FIRST_SECTOR: u32 = 10;

/// A minimal v3 (512-byte sector) MSI compound file with a digital-signature
/// stream holding `signed_data` and one unrelated data stream.
pub fn build_msi(signed_data: &[u8]) -> Vec<u8> {
    let sig_sectors = signed_data.len().div_ceil(SECTOR_SIZE);
    let total_sectors = MSI_SIG_FIRST_SECTOR as usize + sig_sectors;
    let mut contents = vec![0u8; total_sectors * SECTOR_SIZE];

    // FAT sector 0.
    let mut fat = vec![FREESECT; SECTOR_SIZE / 4];
    fat[0] = FATSECT;
    fat[1] = ENDOFCHAIN; // directory chain
    for i in 2..9 {
        fat[i] = i as u32 + 1; // data stream chain
    }
    fat[9] = ENDOFCHAIN;
    for i in 0..sig_sectors {
        let index = MSI_SIG_FIRST_SECTOR as usize + i;
        fat[index] = if i + 1 == sig_sectors {
            ENDOFCHAIN
        } else {
            index as u32 + 1
        };
    }
    for (i, entry) in fat.iter().enumerate() {
        contents[i * 4..i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
    }

    // Directory sector 1: root, signature stream, data stream, one free slot.
    let dir_base = SECTOR_SIZE;
    let mut root = dir_entry(&utf16le("Root Entry"), 5, ENDOFCHAIN, 0);
    root[76..80].copy_from_slice(&1u32.to_le_bytes()); // child: signature entry
    contents[dir_base..dir_base + 128].copy_from_slice(&root);
    contents[dir_base + 128..dir_base + 256].copy_from_slice(&dir_entry(
        &signature_stream_name(),
        2,
        MSI_SIG_FIRST_SECTOR,
        signed_data.len() as u64,
    ));
    contents[dir_base + 256..dir_base + 384].copy_from_slice(&dir_entry(
        &utf16le("Data"),
        2,
        2,
        (8 * SECTOR_SIZE) as u64,
    ));

    // Data stream, sectors 2-9.
    let data = msi_data_stream();
    contents[2 * SECTOR_SIZE..10 * SECTOR_SIZE].copy_from_slice(&data);

    // Signature stream, sector 10 onward.
    let sig_base = MSI_SIG_FIRST_SECTOR as usize * SECTOR_SIZE;
    contents[sig_base..sig_base + signed_data.len()].copy_from_slice(signed_data);

    // Header: v3, 512-byte sectors, one FAT sector listed in the header DIFAT.
    let mut header = vec![0u8; SECTOR_SIZE];
    header[..8].copy_from_slice(&[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1]);
    header[24..26].copy_from_slice(&0x3eu16.to_le_bytes()); // minor version
    header[26..28].copy_from_slice(&3u16.to_le_bytes()); // dll version
    header[28..30].copy_from_slice(&0xfffeu16.to_le_bytes()); // byte order
    header[30..32].copy_from_slice(&9u16.to_le_bytes()); // sector shift
    header[32..34].copy_from_slice(&6u16.to_le_bytes()); // mini sector shift
    header[44..48].copy_from_slice(&1u32.to_le_bytes()); // num fat sectors
    header[48..52].copy_from_slice(&1u32.to_le_bytes()); // first dir sector
    header[56..60].copy_from_slice(&4096u32.to_le_bytes()); // mini stream cutoff
    header[60..64].copy_from_slice(&ENDOFCHAIN.to_le_bytes()); // first mini FAT sector
    header[68..72].copy_from_slice(&ENDOFCHAIN.to_le_bytes()); // first DIFAT sector
    header[76..80].copy_from_slice(&0u32.to_le_bytes()); // DIFAT[0]: FAT at sector 0
    for i in 1..109 {
        let off = 76 + i * 4;
        header[off..off + 4].copy_from_slice(&FREESECT.to_le_bytes());
    }

    header.extend_from_slice(&contents);
    header
}

/// File-domain byte range of sector `sector` in a [`build_msi`] image (the
/// 512-byte header precedes sector 0).
pub fn msi_sector_range(sector: usize) -> std::ops::Range<usize> {
    SECTOR_SIZE * (sector + 1)..SECTOR_SIZE * (sector + 2)
}

fn u16_at(bytes: &[u8], offset: usize) -> Result<u16, String> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| format!("read past end of image at offset {offset}"))
}

fn u32_at(bytes: &[u8], offset: usize) -> Result<u32, String> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("read past end of image at offset {offset}"))
}

fn signed_data_of(image: &[u8]) -> Result<certificate_tag::pkcs7::SignedData, String> {
    let bin = certificate_tag::Binary::parse(image).map_err(|e| e.to_string())?;
    certificate_tag::pkcs7::parse_signed_data(bin.asn1_data()).map_err(|e| e.to_string())
}

/// Checks an MSI image against the compound-file internal-consistency
/// invariants, walking the structures independently of the library's own
/// parser. When a reference image is given, additionally checks that every
/// data stream is bitwise identical to it and that the certificate sets match
/// apart from the dummy certificate. Returns whether the dummy certificate
/// was found.
///
/// Invariants enforced:
/// - every FAT sector listed in the DIFAT is marked `FATSECT` in the FAT;
/// - every dedicated DIFAT sector is marked `DIFSECT`, and the chain length
///   matches the header count;
/// - no sector appears twice across the directory's stream chains, and no
///   chain runs into a free or reserved entry;
/// - every stream's allocation covers its recorded size.
pub fn validate_msi(image: &[u8], other: Option<&[u8]>) -> Result<bool, String> {
    const DIFAT_HEADER_ENTRIES: usize = 109;
    const DIR_ENTRY_BYTES: usize = 128;
    const MINI_STREAM_CUTOFF: u64 = 4096;

    let sector_size = 1usize << u16_at(image, 30)?;
    let ints = sector_size / 4;
    let first_dir_sector = u32_at(image, 48)?;
    let first_difat_sector = u32_at(image, 68)?;
    let num_difat_sectors = u32_at(image, 72)?;

    let sector_bytes = |sector: u32| -> Result<&[u8], String> {
        let start = sector_size + sector as usize * sector_size;
        image
            .get(start..start + sector_size)
            .ok_or_else(|| format!("sector {sector} is out of bounds"))
    };
    let is_chaining_slot =
        |i: usize| i > DIFAT_HEADER_ENTRIES && (i - DIFAT_HEADER_ENTRIES + 1) % ints == 0;

    // DIFAT: the 109 header entries, then the dedicated sector chain.
    let mut difat = Vec::with_capacity(DIFAT_HEADER_ENTRIES);
    for i in 0..DIFAT_HEADER_ENTRIES {
        difat.push(u32_at(image, 76 + i * 4)?);
    }
    let mut difat_sector = first_difat_sector;
    for _ in 0..num_difat_sectors {
        for chunk in sector_bytes(difat_sector)?.chunks_exact(4) {
            difat.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        difat_sector = difat[difat.len() - 1];
    }

    // FAT, aggregated in DIFAT order.
    let mut fat = Vec::new();
    for (i, &sector) in difat.iter().enumerate() {
        if sector == FREESECT || sector == ENDOFCHAIN || is_chaining_slot(i) {
            continue;
        }
        for chunk in sector_bytes(sector)?.chunks_exact(4) {
            fat.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }

    // Every FAT sector listed in the DIFAT is marked as such in the FAT.
    for (i, &sector) in difat.iter().enumerate() {
        if sector != FREESECT && !is_chaining_slot(i) {
            let entry = *fat
                .get(sector as usize)
                .ok_or_else(|| format!("fat sector {sector} (difat index {i}) is out of range"))?;
            if entry != FATSECT {
                return Err(format!(
                    "fat sector {sector} (difat index {i}) is not marked as such in the fat"
                ));
            }
        }
    }

    // Every dedicated DIFAT sector is marked as such, and the count matches.
    let mut sector = first_difat_sector;
    let mut chain_index = DIFAT_HEADER_ENTRIES - 1;
    let mut found_difat_sectors = 0u32;
    while sector != ENDOFCHAIN {
        let entry = *fat
            .get(sector as usize)
            .ok_or_else(|| format!("difat sector {sector} is out of fat range"))?;
        if entry != DIFSECT {
            return Err(format!(
                "difat sector {sector} (offset {found_difat_sectors} in chain) is not marked as such in the fat"
            ));
        }
        chain_index += ints;
        sector = *difat
            .get(chain_index)
            .ok_or_else(|| format!("difat chain leaves the difat list at index {chain_index}"))?;
        found_difat_sectors += 1;
    }
    if found_difat_sectors != num_difat_sectors {
        return Err(format!(
            "wrong number of difat sectors found, wanted {num_difat_sectors} got {found_difat_sectors}"
        ));
    }

    // Walk the directory and every normal-FAT stream chain. Marking visited
    // sectors in a copy of the FAT catches sectors re-used across chains.
    // Mini-stream entries are not walked (the size check also skips
    // non-stream entries), and the signature stream is expected to differ.
    let signature_name = signature_stream_name();
    let mut fat_marked = fat.clone();
    let mut dir_sector = first_dir_sector;
    loop {
        let dir_bytes = sector_bytes(dir_sector)?;
        for entry in dir_bytes.chunks_exact(DIR_ENTRY_BYTES) {
            let num_name_bytes = usize::from(u16::from_le_bytes([entry[64], entry[65]])).min(64);
            let first_sector = u32::from_le_bytes([entry[116], entry[117], entry[118], entry[119]]);
            let mut size_bytes = [0u8; 8];
            size_bytes.copy_from_slice(&entry[120..128]);
            let stream_size = u64::from_le_bytes(size_bytes);
            if stream_size < MINI_STREAM_CUTOFF || entry[..num_name_bytes] == signature_name[..] {
                continue;
            }

            let mut allocated = 0u64;
            let mut sector = first_sector;
            loop {
                allocated += sector_size as u64;
                let next = *fat_marked.get(sector as usize).ok_or_else(|| {
                    format!("stream chain leaves the fat at sector {sector}")
                })?;
                if next != ENDOFCHAIN && next >= RESERVED {
                    return Err(format!(
                        "found bad or reused fat entry at sector {sector}: {next:#x}"
                    ));
                }
                if let Some(reference) = other {
                    let start = sector_size + sector as usize * sector_size;
                    let ours = image.get(start..start + sector_size).ok_or_else(|| {
                        format!("stream sector {sector} is out of bounds")
                    })?;
                    let theirs = reference.get(start..start + sector_size).ok_or_else(|| {
                        format!("stream sector {sector} is out of bounds in the reference image")
                    })?;
                    if ours != theirs {
                        return Err(format!("found difference in streams at sector {sector}"));
                    }
                }
                fat_marked[sector as usize] = RESERVED;
                if next == ENDOFCHAIN {
                    break;
                }
                sector = next;
            }
            if allocated < stream_size {
                return Err(format!(
                    "found stream with size greater than its allocation, starting sector {first_sector}"
                ));
            }
        }
        dir_sector = *fat
            .get(dir_sector as usize)
            .ok_or_else(|| format!("directory chain leaves the fat at sector {dir_sector}"))?;
        if dir_sector == ENDOFCHAIN {
            break;
        }
    }

    // The certificate sets must match apart from the dummy certificate.
    let signed_data = signed_data_of(image)?;
    let dummy_index = signed_data
        .superfluous_cert_index()
        .map_err(|e| e.to_string())?;
    if let Some(reference) = other {
        let reference_signed_data = signed_data_of(reference)?;
        let reference_dummy_index = reference_signed_data
            .superfluous_cert_index()
            .map_err(|e| e.to_string())?;
        let certs = &signed_data.content.certificates;
        let reference_certs = &reference_signed_data.content.certificates;
        let mut i = 0;
        let mut j = 0;
        loop {
            if Some(i) == dummy_index {
                i += 1;
            }
            if Some(j) == reference_dummy_index {
                j += 1;
            }
            if i >= certs.len() || j >= reference_certs.len() {
                if i < certs.len() || j < reference_certs.len() {
                    return Err(format!(
                        "number of certs mismatch, reference {} vs this {} (possibly including the dummy)",
                        reference_certs.len(),
                        certs.len()
                    ));
                }
                break;
            }
            if certs[i] != reference_certs[j] {
                return Err(format!(
                    "cert contents mismatch, reference index {j} vs this index {i}"
                ));
            }
            i += 1;
            j += 1;
        }
    }

    Ok(dummy_index.is_some())
}
