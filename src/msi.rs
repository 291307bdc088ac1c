//! MSI (Compound File Binary) carrier.
//!
//! Layout, sentinels and names follow MS-CFB. The carrier parses the header,
//! DIFAT, FAT and directory, extracts the `\x05DigitalSignature` stream
//! (freeing its sectors), and rebuilds the image with the new SignedData in a
//! freshly allocated run of sectors at the tail. Every other stream keeps its
//! exact byte position, so the MSI digest other verifiers compute stays
//! valid.

use crate::codec::ByteReader;
use crate::error::{TagError, TagResult};
use crate::pkcs7::{self, SignedData};

const HEADER_CONTENT_BYTES: usize = 76;
const HEADER_TOTAL_BYTES: usize = 512;
const DIFAT_HEADER_ENTRIES: usize = 109;
const DIR_ENTRY_BYTES: u64 = 128;
const MINI_STREAM_SECTOR_SIZE: u64 = 64;
pub(crate) const MINI_STREAM_CUTOFF: u64 = 4096;

/// Sentinel FAT values from MS-CFB.
pub(crate) const FREESECT: u32 = 0xFFFF_FFFF;
pub(crate) const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
pub(crate) const FATSECT: u32 = 0xFFFF_FFFD;
pub(crate) const DIFSECT: u32 = 0xFFFF_FFFC;
pub(crate) const RESERVED: u32 = 0xFFFF_FFFB;

const MSI_MAGIC: [u8; 8] = [0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];

/// UTF-16LE "\x05DigitalSignature", including the NUL terminator.
const SIGNATURE_NAME: [u8; 36] = [
    0x05, 0x00, 0x44, 0x00, 0x69, 0x00, 0x67, 0x00, 0x69, 0x00, 0x74, 0x00, 0x61, 0x00, 0x6c,
    0x00, 0x53, 0x00, 0x69, 0x00, 0x67, 0x00, 0x6e, 0x00, 0x61, 0x00, 0x74, 0x00, 0x75, 0x00,
    0x72, 0x00, 0x65, 0x00, 0x00, 0x00,
];

/// The 76-byte MSI header.
#[derive(Clone, Debug, Default)]
struct MsiHeader {
    magic: [u8; 8],
    clsid: [u8; 16],
    minor_version: u16,
    dll_version: u16,
    byte_order: u16,
    sector_shift: u16,
    mini_sector_shift: u16,
    reserved: [u8; 6],
    num_dir_sectors: u32,
    num_fat_sectors: u32,
    first_dir_sector: u32,
    transaction_signature_number: u32,
    mini_stream_cutoff_size: u32,
    first_mini_fat_sector: u32,
    num_mini_fat_sectors: u32,
    first_difat_sector: u32,
    num_difat_sectors: u32,
}

impl MsiHeader {
    fn read_from(bytes: &[u8]) -> TagResult<Self> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            magic: r.read_array()?,
            clsid: r.read_array()?,
            minor_version: r.read_u16()?,
            dll_version: r.read_u16()?,
            byte_order: r.read_u16()?,
            sector_shift: r.read_u16()?,
            mini_sector_shift: r.read_u16()?,
            reserved: r.read_array()?,
            num_dir_sectors: r.read_u32()?,
            num_fat_sectors: r.read_u32()?,
            first_dir_sector: r.read_u32()?,
            transaction_signature_number: r.read_u32()?,
            mini_stream_cutoff_size: r.read_u32()?,
            first_mini_fat_sector: r.read_u32()?,
            num_mini_fat_sectors: r.read_u32()?,
            first_difat_sector: r.read_u32()?,
            num_difat_sectors: r.read_u32()?,
        })
    }

    fn to_bytes(&self) -> [u8; HEADER_CONTENT_BYTES] {
        let mut out = [0u8; HEADER_CONTENT_BYTES];
        out[0..8].copy_from_slice(&self.magic);
        out[8..24].copy_from_slice(&self.clsid);
        out[24..26].copy_from_slice(&self.minor_version.to_le_bytes());
        out[26..28].copy_from_slice(&self.dll_version.to_le_bytes());
        out[28..30].copy_from_slice(&self.byte_order.to_le_bytes());
        out[30..32].copy_from_slice(&self.sector_shift.to_le_bytes());
        out[32..34].copy_from_slice(&self.mini_sector_shift.to_le_bytes());
        out[34..40].copy_from_slice(&self.reserved);
        out[40..44].copy_from_slice(&self.num_dir_sectors.to_le_bytes());
        out[44..48].copy_from_slice(&self.num_fat_sectors.to_le_bytes());
        out[48..52].copy_from_slice(&self.first_dir_sector.to_le_bytes());
        out[52..56].copy_from_slice(&self.transaction_signature_number.to_le_bytes());
        out[56..60].copy_from_slice(&self.mini_stream_cutoff_size.to_le_bytes());
        out[60..64].copy_from_slice(&self.first_mini_fat_sector.to_le_bytes());
        out[64..68].copy_from_slice(&self.num_mini_fat_sectors.to_le_bytes());
        out[68..72].copy_from_slice(&self.first_difat_sector.to_le_bytes());
        out[72..76].copy_from_slice(&self.num_difat_sectors.to_le_bytes());
        out
    }
}

/// A 128-byte directory entry.
#[derive(Clone, Debug)]
struct MsiDirEntry {
    name: [u8; 64],
    num_name_bytes: u16,
    object_type: u8,
    color_flag: u8,
    left: u32,
    right: u32,
    child: u32,
    clsid: [u8; 16],
    state_flags: u32,
    create_time: u64,
    modify_time: u64,
    stream_first_sector: u32,
    stream_size: u64,
}

impl Default for MsiDirEntry {
    fn default() -> Self {
        Self {
            name: [0u8; 64],
            num_name_bytes: 0,
            object_type: 0,
            color_flag: 0,
            left: 0,
            right: 0,
            child: 0,
            clsid: [0u8; 16],
            state_flags: 0,
            create_time: 0,
            modify_time: 0,
            stream_first_sector: 0,
            stream_size: 0,
        }
    }
}

impl MsiDirEntry {
    fn read_from(bytes: &[u8]) -> TagResult<Self> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            name: r.read_array()?,
            num_name_bytes: r.read_u16()?,
            object_type: r.read_u8()?,
            color_flag: r.read_u8()?,
            left: r.read_u32()?,
            right: r.read_u32()?,
            child: r.read_u32()?,
            clsid: r.read_array()?,
            state_flags: r.read_u32()?,
            create_time: r.read_u64()?,
            modify_time: r.read_u64()?,
            stream_first_sector: r.read_u32()?,
            stream_size: r.read_u64()?,
        })
    }

    fn to_bytes(&self) -> [u8; DIR_ENTRY_BYTES as usize] {
        let mut out = [0u8; DIR_ENTRY_BYTES as usize];
        out[0..64].copy_from_slice(&self.name);
        out[64..66].copy_from_slice(&self.num_name_bytes.to_le_bytes());
        out[66] = self.object_type;
        out[67] = self.color_flag;
        out[68..72].copy_from_slice(&self.left.to_le_bytes());
        out[72..76].copy_from_slice(&self.right.to_le_bytes());
        out[76..80].copy_from_slice(&self.child.to_le_bytes());
        out[80..96].copy_from_slice(&self.clsid);
        out[96..100].copy_from_slice(&self.state_flags.to_le_bytes());
        out[100..108].copy_from_slice(&self.create_time.to_le_bytes());
        out[108..116].copy_from_slice(&self.modify_time.to_le_bytes());
        out[116..120].copy_from_slice(&self.stream_first_sector.to_le_bytes());
        out[120..128].copy_from_slice(&self.stream_size.to_le_bytes());
        out
    }

    fn is_signature(&self) -> bool {
        let len = usize::from(self.num_name_bytes).min(self.name.len());
        self.name[..len] == SIGNATURE_NAME
    }
}

/// Sector parameters: 512 bytes for v3 files, 4096 for v4.
#[derive(Clone, Copy, Debug)]
struct SectorFormat {
    /// Sector size in bytes.
    size: u64,
    /// Number of 32-bit entries per sector.
    ints: usize,
}

impl SectorFormat {
    fn new(sector_shift: u16) -> TagResult<Self> {
        let size = 1u64.checked_shl(u32::from(sector_shift)).unwrap_or(0);
        if size != 512 && size != 4096 {
            return Err(TagError::UnexpectedSectorShift(sector_shift));
        }
        Ok(Self {
            size,
            ints: (size / 4) as usize,
        })
    }

    /// Whether `index` into the DIFAT list is the chaining slot of a DIFAT
    /// sector. The last entry of each dedicated DIFAT sector points to the
    /// next sector (or is an end-of-chain marker); the 109 header entries
    /// have no such slot.
    fn is_last_in_sector(&self, index: usize) -> bool {
        index > DIFAT_HEADER_ENTRIES && (index - DIFAT_HEADER_ENTRIES + 1) % self.ints == 0
    }
}

/// A parsed MSI binary. `contents` holds the file body after the header
/// sector, with the old SignedData stream zeroed out.
#[derive(Debug)]
pub struct MsiBinary {
    header: MsiHeader,
    sector: SectorFormat,
    contents: Vec<u8>,
    /// Offset of the signature stream's directory entry in `contents`.
    sig_dir_offset: u64,
    sig_dir_entry: MsiDirEntry,
    signed_data_bytes: Vec<u8>,
    signed_data: SignedData,
    /// All FAT entries, aggregated in DIFAT order.
    fat_entries: Vec<u32>,
    /// The 109 header DIFAT entries followed by every dedicated DIFAT sector.
    difat_entries: Vec<u32>,
    /// Sector IDs of the dedicated DIFAT sectors, if any.
    difat_sectors: Vec<u32>,
}

/// Copies `stream_size` bytes of the chain starting at `start`, following
/// `fat_entries`. With `free_data`, the copied bytes are zeroed and the chain
/// entries released as it goes.
fn copy_chain(
    name: &'static str,
    fat_entries: &mut [u32],
    contents: &mut [u8],
    sector_size: u64,
    start: u32,
    stream_size: u64,
    free_data: bool,
) -> TagResult<Vec<u8>> {
    let mut stream = Vec::with_capacity(stream_size as usize);
    let mut sector = start;
    let mut size = stream_size;
    while size > 0 {
        if sector == ENDOFCHAIN || sector == FREESECT {
            return Err(TagError::RanOutOfSectors(name));
        }
        let n = size.min(sector_size);
        let offset = sector_size
            .checked_mul(u64::from(sector))
            .ok_or(TagError::Truncated)? as usize;
        let end = offset + n as usize;
        if end > contents.len() {
            return Err(TagError::Truncated);
        }
        stream.extend_from_slice(&contents[offset..end]);
        size -= n;
        // Unused bytes in an MSI are conventionally zero; the freed stream
        // may be overwritten by the relocated SignedData anyway.
        if free_data {
            contents[offset..end].fill(0);
        }
        let index = sector as usize;
        if index >= fat_entries.len() {
            return Err(TagError::Truncated);
        }
        let next = fat_entries[index];
        if free_data {
            fat_entries[index] = FREESECT;
        }
        sector = next;
    }
    Ok(stream)
}

/// Reads a stream. Streams below the mini-stream cutoff live in the
/// mini-stream and are indexed by the mini FAT, both of which are themselves
/// normal streams (`force_fat` breaks the recursion); in that branch
/// `free_data` only touches the local copies.
#[allow(clippy::too_many_arguments)]
fn read_stream(
    name: &'static str,
    header: &MsiHeader,
    sector: SectorFormat,
    fat_entries: &mut [u32],
    contents: &mut [u8],
    start: u32,
    stream_size: u64,
    force_fat: bool,
    free_data: bool,
) -> TagResult<Vec<u8>> {
    if force_fat || stream_size >= MINI_STREAM_CUTOFF {
        return copy_chain(
            name,
            fat_entries,
            contents,
            sector.size,
            start,
            stream_size,
            free_data,
        );
    }

    let mini_fat_bytes = read_stream(
        "mini FAT",
        header,
        sector,
        fat_entries,
        contents,
        header.first_mini_fat_sector,
        u64::from(header.num_mini_fat_sectors) * sector.size,
        true,
        false,
    )?;
    let mut mini_fat: Vec<u32> = mini_fat_bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    // The mini stream is the root directory entry's stream; the root must be
    // entry zero of the first directory sector.
    let root_offset = u64::from(header.first_dir_sector) * sector.size;
    let root = MsiDirEntry::read_from(
        contents
            .get(root_offset as usize..)
            .ok_or(TagError::Truncated)?,
    )?;
    let mut mini_stream = read_stream(
        "mini stream",
        header,
        sector,
        fat_entries,
        contents,
        root.stream_first_sector,
        root.stream_size,
        true,
        false,
    )?;

    copy_chain(
        name,
        &mut mini_fat,
        &mut mini_stream,
        MINI_STREAM_SECTOR_SIZE,
        start,
        stream_size,
        free_data,
    )
}

/// The 109 header DIFAT entries followed by the full contents of every
/// dedicated DIFAT sector, plus the list of those sectors.
fn populate_difat(
    header: &MsiHeader,
    header_bytes: &[u8],
    contents: &[u8],
    sector: SectorFormat,
) -> TagResult<(Vec<u32>, Vec<u32>)> {
    let mut difat_entries =
        Vec::with_capacity(DIFAT_HEADER_ENTRIES + header.num_difat_sectors as usize * sector.ints);
    let mut r = ByteReader::new(&header_bytes[HEADER_CONTENT_BYTES..]);
    for _ in 0..DIFAT_HEADER_ENTRIES {
        difat_entries.push(r.read_u32()?);
    }

    // Dedicated DIFAT sectors only appear past ~457 MB of FAT coverage, so
    // this loop rarely runs; it exists to avoid a hidden scaling limit.
    let mut difat_sectors = Vec::new();
    for i in 0..header.num_difat_sectors {
        let sector_id = if i == 0 {
            header.first_difat_sector
        } else {
            difat_entries[difat_entries.len() - 1]
        };
        difat_sectors.push(sector_id);
        let start = u64::from(sector_id) * sector.size;
        let bytes = contents
            .get(start as usize..start as usize + sector.size as usize)
            .ok_or(TagError::Truncated)?;
        for chunk in bytes.chunks_exact(4) {
            difat_entries.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }
    Ok((difat_entries, difat_sectors))
}

/// All FAT entries, in DIFAT order. Free and end-of-chain DIFAT slots are
/// skipped, as are the per-sector chaining slots.
fn populate_fat(
    difat_entries: &[u32],
    contents: &[u8],
    sector: SectorFormat,
) -> TagResult<Vec<u32>> {
    let mut fat_entries = Vec::new();
    for (i, &sector_id) in difat_entries.iter().enumerate() {
        if sector_id == FREESECT || sector_id == ENDOFCHAIN || sector.is_last_in_sector(i) {
            continue;
        }
        let offset = u64::from(sector_id) * sector.size;
        let bytes = contents
            .get(offset as usize..offset as usize + sector.size as usize)
            .ok_or(TagError::Truncated)?;
        for chunk in bytes.chunks_exact(4) {
            fat_entries.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }
    Ok(fat_entries)
}

/// Scans one directory sector for the signature stream's entry.
fn signature_dir_from_sector(
    contents: &[u8],
    sector: SectorFormat,
    dir_sector: u32,
) -> TagResult<Option<(MsiDirEntry, u64)>> {
    for i in 0..sector.size / DIR_ENTRY_BYTES {
        let offset = u64::from(dir_sector) * sector.size + i * DIR_ENTRY_BYTES;
        let entry = MsiDirEntry::read_from(
            contents
                .get(offset as usize..)
                .ok_or(TagError::Truncated)?,
        )?;
        if entry.is_signature() {
            return Ok(Some((entry, offset)));
        }
    }
    Ok(None)
}

/// Walks the directory chain for the `\x05DigitalSignature` entry.
fn populate_signature_dir_entry(
    header: &MsiHeader,
    contents: &[u8],
    sector: SectorFormat,
    fat_entries: &[u32],
) -> TagResult<(MsiDirEntry, u64)> {
    let mut dir_sector = header.first_dir_sector;
    loop {
        if let Some(found) = signature_dir_from_sector(contents, sector, dir_sector)? {
            return Ok(found);
        }
        dir_sector = *fat_entries
            .get(dir_sector as usize)
            .ok_or(TagError::Truncated)?;
        if dir_sector == ENDOFCHAIN {
            return Err(TagError::SignatureStreamMissing);
        }
    }
}

fn first_free_fat_entry_in(entries: &[u32]) -> u32 {
    let mut first_free = entries.len();
    while first_free > 0 && entries[first_free - 1] == FREESECT {
        first_free -= 1;
    }
    first_free as u32
}

impl MsiBinary {
    /// Parses an MSI compound file. The region occupied by the signature
    /// stream is zeroed in the carrier's copy, since the stream may move.
    pub fn parse(file_contents: &[u8]) -> TagResult<Self> {
        if file_contents.len() < HEADER_TOTAL_BYTES {
            return Err(TagError::Truncated);
        }
        let header_bytes = &file_contents[..HEADER_TOTAL_BYTES];
        let header = MsiHeader::read_from(&header_bytes[..HEADER_CONTENT_BYTES])?;
        if header.magic != MSI_MAGIC {
            return Err(TagError::BadMagic);
        }
        if header.clsid != [0u8; 16] {
            return Err(TagError::BadClsid);
        }
        let sector = SectorFormat::new(header.sector_shift)?;
        if (file_contents.len() as u64) < sector.size {
            return Err(TagError::Truncated);
        }
        let mut contents = file_contents[sector.size as usize..].to_vec();

        // The DIFAT must be loaded before the FAT, and the directory entry
        // before the stream it describes.
        let (difat_entries, difat_sectors) =
            populate_difat(&header, header_bytes, &contents, sector)?;
        let mut fat_entries = populate_fat(&difat_entries, &contents, sector)?;
        let (sig_dir_entry, sig_dir_offset) =
            populate_signature_dir_entry(&header, &contents, sector, &fat_entries)?;

        let mut stream_size = sig_dir_entry.stream_size;
        if header.dll_version == 3 {
            stream_size &= 0x7FFF_FFFF;
        }
        let signed_data_bytes = read_stream(
            "signedData",
            &header,
            sector,
            &mut fat_entries,
            &mut contents,
            sig_dir_entry.stream_first_sector,
            stream_size,
            false,
            true,
        )?;
        let signed_data = pkcs7::parse_signed_data(&signed_data_bytes)?;

        Ok(Self {
            header,
            sector,
            contents,
            sig_dir_offset,
            sig_dir_entry,
            signed_data_bytes,
            signed_data,
            fat_entries,
            difat_entries,
            difat_sectors,
        })
    }

    /// Index of the first free entry in the trailing free run of the FAT.
    /// One past the end of the list when there is no free tail.
    fn first_free_fat_entry(&self) -> u32 {
        first_free_fat_entry_in(&self.fat_entries)
    }

    /// Guarantees at least `n` free entries at the tail of the FAT and
    /// returns the first one. May grow the FAT (and with it the DIFAT), so
    /// any previously derived index is invalid after this call.
    fn ensure_free_fat_entries(&mut self, n: u32) -> u32 {
        let fat_size = self.fat_entries.len() as u32;
        let first_free = self.first_free_fat_entry();
        if fat_size - first_free >= n {
            return first_free;
        }
        // Append another FAT sector's worth of free entries. The first free
        // index becomes the new FAT sector itself; assign_difat_entry can
        // reallocate, so the order of these two calls matters.
        for _ in 0..self.sector.ints {
            self.fat_entries.push(FREESECT);
        }
        self.fat_entries[first_free as usize] = FATSECT;
        self.assign_difat_entry(first_free);
        self.header.num_fat_sectors += 1;

        // One extra sector may still not satisfy a large request.
        self.ensure_free_fat_entries(n);
        self.first_free_fat_entry()
    }

    /// Writes the sector number of a FAT sector into the first free DIFAT
    /// slot at the tail of the list.
    fn assign_difat_entry(&mut self, fat_sector: u32) {
        self.ensure_free_difat_entry();
        let mut i = self.difat_entries.len() - 1;
        // Walk back over the free run. If i lands on an end-of-chain marker,
        // ensure_free_difat_entry guarantees the slot before it is free;
        // per-sector chaining slots are stepped over.
        while self.difat_entries[i - 1] == FREESECT
            || (self.sector.is_last_in_sector(i - 1) && self.difat_entries[i - 2] == FREESECT)
        {
            i -= 1;
        }
        self.difat_entries[i] = fat_sector;
    }

    /// Guarantees at least one free DIFAT slot at the tail, allocating a new
    /// DIFAT sector (and chaining it in) if necessary.
    fn ensure_free_difat_entry(&mut self) {
        // difat_entries is at least 109 long by construction.
        let mut i = self.difat_entries.len() - 1;
        if self.difat_entries[i] == ENDOFCHAIN {
            i -= 1;
        }
        if self.difat_entries[i] == FREESECT {
            return;
        }

        let old_difat_tail = self.difat_entries.len() - 1;
        for _ in 0..self.sector.ints {
            self.difat_entries.push(FREESECT);
        }
        let tail = self.difat_entries.len() - 1;
        self.difat_entries[tail] = ENDOFCHAIN;

        let sector = self.ensure_free_fat_entries(1);
        self.fat_entries[sector as usize] = DIFSECT;

        if self.header.num_difat_sectors == 0 {
            self.header.first_difat_sector = sector;
        } else {
            self.difat_entries[old_difat_tail] = sector;
        }
        self.header.num_difat_sectors += 1;
        self.difat_sectors.push(sector);
    }

    /// Appended tags are not supported for MSI files.
    #[must_use]
    pub fn appended_tag(&self) -> Option<&[u8]> {
        None
    }

    /// The PKCS#7 SignedData in DER form.
    #[must_use]
    pub fn asn1_data(&self) -> &[u8] {
        &self.signed_data_bytes
    }

    /// Rebuilds the image with the given SignedData relocated to a fresh run
    /// of sectors at the tail. May add free sectors to the carrier, but
    /// otherwise leaves it unchanged.
    fn build_binary(&mut self, signed_data: &[u8], tag: &[u8]) -> TagResult<Vec<u8>> {
        if !tag.is_empty() {
            return Err(TagError::UnsupportedOnMsi);
        }
        // Writing to the mini FAT is not supported.
        if (signed_data.len() as u64) < MINI_STREAM_CUTOFF {
            return Err(TagError::UnsupportedMiniStreamWrite(signed_data.len()));
        }

        let num_sectors = ((signed_data.len() as u64 - 1) / self.sector.size) as u32 + 1;
        let first = self.ensure_free_fat_entries(num_sectors);

        // Chain the new run in a copy of the FAT.
        let mut new_fat = self.fat_entries.clone();
        for i in 0..num_sectors - 1 {
            new_fat[(first + i) as usize] = first + i + 1;
        }
        new_fat[(first + num_sectors - 1) as usize] = ENDOFCHAIN;

        // Point the signature stream's directory entry at the run, in a copy.
        let mut sig_dir_entry = self.sig_dir_entry.clone();
        sig_dir_entry.stream_first_sector = first;
        sig_dir_entry.stream_size = signed_data.len() as u64;

        // Header sector: 76 header bytes, then the 109 header DIFAT entries.
        let mut output = vec![0u8; self.sector.size as usize];
        output[..HEADER_CONTENT_BYTES].copy_from_slice(&self.header.to_bytes());
        for i in 0..DIFAT_HEADER_ENTRIES {
            let off = HEADER_CONTENT_BYTES + i * 4;
            output[off..off + 4].copy_from_slice(&self.difat_entries[i].to_le_bytes());
        }

        // Content image, sized to cover the tail run just allocated.
        let first_free = u64::from(first_free_fat_entry_in(&new_fat));
        let mut contents = vec![0u8; (self.sector.size * first_free) as usize];
        let shared = self.contents.len().min(contents.len());
        contents[..shared].copy_from_slice(&self.contents[..shared]);

        // Overlay the modified directory entry...
        let dir_off = self.sig_dir_offset as usize;
        contents
            .get_mut(dir_off..dir_off + DIR_ENTRY_BYTES as usize)
            .ok_or(TagError::Truncated)?
            .copy_from_slice(&sig_dir_entry.to_bytes());

        // ...the dedicated DIFAT sectors (usually unchanged)...
        for (i, &sector_id) in self.difat_sectors.iter().enumerate() {
            let index = DIFAT_HEADER_ENTRIES + i * self.sector.ints;
            let offset = (u64::from(sector_id) * self.sector.size) as usize;
            for j in 0..self.sector.ints {
                let off = offset + j * 4;
                contents
                    .get_mut(off..off + 4)
                    .ok_or(TagError::Truncated)?
                    .copy_from_slice(&self.difat_entries[index + j].to_le_bytes());
            }
        }

        // ...the FAT sectors, from the modified copy...
        let mut index = 0;
        for (i, &sector_id) in self.difat_entries.iter().enumerate() {
            if sector_id == FREESECT || sector_id == ENDOFCHAIN || self.sector.is_last_in_sector(i)
            {
                continue;
            }
            let offset = (u64::from(sector_id) * self.sector.size) as usize;
            for j in 0..self.sector.ints {
                let off = offset + j * 4;
                contents
                    .get_mut(off..off + 4)
                    .ok_or(TagError::Truncated)?
                    .copy_from_slice(&new_fat[index + j].to_le_bytes());
            }
            index += self.sector.ints;
        }

        // ...and the SignedData itself. The buffer is zero-initialized, so
        // the final sector needs no explicit padding.
        let data_off = (u64::from(first) * self.sector.size) as usize;
        contents
            .get_mut(data_off..data_off + signed_data.len())
            .ok_or(TagError::Truncated)?
            .copy_from_slice(signed_data);

        output.extend_from_slice(&contents);
        Ok(output)
    }

    /// Appended tags are not supported for MSI files.
    pub fn remove_appended_tag(&self) -> TagResult<Vec<u8>> {
        Err(TagError::UnsupportedOnMsi)
    }

    /// Appended tags are not supported for MSI files.
    pub fn set_appended_tag(&self, _tag_contents: &[u8]) -> TagResult<Vec<u8>> {
        Err(TagError::UnsupportedOnMsi)
    }

    /// Returns whether the certificate set already contains a tag carrier.
    pub fn has_superfluous_cert(&self) -> TagResult<bool> {
        Ok(self.signed_data.superfluous_cert_index()?.is_some())
    }

    /// Rebuilds the image with a superfluous certificate carrying `tag`.
    /// The parsed SignedData is modified; `asn1_data()` keeps returning the
    /// original bytes.
    pub fn set_superfluous_cert_tag(&mut self, tag: &[u8]) -> TagResult<Vec<u8>> {
        let asn1_data = self.signed_data.set_superfluous_cert_tag(tag)?;
        self.build_binary(&asn1_data, &[])
    }

    /// Offset where the relocated SignedData will land, relative to the
    /// content image: the first free sector at the end of the file.
    #[must_use]
    pub fn certificate_offset(&self) -> u64 {
        u64::from(self.first_free_fat_entry()) * self.sector.size
    }
}
