#![deny(unsafe_code)]
//! Extracts the essential visual features of an AVIF image — width, height,
//! bit depth and number of channels — from the leading bytes of the file.
//!
//! No pixel data is decoded. The parser accepts partial inputs: it reports
//! [`Error::NotEnoughData`] when the supplied prefix is too short to decide,
//! so streaming consumers can call it repeatedly while bytes arrive. Most
//! AVIF files are decided within their first few hundred bytes.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitreader::BitReader;
use byteorder::{BigEndian, ByteOrder};
use fallible_collections::{TryReserveError, TryVec};
use log::{debug, warn};

use std::fmt;
use std::io::Read;

mod boxes;
use crate::boxes::{BoxType, FourCC};

/// Offsets and sizes are kept in 32 bits throughout; larger declared file
/// sizes are clamped to this.
const MAX_FILE_SIZE: u32 = u32::MAX;

/// Upper bound on boxes examined across one call, counting every pass.
/// Walks that would exceed it stop with [`Error::TooComplex`].
const MAX_PARSED_BOXES: u32 = 4096;

/// Bytes requested from the reader at a time by [`probe_reader`].
const STREAM_CHUNK_SIZE: usize = 4096;

/// Describes why no features could be extracted.
#[derive(Debug)]
pub enum Error {
    /// The prefix parsed cleanly but more bytes are needed to decide.
    /// Repeat the call with a longer prefix of the same file.
    NotEnoughData,
    /// A parser self-limit was reached before a decision could be made.
    /// Covers excessive box counts as well as 64-bit and extends-to-end
    /// box sizes, which this parser deliberately does not support.
    TooComplex,
    /// The bytes read so far do not form a valid AVIF file, truncated or
    /// not.
    InvalidFile,
    /// Propagate underlying errors from `std::io`. Only [`probe_reader`]
    /// produces this.
    Io(std::io::Error),
    /// Buffer growth failed. Only [`probe_reader`] produces this.
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotEnoughData => "not enough data",
            Self::TooComplex => "too complex",
            Self::InvalidFile => "invalid avif",
            Self::Io(err) => return err.fmt(f),
            Self::OutOfMemory => "OOM",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::NotEnoughData,
            _ => Self::Io(err),
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Essential visual features of an AVIF image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// In pixels. Ignores mirror and rotation.
    pub width: u32,
    /// In pixels. Ignores mirror and rotation.
    pub height: u32,
    /// Likely 8, 10 or 12 bits per channel per pixel.
    pub bit_depth: u32,
    /// Likely 1, 2, 3 or 4 channels: (1 monochrome or 3 colors) +
    /// (0 or 1 alpha).
    pub num_channels: u32,
}

impl Features {
    fn is_complete(&self) -> bool {
        self.width != 0 && self.height != 0 && self.bit_depth != 0 && self.num_channels != 0
    }
}

/// Non-success outcome of one internal parsing step; `Ok` plays the role
/// of "found". The distinction between `Truncated` (retryable) and
/// `Invalid` (terminal) is load-bearing and must never blur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    /// Parsed cleanly, but the information is missing or elsewhere.
    NotFound,
    /// The request lies within the declared file size but past the bytes
    /// supplied so far.
    Truncated,
    /// The bytes violate the container format, or the request lies beyond
    /// the declared file size.
    Invalid,
    /// A parser self-limit was hit: position or size overflow, box budget.
    Aborted,
}

type Scan<T> = std::result::Result<T, Halt>;

/// Bounded view over the available prefix of one container's content.
///
/// `data` holds the bytes the caller actually supplied, clipped to this
/// container; `size` is the container's declared content size, which
/// exceeds `data.len()` when the input is truncated. `origin` is the
/// absolute offset of the first content byte within the file, used to
/// order nested windows.
#[derive(Debug, Clone, Copy)]
struct Window<'a> {
    data: &'a [u8],
    size: u32,
    origin: u32,
}

impl<'a> Window<'a> {
    /// Whether `len` bytes at `pos` fit inside the declared container size.
    fn fits(&self, pos: u32, len: u32) -> Scan<()> {
        if u64::from(pos) + u64::from(len) > u64::from(self.size) {
            return Err(Halt::Invalid);
        }
        Ok(())
    }

    /// Whether `len` bytes at `pos` have actually been supplied.
    fn present(&self, pos: u32, len: u32) -> Scan<()> {
        if u64::from(pos) + u64::from(len) > self.data.len() as u64 {
            return Err(Halt::Truncated);
        }
        Ok(())
    }

    /// Both of the above, declared bound first so that an overlong request
    /// is `Invalid` even when the bytes happen to be missing too.
    fn ensure(&self, pos: u32, len: u32) -> Scan<()> {
        self.fits(pos, len)?;
        self.present(pos, len)
    }

    fn slice(&self, pos: u32, len: u32) -> Scan<&'a [u8]> {
        let start = pos as usize;
        let end = start.checked_add(len as usize).ok_or(Halt::Truncated)?;
        self.data.get(start..end).ok_or(Halt::Truncated)
    }

    /// Big-endian unsigned read of 1 to 4 bytes. Callers bounds-check via
    /// `fits`/`present`/`ensure` first to get the right halt status.
    fn read_uint(&self, pos: u32, num_bytes: u32) -> Scan<u32> {
        debug_assert!((1..=4).contains(&num_bytes));
        let bytes = self.slice(pos, num_bytes)?;
        Ok(BigEndian::read_uint(bytes, num_bytes as usize) as u32)
    }

    /// The content of `header` as a nested window.
    fn child(&self, header: &BoxHeader) -> Window<'a> {
        // parse_box verified that the content start is within the supplied
        // bytes and that the box fits its container.
        let tail = &self.data[header.content_offset as usize..];
        let len = tail.len().min(header.content_size as usize);
        Window {
            data: &tail[..len],
            size: header.content_size,
            origin: self.origin + header.content_offset,
        }
    }
}

/// Running count of boxes examined, shared by every pass of one call.
#[derive(Default)]
struct BoxBudget {
    parsed: u32,
}

impl BoxBudget {
    fn consume(&mut self) -> Scan<()> {
        self.parsed += 1;
        if self.parsed < MAX_PARSED_BOXES {
            Ok(())
        } else {
            Err(Halt::Aborted)
        }
    }
}

/// Basic ISO box structure.
///
/// AVIF files are a sequence of possibly-nested 'box' structures. Each box
/// begins with a header holding the total length of the box and a four-byte
/// type; a handful of "full" box types add a version byte and 24 flag bits.
///
/// See ISO/IEC 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoxHeader {
    kind: BoxType,
    /// Total bytes occupied, header included.
    size: u32,
    /// First content byte, relative to the enclosing container.
    content_offset: u32,
    content_size: u32,
    /// 0 unless this is a full box.
    version: u8,
    /// 0 unless this is a full box.
    flags: u32,
}

/// The box types carrying a version and flags word, with the highest
/// version this parser understands.
///
/// See AV1 Image File Format (AVIF) § 8.1
/// at <https://aomediacodec.github.io/av1-avif/#avif-boxes>
fn full_box_version_limit(kind: BoxType) -> Option<u8> {
    match kind {
        BoxType::MetadataBox
        | BoxType::ImageSpatialExtentsBox
        | BoxType::PixelInformationBox
        | BoxType::AuxiliaryTypeProperty => Some(0),
        BoxType::PrimaryItemBox
        | BoxType::ItemPropertyAssociationBox
        | BoxType::ItemReferenceBox => Some(1),
        _ => None,
    }
}

/// Parses the header of the box starting at `position` inside `container`.
///
/// The order of the checks decides which halt status wins when several
/// could apply, so it is part of the contract: self-limits before format
/// violations before missing bytes, at each step.
///
/// See ISO/IEC 14496-12:2015 § 4.2
fn parse_box(container: Window<'_>, position: u32, budget: &mut BoxBudget) -> Scan<BoxHeader> {
    if position > MAX_FILE_SIZE - 8 {
        return Err(Halt::Aborted);
    }
    container.fits(position, 8)?; // 32-bit size + 32-bit type
    container.present(position, 4)?;
    let size = container.read_uint(position, 4)?;
    // size 1 announces a 64-bit size and size 0 extends the box to the end
    // of the file; neither is supported here.
    if size < 2 {
        return Err(Halt::Aborted);
    }
    if size < 8 {
        return Err(Halt::Invalid);
    }
    if size > MAX_FILE_SIZE - position {
        return Err(Halt::Aborted);
    }
    container.fits(position, size)?;
    container.present(position, 8)?;
    let raw_kind = container.read_uint(position + 4, 4)?;
    let mut kind = BoxType::from(raw_kind);

    let version_limit = full_box_version_limit(kind);
    let header_size = if version_limit.is_some() { 12 } else { 8 };
    if size < header_size {
        return Err(Halt::Invalid);
    }
    let content_offset = position + header_size;
    container.present(content_offset, 0)?;
    let content_size = size - header_size;

    budget.consume()?;

    let mut version = 0;
    let mut flags = 0;
    if let Some(version_limit) = version_limit {
        version = container.read_uint(position + 8, 1)? as u8;
        flags = container.read_uint(position + 9, 3)?;
        if version > version_limit {
            // Treat boxes of a version we cannot parse as unknown, so the
            // enclosing scans step over them instead of failing the file.
            debug!("'{kind}' v{version} not understood, skipping");
            kind = BoxType::UnknownBox(raw_kind);
        }
    }

    Ok(BoxHeader {
        kind,
        size,
        content_offset,
        content_size,
        version,
        flags,
    })
}

/// Scans the direct children of `container` for the first box of `kind`
/// and returns its header along with its content window. A container whose
/// children end without one yields `miss`.
fn find_child<'a>(
    container: Window<'a>,
    kind: BoxType,
    miss: Halt,
    budget: &mut BoxBudget,
) -> Scan<(BoxHeader, Window<'a>)> {
    let mut position = 0;
    loop {
        let header = parse_box(container, position, budget)?;
        if header.kind == kind {
            return Ok((header, container.child(&header)));
        }
        debug!("skipping '{}'", header.kind);
        position += header.size;
        // A container is well formed only if one of its children ends
        // exactly at the container's end.
        if position == container.size {
            return Err(miss);
        }
    }
}

/// Checks that the file identifies itself as AVIF through an "ftyp" box.
///
/// See ISO/IEC 14496-12:2015 § 4.3.1
fn scan_root_for_brand(file: Window<'_>, budget: &mut BoxBudget) -> Scan<()> {
    let (ftyp, brands) = find_child(file, BoxType::FileTypeBox, Halt::Invalid, budget)?;
    // major_brand and minor_version at least
    if ftyp.content_size < 8 {
        return Err(Halt::Invalid);
    }
    let mut slot = 0;
    while slot < ftyp.content_size {
        brands.ensure(slot, 4)?;
        // the second slot is minor_version, not a brand
        if slot != 4 {
            let brand = FourCC::from(brands.read_uint(slot, 4)?);
            if brand == b"avif" || brand == b"avis" {
                return Ok(());
            }
        }
        slot += 4;
    }
    // Only one "ftyp" is allowed per file, so there is no point scanning on.
    warn!("'ftyp' carries no avif or avis brand");
    Err(Halt::Invalid)
}

/// Finds the ID of the primary item through "meta > pitm".
///
/// See ISO/IEC 14496-12:2015 § 8.11.4.2
fn scan_root_for_primary_item(file: Window<'_>, budget: &mut BoxBudget) -> Scan<u32> {
    let (_, meta) = find_child(file, BoxType::MetadataBox, Halt::Invalid, budget)?;
    // There is at most one "meta" per file; a "meta" without "pitm" means
    // there is none at all.
    let (pitm, content) = find_child(meta, BoxType::PrimaryItemBox, Halt::Invalid, budget)?;
    let id_len = if pitm.version == 0 { 2 } else { 4 };
    content.ensure(0, id_len)?;
    content.read_uint(0, id_len)
}

/// Interprets the property at 1-based `target_index` among the children of
/// "ipco", filling whichever feature fields it carries.
fn scan_ipco_for_property(
    ipco: Window<'_>,
    target_index: u32,
    budget: &mut BoxBudget,
    features: &mut Features,
) -> Scan<()> {
    let mut position = 0;
    let mut index = 1; // properties are numbered from one
    loop {
        let header = parse_box(ipco, position, budget)?;
        if index == target_index {
            if features.width == 0 && header.kind == BoxType::ImageSpatialExtentsBox {
                // See ISO/IEC 23008-12:2017 § 6.5.3.2
                let content = ipco.child(&header);
                content.ensure(0, 4 + 4)?;
                let width = content.read_uint(0, 4)?;
                let height = content.read_uint(4, 4)?;
                if width == 0 || height == 0 {
                    return Err(Halt::Invalid);
                }
                features.width = width;
                features.height = height;
                return Ok(());
            } else if features.num_channels == 0 && header.kind == BoxType::PixelInformationBox {
                // See ISO/IEC 23008-12:2017 § 6.5.6.2
                let content = ipco.child(&header);
                content.ensure(0, 1)?;
                let num_channels = content.read_uint(0, 1)?;
                if num_channels < 1 {
                    return Err(Halt::Invalid);
                }
                content.ensure(0, 1 + num_channels)?;
                let bit_depth = content.read_uint(1, 1)?;
                if bit_depth < 1 {
                    return Err(Halt::Invalid);
                }
                // every channel must share one depth
                for channel in 1..num_channels {
                    if content.read_uint(1 + channel, 1)? != bit_depth {
                        return Err(Halt::Invalid);
                    }
                }
                features.num_channels = num_channels;
                features.bit_depth = bit_depth;
                return Ok(());
            } else if features.num_channels == 0
                && header.kind == BoxType::AV1CodecConfigurationBox
            {
                // Only the third byte matters here; the rest is assumed
                // valid. See AV1 Codec ISO Media File Format Binding § 2.3.1
                // at <https://aomediacodec.github.io/av1-isobmff/#av1c>
                let content = ipco.child(&header);
                content.ensure(0, 3)?;
                let fields = content.read_uint(2, 1)?;
                let high_bitdepth = fields & 0x40 != 0;
                let twelve_bit = fields & 0x20 != 0;
                let monochrome = fields & 0x10 != 0;
                if twelve_bit && !high_bitdepth {
                    return Err(Halt::Invalid);
                }
                features.num_channels = if monochrome { 1 } else { 3 };
                features.bit_depth = match (high_bitdepth, twelve_bit) {
                    (true, true) => 12,
                    (true, false) => 10,
                    (false, _) => 8,
                };
                return Ok(());
            }
        }
        index += 1;
        position += header.size;
        if position == ipco.size || index > target_index {
            return Err(Halt::NotFound);
        }
    }
}

/// Walks the "ipma" associations of `item_id` inside "iprp", resolving each
/// associated property through the sibling "ipco" until the feature record
/// is complete.
///
/// See ISO/IEC 23008-12:2017 § 9.3.2
fn scan_iprp_for_item_features(
    iprp: Window<'_>,
    item_id: u32,
    budget: &mut BoxBudget,
    features: &mut Features,
) -> Scan<()> {
    let (ipma, assoc) = find_child(
        iprp,
        BoxType::ItemPropertyAssociationBox,
        Halt::Invalid,
        budget,
    )?;
    assoc.ensure(0, 4)?;
    let entry_count = assoc.read_uint(0, 4)?;
    let mut offset = 4;
    let id_len: u32 = if ipma.version < 1 { 2 } else { 4 };
    let index_len: u32 = if ipma.flags & 1 != 0 { 2 } else { 1 };

    for _ in 0..entry_count {
        assoc.ensure(offset, id_len + 1)?;
        let entry_item_id = assoc.read_uint(offset, id_len)?;
        offset += id_len;
        let association_count = assoc.read_uint(offset, 1)?;
        offset += 1;

        for _ in 0..association_count {
            assoc.ensure(offset, index_len)?;
            // The essential bit leads, then the 7- or 15-bit property index.
            let mut bits = BitReader::new(assoc.slice(offset, index_len)?);
            let _essential = bits.read_bool().map_err(|_| Halt::Invalid)?;
            let property_index = bits
                .read_u16(index_len as u8 * 8 - 1)
                .map_err(|_| Halt::Invalid)?;
            offset += index_len;

            if entry_item_id == item_id {
                // Parse again at the "iprp" level to find the "ipco" and
                // the property the index points at inside it.
                let (_, ipco) = find_child(
                    iprp,
                    BoxType::ItemPropertyContainerBox,
                    Halt::Invalid,
                    budget,
                )?;
                match scan_ipco_for_property(ipco, property_index.into(), budget, features) {
                    Ok(()) if features.is_complete() => return Ok(()),
                    Ok(()) | Err(Halt::NotFound) => {} // carry on with the next association
                    Err(halt) => return Err(halt),
                }
            }
        }
    }

    // There is one "ipma" per "iprp" and at most one "iprp" per "meta", so
    // the item's properties have all been seen by now.
    if features.width != 0 && features.height != 0 {
        // The bit depth and channel count may still be declared on a tile
        // rather than on a "grid" primary item.
        return Err(Halt::NotFound);
    }
    Err(Halt::Invalid)
}

/// Resolves the features of item `item_id` through "meta > iprp".
fn scan_meta_for_item_features(
    meta: Window<'_>,
    item_id: u32,
    budget: &mut BoxBudget,
    features: &mut Features,
) -> Scan<()> {
    let (_, iprp) = find_child(meta, BoxType::ItemPropertiesBox, Halt::Invalid, budget)?;
    scan_iprp_for_item_features(iprp, item_id, budget, features)
}

fn scan_root_for_item_features(
    file: Window<'_>,
    item_id: u32,
    budget: &mut BoxBudget,
    features: &mut Features,
) -> Scan<()> {
    let (_, meta) = find_child(file, BoxType::MetadataBox, Halt::Invalid, budget)?;
    scan_meta_for_item_features(meta, item_id, budget, features)
}

/// Completes a partial feature record from the tiles of a grid image:
/// follows "dimg" references from `primary_item_id` and applies the
/// property resolution to each referenced tile until one satisfies the
/// missing fields.
///
/// See ISO/IEC 14496-12:2015 § 8.11.12.2
fn scan_iref_for_tile_features(
    iref: Window<'_>,
    meta: Window<'_>,
    primary_item_id: u32,
    budget: &mut BoxBudget,
    features: &mut Features,
) -> Scan<()> {
    let mut position = 0;
    loop {
        let header = parse_box(iref, position, budget)?;
        if header.kind == BoxType::DerivedImageRefBox {
            let id_len: u32 = if header.version == 0 { 2 } else { 4 };
            let content = iref.child(&header);
            content.ensure(0, id_len + 2)?;
            let from_item_id = content.read_uint(0, id_len)?;
            let mut offset = id_len;
            if from_item_id == primary_item_id {
                let reference_count = content.read_uint(offset, 2)?;
                offset += 2;
                for _ in 0..reference_count {
                    content.ensure(offset, id_len)?;
                    let tile_item_id = content.read_uint(offset, id_len)?;
                    offset += id_len;
                    // The walk goes back up one level, so the "meta"
                    // content must strictly enclose this "iref" content.
                    if meta.size == 0 || meta.origin >= iref.origin {
                        return Err(Halt::Invalid);
                    }
                    match scan_meta_for_item_features(meta, tile_item_id, budget, features) {
                        Ok(()) => return Ok(()),
                        // The first tile should be enough, but check the
                        // others just in case.
                        Err(Halt::NotFound) => {}
                        Err(halt) => return Err(halt),
                    }
                }
            }
        }
        position += header.size;
        if position == iref.size {
            return Err(Halt::NotFound);
        }
    }
}

fn scan_root_for_tile_features(
    file: Window<'_>,
    primary_item_id: u32,
    budget: &mut BoxBudget,
    features: &mut Features,
) -> Scan<()> {
    let (_, meta) = find_child(file, BoxType::MetadataBox, Halt::Invalid, budget)?;
    // A "meta" without item references simply has no tiles.
    let (_, iref) = find_child(meta, BoxType::ItemReferenceBox, Halt::NotFound, budget)?;
    scan_iref_for_tile_features(iref, meta, primary_item_id, budget, features)
}

/// Looks for an alpha auxiliary image anywhere in "meta > iprp > ipco".
///
/// The "auxC" may belong to an item other than the primary one or its
/// tiles; that imprecision is accepted.
///
/// See AV1 Image File Format (AVIF) § 4
/// at <https://aomediacodec.github.io/av1-avif/#auxiliary-images>
fn scan_root_for_alpha(file: Window<'_>, budget: &mut BoxBudget) -> Scan<()> {
    const ALPHA_AUX_TYPE: &[u8] = b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha\0";

    let (_, meta) = find_child(file, BoxType::MetadataBox, Halt::Invalid, budget)?;
    let (_, iprp) = find_child(meta, BoxType::ItemPropertiesBox, Halt::Invalid, budget)?;
    let (_, ipco) = find_child(
        iprp,
        BoxType::ItemPropertyContainerBox,
        Halt::Invalid,
        budget,
    )?;

    let aux_type_len = ALPHA_AUX_TYPE.len() as u32;
    let mut position = 0;
    loop {
        let header = parse_box(ipco, position, budget)?;
        if header.kind == BoxType::AuxiliaryTypeProperty && header.content_size >= aux_type_len {
            let content = ipco.child(&header);
            content.present(0, aux_type_len)?;
            // Compared with the terminator, so a longer auxiliary type
            // sharing the prefix does not match.
            if content.slice(0, aux_type_len)? == ALPHA_AUX_TYPE {
                return Ok(());
            }
        }
        position += header.size;
        if position == ipco.size {
            return Err(Halt::NotFound);
        }
    }
}

/// Runs the four passes over the whole file window: brand, primary item
/// ID, features (with tile fallback), alpha.
fn parse_file(file: Window<'_>) -> Scan<Features> {
    let mut budget = BoxBudget::default();

    scan_root_for_brand(file, &mut budget)?;
    let primary_item_id = scan_root_for_primary_item(file, &mut budget)?;

    let mut features = Features::default();
    match scan_root_for_item_features(file, primary_item_id, &mut budget, &mut features) {
        // Some of the fields may be declared on a tile instead of on the
        // primary item.
        Err(Halt::NotFound) => {
            scan_root_for_tile_features(file, primary_item_id, &mut budget, &mut features)?
        }
        other => other?,
    }

    match scan_root_for_alpha(file, &mut budget) {
        Ok(()) => features.num_channels += 1,
        Err(Halt::NotFound) => {}
        Err(halt) => return Err(halt),
    }
    Ok(features)
}

fn file_window(data: &[u8], file_size: u32) -> Window<'_> {
    let available = data.len().min(file_size as usize);
    Window {
        data: &data[..available],
        size: file_size,
        origin: 0,
    }
}

fn collapse(halt: Halt, window: &Window<'_>) -> Error {
    match halt {
        // Whether an absent box may still arrive depends on how much of
        // the file we were given.
        Halt::NotFound => {
            if (window.data.len() as u64) < u64::from(window.size) {
                Error::NotEnoughData
            } else {
                Error::InvalidFile
            }
        }
        Halt::Truncated => Error::NotEnoughData,
        Halt::Invalid => Error::InvalidFile,
        Halt::Aborted => Error::TooComplex,
    }
}

/// Extracts the features of the AVIF file starting in `data`.
///
/// `data` can be a partial file but must begin at its first byte. The
/// features can be extracted from the first 450 bytes of most AVIF files,
/// so on [`Error::NotEnoughData`] it is usually worth retrying with a
/// slightly longer prefix.
///
/// # Example
///
/// ```no_run
/// let bytes = std::fs::read("image.avif")?;
/// let features = avif_probe::probe(&bytes)?;
/// assert!(features.width > 0 && features.height > 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn probe(data: &[u8]) -> Result<Features> {
    // Consider the file to be of maximum size.
    probe_with_file_size(data, u64::from(MAX_FILE_SIZE))
}

/// Same as [`probe`] with the total file size, if known. Use this variant
/// when possible: the extra bound turns some otherwise-undecidable inputs
/// into definite answers, and `data` is never read past `file_size` bytes.
pub fn probe_with_file_size(data: &[u8], file_size: u64) -> Result<Features> {
    let file_size = file_size.min(u64::from(MAX_FILE_SIZE)) as u32;
    let window = file_window(data, file_size);
    parse_file(window).map_err(|halt| collapse(halt, &window))
}

/// Checks that `data` starts an AVIF file, without extracting features.
/// Cheaper than [`probe`] and decided by the leading "ftyp" box alone.
pub fn identify(data: &[u8]) -> Result<()> {
    let window = file_window(data, MAX_FILE_SIZE);
    let mut budget = BoxBudget::default();
    scan_root_for_brand(window, &mut budget).map_err(|halt| collapse(halt, &window))
}

/// Extracts the features of the AVIF file produced by `reader`.
///
/// Bytes are buffered in bounded chunks and the parse is retried after
/// each one, so only the header region of the file is ever requested: the
/// reader is not drained once the features are decided. No byte is
/// interpreted before it has been copied into the buffer.
pub fn probe_reader<R: Read>(reader: &mut R) -> Result<Features> {
    let mut buffered: TryVec<u8> = TryVec::new();
    let mut chunk = [0; STREAM_CHUNK_SIZE];
    loop {
        let wanted = chunk.len().min(MAX_FILE_SIZE as usize - buffered.len());
        if wanted == 0 {
            // The buffer is at the parser's size limit; decide with it.
            return probe_with_file_size(&buffered, buffered.len() as u64);
        }
        let got = match reader.read(&mut chunk[..wanted]) {
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if got == 0 {
            // End of stream: the exact file size is now known.
            return probe_with_file_size(&buffered, buffered.len() as u64);
        }
        buffered.extend_from_slice(&chunk[..got])?;
        match probe(&buffered) {
            Err(Error::NotEnoughData) => {} // read more and retry
            decided => return decided,
        }
    }
}

#[cfg(test)]
fn test_window(data: &[u8], size: u32) -> Window<'_> {
    Window {
        data,
        size,
        origin: 0,
    }
}

#[test]
fn box_header_smoke() {
    let bytes = b"\x00\x00\x00\x10ftyp01234567";
    let mut budget = BoxBudget::default();
    let header = parse_box(test_window(bytes, 16), 0, &mut budget).unwrap();
    assert_eq!(header.kind, BoxType::FileTypeBox);
    assert_eq!(header.size, 16);
    assert_eq!(header.content_offset, 8);
    assert_eq!(header.content_size, 8);
    assert_eq!(header.version, 0);
    assert_eq!(header.flags, 0);
}

#[test]
fn box_header_full_box() {
    let bytes = b"\x00\x00\x00\x0emeta\x00\x00\x00\x00xy";
    let mut budget = BoxBudget::default();
    let header = parse_box(test_window(bytes, 14), 0, &mut budget).unwrap();
    assert_eq!(header.kind, BoxType::MetadataBox);
    assert_eq!(header.content_offset, 12);
    assert_eq!(header.content_size, 2);
}

#[test]
fn box_header_unsupported_version_is_downgraded() {
    let bytes = b"\x00\x00\x00\x0cmeta\x02\x00\x00\x00";
    let mut budget = BoxBudget::default();
    let header = parse_box(test_window(bytes, 12), 0, &mut budget).unwrap();
    assert_eq!(header.kind, BoxType::UnknownBox(0x6d65_7461));
    assert_eq!(header.version, 2);
}

#[test]
fn box_header_truncation_is_not_invalidity() {
    let bytes = b"\x00\x00\x00\x10ftyp01234567";
    let mut budget = BoxBudget::default();
    // The whole box fits the declared file size but only part of the
    // header was supplied.
    assert_eq!(
        parse_box(test_window(&bytes[..3], 16), 0, &mut budget),
        Err(Halt::Truncated)
    );
    assert_eq!(
        parse_box(test_window(&bytes[..6], 16), 0, &mut budget),
        Err(Halt::Truncated)
    );
    // A declared file size too small for any header is a format violation
    // no matter how many bytes are missing.
    assert_eq!(
        parse_box(test_window(&bytes[..3], 7), 0, &mut budget),
        Err(Halt::Invalid)
    );
}

#[test]
fn box_header_rejects_wide_and_degenerate_sizes() {
    let mut budget = BoxBudget::default();
    // size 1 announces a 64-bit size, size 0 extends to the end of file
    let wide = b"\x00\x00\x00\x01mdat";
    assert_eq!(
        parse_box(test_window(wide, 100), 0, &mut budget),
        Err(Halt::Aborted)
    );
    let to_end = b"\x00\x00\x00\x00mdat";
    assert_eq!(
        parse_box(test_window(to_end, 100), 0, &mut budget),
        Err(Halt::Aborted)
    );
    let short = b"\x00\x00\x00\x07mdat";
    assert_eq!(
        parse_box(test_window(short, 100), 0, &mut budget),
        Err(Halt::Invalid)
    );
}

#[test]
fn box_budget_stops_the_walk() {
    let bytes = b"\x00\x00\x00\x08abcd";
    let mut budget = BoxBudget::default();
    for _ in 0..MAX_PARSED_BOXES - 1 {
        parse_box(test_window(bytes, 8), 0, &mut budget).unwrap();
    }
    assert_eq!(
        parse_box(test_window(bytes, 8), 0, &mut budget),
        Err(Halt::Aborted)
    );
}

#[test]
fn window_prefers_invalid_over_truncated() {
    let w = test_window(b"ab", 4);
    assert_eq!(w.ensure(0, 8), Err(Halt::Invalid));
    assert_eq!(w.ensure(0, 3), Err(Halt::Truncated));
    assert_eq!(w.ensure(0, 2), Ok(()));
}
