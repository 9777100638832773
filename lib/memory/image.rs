use crate::memory::MemoryPermissions;
use crate::types::Endian;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A contiguous range of bytes with a load address and permissions.
/// Immutable once added to an `Image`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Segment {
    address: u64,
    data: Vec<u8>,
    permissions: MemoryPermissions,
}

impl Segment {
    /// Create a new segment loaded at the given address.
    pub fn new(address: u64, data: Vec<u8>, permissions: MemoryPermissions) -> Segment {
        Segment {
            address,
            data,
            permissions,
        }
    }

    /// The address this segment is loaded at.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The first address past the end of this segment.
    pub fn end(&self) -> u64 {
        self.address + self.data.len() as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn permissions(&self) -> MemoryPermissions {
        self.permissions
    }

    pub fn is_executable(&self) -> bool {
        self.permissions.contains(MemoryPermissions::EXECUTE)
    }

    pub fn is_readable(&self) -> bool {
        self.permissions.contains(MemoryPermissions::READ)
    }
}

/// An immutable memory image: permissioned segments keyed by address.
///
/// Segments may not be empty. Overlap between segments is not validated;
/// reads resolve against the nearest segment at-or-before the address.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Image {
    endian: Endian,
    segments: BTreeMap<u64, Segment>,
}

impl Image {
    /// Create a new empty image with the given endianness.
    pub fn new(endian: Endian) -> Image {
        Image {
            endian,
            segments: BTreeMap::new(),
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Add a segment to this image. Empty segments are rejected.
    pub fn add_segment(&mut self, segment: Segment) -> Result<(), Error> {
        if segment.is_empty() {
            return Err(Error::EmptySegment(segment.address()));
        }
        self.segments.insert(segment.address(), segment);
        Ok(())
    }

    /// The segments in this image, keyed by address.
    pub fn segments(&self) -> &BTreeMap<u64, Segment> {
        &self.segments
    }

    /// The segment containing the given address, if any.
    pub fn segment_at(&self, address: u64) -> Option<&Segment> {
        self.segments
            .range(..=address)
            .next_back()
            .map(|(_, segment)| segment)
            .filter(|segment| address < segment.end())
    }

    /// Get the permissions at the given address.
    pub fn permissions(&self, address: u64) -> Option<MemoryPermissions> {
        self.segment_at(address).map(|segment| segment.permissions())
    }

    /// True if the given address is inside an executable segment.
    pub fn is_executable(&self, address: u64) -> bool {
        self.segment_at(address)
            .map(|segment| segment.is_executable())
            .unwrap_or(false)
    }

    /// True if the whole `[start, end)` range is inside one executable
    /// segment.
    pub fn is_executable_range(&self, start: u64, end: u64) -> bool {
        self.segment_at(start)
            .map(|segment| segment.is_executable() && end <= segment.end())
            .unwrap_or(false)
    }

    /// The sorted `[start, end)` ranges of every executable segment.
    pub fn executable_ranges(&self) -> Vec<(u64, u64)> {
        self.segments
            .values()
            .filter(|segment| segment.is_executable())
            .map(|segment| (segment.address(), segment.end()))
            .collect()
    }

    /// Get the `u8` value at the given address.
    pub fn get8(&self, address: u64) -> Option<u8> {
        self.segment_at(address)
            .map(|segment| segment.data()[(address - segment.address()) as usize])
    }

    fn get_bytes(&self, address: u64, length: usize) -> Option<Vec<u8>> {
        let segment = self.segment_at(address)?;
        let offset = (address - segment.address()) as usize;
        if offset + length > segment.len() {
            return None;
        }
        Some(segment.data()[offset..offset + length].to_vec())
    }

    /// Get the 16-bit value at the given address, respecting the image's
    /// endianness.
    pub fn get16(&self, address: u64) -> Option<u16> {
        let bytes = self.get_bytes(address, 2)?;
        Some(match self.endian {
            Endian::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
            Endian::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        })
    }

    /// Get the 32-bit value at the given address, respecting the image's
    /// endianness.
    pub fn get32(&self, address: u64) -> Option<u32> {
        let bytes = self.get_bytes(address, 4)?;
        let bytes: [u8; 4] = bytes.try_into().unwrap();
        Some(match self.endian {
            Endian::Big => u32::from_be_bytes(bytes),
            Endian::Little => u32::from_le_bytes(bytes),
        })
    }

    /// Get the 64-bit value at the given address, respecting the image's
    /// endianness.
    pub fn get64(&self, address: u64) -> Option<u64> {
        let bytes = self.get_bytes(address, 8)?;
        let bytes: [u8; 8] = bytes.try_into().unwrap();
        Some(match self.endian {
            Endian::Big => u64::from_be_bytes(bytes),
            Endian::Little => u64::from_le_bytes(bytes),
        })
    }

    /// Read a pointer-width value at the given address. `bits` must be 16,
    /// 32 or 64.
    pub fn get_pointer(&self, address: u64, bits: usize) -> Option<u64> {
        match bits {
            16 => self.get16(address).map(|v| v as u64),
            32 => self.get32(address).map(|v| v as u64),
            64 => self.get64(address),
            _ => panic!("unsupported pointer width: {}", bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        let mut image = Image::new(Endian::Little);
        image
            .add_segment(Segment::new(
                0x1000,
                vec![0xAA, 0xBB, 0xCC, 0xDD, 0x11, 0x22, 0x33, 0x44],
                MemoryPermissions::READ | MemoryPermissions::EXECUTE,
            ))
            .unwrap();
        image
            .add_segment(Segment::new(
                0x2000,
                vec![0u8; 16],
                MemoryPermissions::READ,
            ))
            .unwrap();
        image
    }

    #[test]
    fn reads_respect_endianness() {
        let image = image();
        assert_eq!(image.get8(0x1000), Some(0xAA));
        assert_eq!(image.get16(0x1000), Some(0xBBAA));
        assert_eq!(image.get32(0x1000), Some(0xDDCCBBAA));
        assert_eq!(image.get64(0x1000), Some(0x44332211DDCCBBAA));
        assert_eq!(image.get_pointer(0x1000, 32), Some(0xDDCCBBAA));

        let mut big = Image::new(Endian::Big);
        big.add_segment(Segment::new(
            0x1000,
            vec![0xAA, 0xBB, 0xCC, 0xDD],
            MemoryPermissions::READ,
        ))
        .unwrap();
        assert_eq!(big.get32(0x1000), Some(0xAABBCCDD));
    }

    #[test]
    fn reads_do_not_cross_segment_end() {
        let image = image();
        assert_eq!(image.get32(0x1006), None);
        assert_eq!(image.get8(0x1008), None);
        assert_eq!(image.get8(0x0FFF), None);
    }

    #[test]
    fn executable_ranges() {
        let image = image();
        assert_eq!(
            image.permissions(0x1000),
            Some(MemoryPermissions::READ | MemoryPermissions::EXECUTE)
        );
        assert_eq!(image.permissions(0x3000), None);
        assert!(image.is_executable(0x1000));
        assert!(image.is_executable(0x1007));
        assert!(!image.is_executable(0x1008));
        assert!(!image.is_executable(0x2000));
        assert!(image.is_executable_range(0x1000, 0x1008));
        assert!(!image.is_executable_range(0x1004, 0x100C));
        assert_eq!(image.executable_ranges(), vec![(0x1000, 0x1008)]);
    }

    #[test]
    fn empty_segment_rejected() {
        let mut image = Image::new(Endian::Little);
        assert!(matches!(
            image.add_segment(Segment::new(0x1000, vec![], MemoryPermissions::READ)),
            Err(Error::EmptySegment(0x1000))
        ));
    }
}
