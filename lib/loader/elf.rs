use crate::memory::{Image, MemoryPermissions, Segment};
use crate::types::Endian;
use crate::Error;
use goblin::Hint;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Loads the `PT_LOAD` segments of an Elf into an `Image`.
#[derive(Clone, Debug)]
pub struct Elf {
    bytes: Vec<u8>,
}

impl Elf {
    pub fn new(bytes: Vec<u8>) -> Result<Elf, Error> {
        let peek_bytes: [u8; 16] = bytes
            .get(0..16)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::InvalidElf)?;
        match goblin::peek_bytes(&peek_bytes)? {
            Hint::Elf(_) => Ok(Elf { bytes }),
            _ => Err(Error::InvalidElf),
        }
    }

    pub fn from_file(filename: &Path) -> Result<Elf, Error> {
        let mut file = File::open(filename)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Elf::new(buf)
    }

    fn elf(&self) -> Result<goblin::elf::Elf, Error> {
        Ok(goblin::elf::Elf::parse(&self.bytes)?)
    }

    /// The address program execution begins at.
    pub fn program_entry(&self) -> Result<u64, Error> {
        Ok(self.elf()?.header.e_entry)
    }

    pub fn endian(&self) -> Result<Endian, Error> {
        Ok(if self.elf()?.little_endian {
            Endian::Little
        } else {
            Endian::Big
        })
    }

    /// Build an `Image` from this Elf's loadable program headers.
    pub fn image(&self) -> Result<Image, Error> {
        use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};

        let elf = self.elf()?;
        let mut image = Image::new(self.endian()?);

        for ph in &elf.program_headers {
            if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
                continue;
            }
            let file_range = (ph.p_offset as usize)..((ph.p_offset + ph.p_filesz) as usize);
            let mut bytes = self
                .bytes
                .get(file_range)
                .ok_or(Error::InvalidElf)?
                .to_vec();

            // zero-fill the bss portion
            if bytes.len() < ph.p_memsz as usize {
                bytes.resize(ph.p_memsz as usize, 0);
            }

            let mut permissions = MemoryPermissions::NONE;
            if ph.p_flags & PF_R != 0 {
                permissions |= MemoryPermissions::READ;
            }
            if ph.p_flags & PF_W != 0 {
                permissions |= MemoryPermissions::WRITE;
            }
            if ph.p_flags & PF_X != 0 {
                permissions |= MemoryPermissions::EXECUTE;
            }

            image.add_segment(Segment::new(ph.p_vaddr, bytes, permissions))?;
        }

        Ok(image)
    }
}
