//! # Index Metadata Page
//!
//! Page 1 of every index file starts with this 32-byte header. It names
//! the relation the index was built over, where in each record the indexed
//! attribute lives, which key width the tree uses, and where the current
//! root is. The root field is the only part that changes after creation;
//! it is rewritten each time the tree grows a level.
//!
//! ```text
//! Offset  Size  Field             Description
//! ------  ----  ----------------  -------------------------------------
//! 0       20    relation_name     NUL-padded identity of the record file
//! 20      4     attr_byte_offset  key position inside each record
//! 24      4     key_type          0 = int32, 1 = double, 2 = string10
//! 28      4     root_page_no      current root page
//! ```
//!
//! All fields are little-endian and the struct is parsed in place from the
//! pinned metadata page. On reopen the stored triple is compared against
//! the caller's arguments; any disagreement means the caller is talking to
//! somebody else's index and is rejected with `BadIndexInfo`.

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::RELATION_NAME_LEN;
use crate::error::{Error, Result};

use super::key::KeyType;

pub const META_LEN: usize = RELATION_NAME_LEN + 12;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexMeta {
    relation_name: [u8; RELATION_NAME_LEN],
    attr_byte_offset: U32,
    key_type: U32,
    root_page_no: U32,
}

const _: () = assert!(std::mem::size_of::<IndexMeta>() == META_LEN);

fn pad_name(relation: &str) -> [u8; RELATION_NAME_LEN] {
    let mut buf = [0u8; RELATION_NAME_LEN];
    let bytes = relation.as_bytes();
    let n = bytes.len().min(RELATION_NAME_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

impl IndexMeta {
    pub fn new(relation: &str, attr_byte_offset: u32, key_type: KeyType, root_page_no: u32) -> Self {
        Self {
            relation_name: pad_name(relation),
            attr_byte_offset: U32::new(attr_byte_offset),
            key_type: U32::new(key_type as u32),
            root_page_no: U32::new(root_page_no),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < META_LEN {
            return Err(Error::Corrupted(format!(
                "metadata page too small: {} < {}",
                bytes.len(),
                META_LEN
            )));
        }
        Self::ref_from_bytes(&bytes[..META_LEN])
            .map_err(|e| Error::Corrupted(format!("unreadable metadata page: {:?}", e)))
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        if bytes.len() < META_LEN {
            return Err(Error::Corrupted(format!(
                "metadata page too small: {} < {}",
                bytes.len(),
                META_LEN
            )));
        }
        Self::mut_from_bytes(&mut bytes[..META_LEN])
            .map_err(|e| Error::Corrupted(format!("unreadable metadata page: {:?}", e)))
    }

    pub fn attr_byte_offset(&self) -> u32 {
        self.attr_byte_offset.get()
    }

    pub fn key_type(&self) -> Result<KeyType> {
        KeyType::from_u32(self.key_type.get()).ok_or_else(|| {
            Error::Corrupted(format!("unknown key type tag {}", self.key_type.get()))
        })
    }

    pub fn root_page_no(&self) -> u32 {
        self.root_page_no.get()
    }

    pub fn set_root_page_no(&mut self, page_no: u32) {
        self.root_page_no = U32::new(page_no);
    }

    /// Checks the stored identity against the open arguments.
    pub fn check_matches(
        &self,
        relation: &str,
        attr_byte_offset: u32,
        key_type: KeyType,
    ) -> Result<()> {
        if self.relation_name != pad_name(relation) {
            return Err(Error::BadIndexInfo(format!(
                "relation name mismatch (index built over {:?})",
                String::from_utf8_lossy(
                    &self.relation_name[..self
                        .relation_name
                        .iter()
                        .position(|&b| b == 0)
                        .unwrap_or(RELATION_NAME_LEN)]
                )
            )));
        }
        if self.attr_byte_offset.get() != attr_byte_offset {
            return Err(Error::BadIndexInfo(format!(
                "attribute offset mismatch: stored {}, requested {}",
                self.attr_byte_offset.get(),
                attr_byte_offset
            )));
        }
        let stored = self.key_type()?;
        if stored != key_type {
            return Err(Error::BadIndexInfo(format!(
                "key type mismatch: stored {:?}, requested {:?}",
                stored, key_type
            )));
        }
        Ok(())
    }
}
