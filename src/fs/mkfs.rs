//! Fresh-image formatting.
//!
//! The source in `examples/original_source` boots from an already-formatted
//! image; the formatter itself lives outside the kept files. `spec.md` §8's
//! first end-to-end scenario ("Fresh mount") nonetheless presupposes one
//! exists — a zeroed log header, a bitmap with the meta region reserved, and
//! inode 1 initialized as an empty root directory — so this module supplies
//! it.

use zerocopy::AsBytes;

use crate::bdq::{Bdq, Buf, BufFlags};
use crate::fs::inode::{Dinode, InodeType};
use crate::fs::superblock::Superblock;
use crate::log::LogHeader;
use crate::param::{BIT_PER_BLOCK, BLOCK_SIZE, INODE_PER_BLOCK, ROOT_INODE_NO};

fn write_block(bdq: &Bdq, block_no: u32, data: [u8; BLOCK_SIZE]) {
    let mut buf = Buf::new(block_no);
    buf.flags.insert(BufFlags::DIRTY);
    buf.data = data;
    bdq.rw(buf);
}

/// Lays out a fresh, empty file system over `bdq` according to `sb`: a clean
/// (zeroed `num_blocks`) log header, a bitmap with every meta block
/// (boot, log, inode and bitmap regions, i.e. `0..sb.data_start()`) marked
/// allocated and every data block free, and every inode entry `Invalid`
/// except `ROOT_INODE_NO`, which is initialized as an empty directory.
///
/// Reserving the meta region in the bitmap mirrors the pre-formatted image
/// `examples/original_source`'s `mkfs` host tool produces: `bitmap::alloc`
/// returns absolute block numbers starting from bit 0, so an unreserved
/// bitmap would let the very first allocation hand out the boot block, the
/// log, or the inode table itself.
pub fn format(bdq: &Bdq, sb: &Superblock) {
    let header = LogHeader::empty();
    let mut header_block = [0u8; BLOCK_SIZE];
    header
        .write_to_prefix(&mut header_block[..])
        .expect("log header does not fit in one block");
    write_block(bdq, sb.log_start, header_block);

    let num_inode_blocks = (sb.num_inodes as usize).div_ceil(INODE_PER_BLOCK) as u32;
    for i in 0..num_inode_blocks {
        write_block(bdq, sb.inode_start + i, [0u8; BLOCK_SIZE]);
    }

    let data_start = sb.data_start();
    let num_bitmap_blocks = (sb.num_blocks as usize).div_ceil(BIT_PER_BLOCK) as u32;
    for i in 0..num_bitmap_blocks {
        let mut block = [0u8; BLOCK_SIZE];
        let base = i * BIT_PER_BLOCK as u32;
        let limit = (BIT_PER_BLOCK as u32).min(sb.num_blocks.saturating_sub(base));
        for bit in 0..limit {
            if base + bit < data_start {
                block[(bit / 8) as usize] |= 1u8 << (bit % 8);
            }
        }
        write_block(bdq, sb.bitmap_start + i, block);
    }

    let mut root = Dinode::new(InodeType::Directory);
    root.num_links = 1;

    let mut root_block = [0u8; BLOCK_SIZE];
    let slot_in_block = (ROOT_INODE_NO as usize % INODE_PER_BLOCK) * std::mem::size_of::<Dinode>();
    root.write_to_prefix(&mut root_block[slot_in_block..])
        .unwrap();
    write_block(bdq, sb.iblock(ROOT_INODE_NO), root_block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcache::Bcache;
    use crate::device::MemDevice;
    use crate::fs::inode::InodeTable;

    #[test]
    fn fresh_mount_has_directory_root_with_no_bytes() {
        let sb = Superblock::new(512, 32, crate::param::LOG_MAX_SIZE as u32);
        let bdq = Bdq::new(Box::new(MemDevice::new(sb.num_blocks)));
        format(&bdq, &sb);

        let bcache = Bcache::mount(sb, bdq);
        let table = InodeTable::new(&bcache, sb);
        let root = table.root();
        let guard = table.lock(root);
        assert_eq!(guard.kind(), InodeType::Directory);
        assert_eq!(guard.num_bytes(), 0);
    }

    #[test]
    fn fresh_mount_then_alloc_returns_inode_two() {
        let sb = Superblock::new(512, 32, crate::param::LOG_MAX_SIZE as u32);
        let bdq = Bdq::new(Box::new(MemDevice::new(sb.num_blocks)));
        format(&bdq, &sb);

        let bcache = Bcache::mount(sb, bdq);
        let table = InodeTable::new(&bcache, sb);
        let tx = bcache.begin_op();
        let inode = table.alloc(&tx, InodeType::Regular).unwrap();
        assert_eq!(inode.inode_no(), 2);
    }

    #[test]
    fn data_block_alloc_never_returns_a_meta_region_block() {
        let sb = Superblock::new(512, 32, crate::param::LOG_MAX_SIZE as u32);
        let bdq = Bdq::new(Box::new(MemDevice::new(sb.num_blocks)));
        format(&bdq, &sb);

        let bcache = Bcache::mount(sb, bdq);
        let tx = bcache.begin_op();
        for _ in 0..32 {
            let block_no = tx.alloc().unwrap();
            assert!(
                block_no >= sb.data_start(),
                "alloc handed out meta block {block_no} (data starts at {})",
                sb.data_start()
            );
        }
    }
}
