//! Concurrent transactions against one mounted file system: `N` threads
//! each running their own `begin_op ... end_op` bracket, admitted together
//! under the group-commit quota (`N * OP_MAX_NUM_BLOCKS <= LOG_MAX_SIZE`),
//! and each writing a distinct file that must read back correctly once
//! every thread has committed.

use std::thread;

use rv6fs_core::bcache::Bcache;
use rv6fs_core::bdq::Bdq;
use rv6fs_core::device::MemDevice;
use rv6fs_core::fs::inode::{InodeTable, InodeType};
use rv6fs_core::fs::mkfs;
use rv6fs_core::fs::superblock::Superblock;
use rv6fs_core::param::{LOG_MAX_SIZE, OP_MAX_NUM_BLOCKS};

#[test]
fn concurrent_ops_each_within_quota_all_commit_correctly() {
    let sb = Superblock::new(1024, 64, LOG_MAX_SIZE as u32);
    let bdq = Bdq::new(Box::new(MemDevice::new(sb.num_blocks)));
    mkfs::format(&bdq, &sb);
    let bcache = Bcache::mount(sb, bdq);
    let table = InodeTable::new(&bcache, sb);

    let num_threads = LOG_MAX_SIZE / OP_MAX_NUM_BLOCKS;
    let mut results = Vec::new();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..num_threads)
            .map(|i| {
                let table = &table;
                let bcache = &bcache;
                scope.spawn(move || {
                    let tx = bcache.begin_op();
                    let inode = table.alloc(&tx, InodeType::Regular).unwrap();
                    let mut guard = table.lock(inode);
                    let payload = format!("thread-{i}");
                    guard.write(&tx, payload.as_bytes(), 0);
                    drop(guard);
                    drop(tx);
                    (i, inode)
                })
            })
            .collect();
        for h in handles {
            results.push(h.join().expect("worker thread panicked"));
        }
    });

    assert_eq!(results.len(), num_threads);
    let mut inode_numbers: Vec<_> = results.iter().map(|(_, inode)| inode.inode_no()).collect();
    inode_numbers.sort();
    inode_numbers.dedup();
    assert_eq!(inode_numbers.len(), num_threads, "every thread must receive a distinct inode");

    for (i, inode) in results {
        let mut guard = table.lock(inode);
        let mut buf = vec![0u8; guard.num_bytes() as usize];
        guard.read(&mut buf, 0);
        assert_eq!(buf, format!("thread-{i}").into_bytes());
    }
}

#[test]
fn concurrent_readers_of_the_same_file_see_a_consistent_snapshot() {
    let sb = Superblock::new(512, 32, LOG_MAX_SIZE as u32);
    let bdq = Bdq::new(Box::new(MemDevice::new(sb.num_blocks)));
    mkfs::format(&bdq, &sb);
    let bcache = Bcache::mount(sb, bdq);
    let table = InodeTable::new(&bcache, sb);

    let inode = {
        let tx = bcache.begin_op();
        let inode = table.alloc(&tx, InodeType::Regular).unwrap();
        let mut guard = table.lock(inode);
        guard.write(&tx, b"steady state", 0);
        inode
    };

    thread::scope(|scope| {
        for _ in 0..8 {
            let table = &table;
            scope.spawn(move || {
                let mut guard = table.lock(inode);
                let mut buf = [0u8; 12];
                guard.read(&mut buf, 0);
                assert_eq!(&buf, b"steady state");
            });
        }
    });
}
