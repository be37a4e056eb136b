//! End-to-end walks of the engine-visible contract: the pre-lock header
//! probe, full write/read cycles across the lock ladder, sector
//! discipline, snapshot visibility between connections, and the busy
//! outcome of a stale upgrade.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use kvlite_error::{ErrorCode, KvliteError};
use kvlite_store::Registry;
use kvlite_types::flags::VfsOpenFlags;
use kvlite_types::{LockLevel, SECTOR_SIZE};
use kvlite_vfs::{KvliteFile, KvliteVfs, Vfs, VfsFile};

fn make_vfs() -> KvliteVfs {
    KvliteVfs::with_registry(Arc::new(Registry::new())).unwrap()
}

fn open_main(vfs: &KvliteVfs, name: &str) -> KvliteFile {
    let flags = VfsOpenFlags::MAIN_DB | VfsOpenFlags::READWRITE | VfsOpenFlags::CREATE;
    let (file, _) = vfs.open(Some(Path::new(name)), flags).unwrap();
    file
}

fn lock_for_read(file: &mut KvliteFile) {
    file.lock(LockLevel::Shared).unwrap();
}

fn lock_for_write(file: &mut KvliteFile) {
    file.lock(LockLevel::Reserved).unwrap();
    file.lock(LockLevel::Pending).unwrap();
    file.lock(LockLevel::Exclusive).unwrap();
}

fn unlock_for_write(file: &mut KvliteFile) {
    file.unlock(LockLevel::Pending).unwrap();
    file.unlock(LockLevel::Reserved).unwrap();
    file.unlock(LockLevel::Shared).unwrap();
}

fn unlock_for_read(file: &mut KvliteFile) {
    file.unlock(LockLevel::None).unwrap();
}

fn sector_with(text: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; SECTOR_SIZE];
    data[..text.len()].copy_from_slice(text);
    data
}

#[test]
fn first_page_probe_without_lock() {
    let vfs = make_vfs();
    let mut file = open_main(&vfs, "probe.db");

    let mut buf = [0u8; 100];
    let n = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(n, 100);
    assert_eq!(&buf[..16], b"SQLite format 3\0");
    // A fresh database is exactly one page long.
    assert_eq!(&buf[28..32], &1u32.to_be_bytes());

    file.close().unwrap();
}

#[test]
fn write_then_read_round_trip() {
    let vfs = make_vfs();
    let mut file = open_main(&vfs, "roundtrip.db");

    let data = sector_with(b"Hello, World!");

    lock_for_read(&mut file);
    lock_for_write(&mut file);
    file.write_at(&data, 4096).unwrap();
    file.confirm_commit().unwrap();
    unlock_for_write(&mut file);

    let mut ret = vec![0u8; SECTOR_SIZE];
    let n = file.read_at(&mut ret, 4096).unwrap();
    assert_eq!(n, SECTOR_SIZE);
    assert_eq!(ret, data);

    unlock_for_read(&mut file);
    file.close().unwrap();
}

#[test]
fn invalid_offsets_and_sizes() {
    let vfs = make_vfs();
    let mut file = open_main(&vfs, "invalid.db");

    lock_for_read(&mut file);
    let mut buf = [0u8; 100];
    let err = file.read_at(&mut buf, -1).unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::IoErr);

    lock_for_write(&mut file);
    let err = file.write_at(&sector_with(b"Hello world"), -1).unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::IoErr);

    let err = file.write_at(&buf, 4096).unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::IoErr);

    unlock_for_write(&mut file);
    unlock_for_read(&mut file);
    file.close().unwrap();
}

#[test]
fn reader_starting_after_commit_sees_the_data() {
    let vfs = make_vfs();
    let mut f1 = open_main(&vfs, "shared.db");
    let mut f2 = open_main(&vfs, "shared.db");

    let data = sector_with(b"Hello, World!");

    lock_for_read(&mut f1);
    lock_for_write(&mut f1);
    f1.write_at(&data, 4096).unwrap();
    f1.confirm_commit().unwrap();
    unlock_for_write(&mut f1);

    // F2 begins its shared lock after F1's commit landed.
    lock_for_read(&mut f2);
    let mut ret = vec![0u8; SECTOR_SIZE];
    f2.read_at(&mut ret, 4096).unwrap();
    assert_eq!(ret, data);

    unlock_for_read(&mut f2);
    unlock_for_read(&mut f1);
    f1.close().unwrap();
    f2.close().unwrap();
}

#[test]
fn concurrent_reader_blocks_on_the_writer_token() {
    let vfs = make_vfs();
    let mut f1 = open_main(&vfs, "concurrent.db");
    let mut f2 = open_main(&vfs, "concurrent.db");

    let data = sector_with(b"Hello, World!");

    // F1 holds the store's writer before the second thread starts, so
    // F2's own upgrade can only complete after F1 resolves.
    lock_for_read(&mut f1);
    lock_for_write(&mut f1);

    let expected = data.clone();
    let handle = thread::spawn(move || {
        lock_for_read(&mut f2);
        lock_for_write(&mut f2);
        let mut ret = vec![0u8; SECTOR_SIZE];
        f2.read_at(&mut ret, 4096).unwrap();
        assert_eq!(ret, expected);
        unlock_for_write(&mut f2);
        unlock_for_read(&mut f2);
        f2.close().unwrap();
    });

    f1.write_at(&data, 4096).unwrap();
    f1.confirm_commit().unwrap();
    unlock_for_write(&mut f1);
    unlock_for_read(&mut f1);
    f1.close().unwrap();

    handle.join().unwrap();
}

#[test]
fn stale_snapshot_upgrade_is_busy() {
    let vfs = make_vfs();
    let mut f1 = open_main(&vfs, "phantom.db");
    let mut f2 = open_main(&vfs, "phantom.db");

    let data = sector_with(b"Hello, World!");
    let modified = sector_with(b"Phantom Read!");

    // F1 commits the initial page.
    lock_for_read(&mut f1);
    lock_for_write(&mut f1);
    f1.write_at(&data, 4096).unwrap();
    f1.confirm_commit().unwrap();
    unlock_for_write(&mut f1);

    // F2 snapshots it and records the revision it observed.
    lock_for_read(&mut f2);
    let mut ret = vec![0u8; SECTOR_SIZE];
    f2.read_at(&mut ret, 4096).unwrap();
    assert_eq!(ret, data);

    // F1 replaces the page under F2's snapshot.
    lock_for_write(&mut f1);
    f1.write_at(&modified, 4096).unwrap();
    f1.confirm_commit().unwrap();
    unlock_for_write(&mut f1);

    // F2's upgrade must detect the stale observation.
    let err = f2.lock(LockLevel::Reserved).unwrap_err();
    assert!(matches!(err, KvliteError::Busy));
    assert_eq!(err.error_code(), ErrorCode::Busy);

    // F2 stays a usable reader on its original snapshot.
    assert!(f2.check_reserved_lock().unwrap());
    let mut ret = vec![0u8; SECTOR_SIZE];
    f2.read_at(&mut ret, 4096).unwrap();
    assert_eq!(ret, data);

    // Dropping to none and re-snapshotting shows the new page.
    unlock_for_read(&mut f2);
    lock_for_read(&mut f2);
    f2.read_at(&mut ret, 4096).unwrap();
    assert_eq!(ret, modified);

    unlock_for_read(&mut f2);
    unlock_for_read(&mut f1);
    f1.close().unwrap();
    f2.close().unwrap();
}

#[test]
fn blocked_upgrade_goes_busy_after_the_writer_commits() {
    let vfs = make_vfs();
    let mut f1 = open_main(&vfs, "blocked.db");
    let mut f2 = open_main(&vfs, "blocked.db");

    let data = sector_with(b"Hello, World!");
    let modified = sector_with(b"Phantom Read!");

    lock_for_read(&mut f1);
    lock_for_write(&mut f1);
    f1.write_at(&data, 4096).unwrap();
    f1.confirm_commit().unwrap();
    unlock_for_write(&mut f1);

    // F1 re-arms a write transaction; F2's later upgrade will block on it.
    lock_for_write(&mut f1);

    let (observed_tx, observed_rx) = mpsc::channel();
    let expected = data.clone();
    let handle = thread::spawn(move || {
        lock_for_read(&mut f2);
        let mut ret = vec![0u8; SECTOR_SIZE];
        f2.read_at(&mut ret, 4096).unwrap();
        assert_eq!(ret, expected);
        observed_tx.send(()).unwrap();

        // Blocks on the writer token until F1 commits, then fails the
        // revalidation because F1 replaced the page.
        let err = f2.lock(LockLevel::Reserved).unwrap_err();
        assert!(matches!(err, KvliteError::Busy));

        unlock_for_read(&mut f2);
        f2.close().unwrap();
    });

    // Only replace the page after F2 has recorded its observation.
    observed_rx.recv().unwrap();
    f1.write_at(&modified, 4096).unwrap();
    f1.confirm_commit().unwrap();
    unlock_for_write(&mut f1);
    unlock_for_read(&mut f1);
    f1.close().unwrap();

    handle.join().unwrap();
}

#[test]
fn initial_file_size_is_one_sector() {
    let vfs = make_vfs();
    let mut file = open_main(&vfs, "size.db");

    lock_for_read(&mut file);
    #[allow(clippy::cast_possible_wrap)]
    let sector = SECTOR_SIZE as i64;
    assert_eq!(file.file_size().unwrap(), sector);

    unlock_for_read(&mut file);
    file.close().unwrap();
}

#[test]
fn committed_pages_survive_reopening() {
    let vfs = make_vfs();
    let data = sector_with(b"durable bytes");

    let mut file = open_main(&vfs, "durable.db");
    lock_for_read(&mut file);
    lock_for_write(&mut file);
    file.write_at(&data, 4096).unwrap();
    file.confirm_commit().unwrap();
    unlock_for_write(&mut file);
    unlock_for_read(&mut file);
    file.close().unwrap();

    // The registry entry was torn down with the last close; a fresh open
    // re-initializes the store from the same file.
    let mut file = open_main(&vfs, "durable.db");
    lock_for_read(&mut file);
    let mut ret = vec![0u8; SECTOR_SIZE];
    file.read_at(&mut ret, 4096).unwrap();
    assert_eq!(ret, data);
    unlock_for_read(&mut file);
    file.close().unwrap();
}
