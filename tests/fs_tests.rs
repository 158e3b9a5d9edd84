//! End-to-end facade tests over a real data directory.

use pagevault::{
    Errno, VaultFs, ENCRYPTED_PAGE_SIZE, FILE_HEADER_SIZE, PAGE_SIZE, SALT_SIZE, O_APPEND,
    O_CREAT, O_EXCL, O_RDWR, O_TRUNC, O_WRONLY,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn vault() -> (TempDir, VaultFs) {
    let dir = TempDir::new().unwrap();
    let fs = VaultFs::mount(dir.path(), "test-passphrase").unwrap();
    (dir, fs)
}

fn physical_len(dir: &TempDir, name: &str) -> u64 {
    fs::metadata(dir.path().join(name)).unwrap().len()
}

fn assert_whole_pages(dir: &TempDir, name: &str, pages: u64) {
    assert_eq!(
        physical_len(dir, name),
        (FILE_HEADER_SIZE + pages as usize * ENCRYPTED_PAGE_SIZE) as u64
    );
}

#[test]
fn single_byte_write_costs_one_page() {
    let (dir, mut fs) = vault();

    let fd = fs.open("/a", O_WRONLY | O_CREAT).unwrap();
    assert_eq!(fs.write(fd, &[0x42], Some(0)).unwrap(), 1);
    fs.close(fd).unwrap();

    assert_whole_pages(&dir, "a", 1);
    assert_eq!(physical_len(&dir, "a"), 8268);
    assert_eq!(fs.lstat("/a").unwrap().size, 8192);
}

#[test]
fn truncate_to_zero_keeps_the_header() {
    let (dir, mut fs) = vault();

    let fd = fs.open("/a", O_WRONLY | O_CREAT).unwrap();
    fs.write(fd, &vec![0x42u8; 8193], Some(0)).unwrap();
    fs.close(fd).unwrap();
    assert_whole_pages(&dir, "a", 2);

    fs.truncate("/a", 0).unwrap();
    assert_eq!(physical_len(&dir, "a"), 48);
    assert_eq!(fs.lstat("/a").unwrap().size, 0);
}

#[test]
fn truncate_extension_reads_back_zeros() {
    let (_dir, mut fs) = vault();

    let fd = fs.open("/a", O_WRONLY | O_CREAT).unwrap();
    fs.write(fd, &vec![0xAAu8; PAGE_SIZE], Some(0)).unwrap();
    fs.close(fd).unwrap();

    fs.truncate("/a", 24576).unwrap();
    assert_eq!(fs.lstat("/a").unwrap().size, 24576);

    let fd = fs.open("/a", 0).unwrap();
    let mut buf = vec![0xFFu8; 24576];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 24576);
    assert!(buf[..PAGE_SIZE].iter().all(|&b| b == 0xAA));
    assert!(buf[PAGE_SIZE..].iter().all(|&b| b == 0x00));
    fs.close(fd).unwrap();
}

#[test]
fn reserved_conf_files_are_stored_verbatim() {
    let (dir, mut fs) = vault();

    fs.write_file("/postgresql.conf", b"max_connections = 100")
        .unwrap();

    let on_disk = fs::read(dir.path().join("postgresql.conf")).unwrap();
    assert_eq!(on_disk, b"max_connections = 100");
    assert_eq!(fs.lstat("/postgresql.conf").unwrap().size, 21);
}

#[test]
fn tampered_ciphertext_surfaces_as_eio_naming_the_page() {
    let (dir, mut fs) = vault();

    fs.write_file("/table", &vec![0x42u8; PAGE_SIZE]).unwrap();

    // Flip one byte inside the ciphertext region of the first page.
    let host = dir.path().join("table");
    let mut bytes = fs::read(&host).unwrap();
    bytes[FILE_HEADER_SIZE + 28 + 100] ^= 0xFF;
    fs::write(&host, &bytes).unwrap();

    let fd = fs.open("/table", 0).unwrap();
    let mut buf = vec![0u8; 64];
    let err = fs.read(fd, &mut buf, Some(0)).unwrap_err();
    assert_eq!(err.errno(), Errno::EIO);
    assert!(err.to_string().contains("page 0"));
    fs.close(fd).unwrap();
}

#[test]
fn physical_size_is_always_header_plus_whole_pages() {
    let (dir, mut fs) = vault();

    let fd = fs.open("/grows", O_RDWR | O_CREAT).unwrap();
    assert_whole_pages(&dir, "grows", 0);

    for (len, pages) in [(1usize, 1u64), (8191, 1), (8192, 1), (8193, 2), (30000, 4)] {
        fs.write(fd, &vec![0x11u8; len], Some(0)).unwrap();
        assert_whole_pages(&dir, "grows", pages);
    }
    fs.close(fd).unwrap();

    // Growth never shrinks back on smaller writes; truncate does.
    fs.truncate("/grows", 8192).unwrap();
    assert_whole_pages(&dir, "grows", 1);
}

#[test]
fn partial_writes_preserve_surrounding_bytes() {
    let (_dir, mut fs) = vault();

    let mut model = vec![0x11u8; 3 * PAGE_SIZE];
    let fd = fs.open("/a", O_RDWR | O_CREAT).unwrap();
    fs.write(fd, &model, Some(0)).unwrap();

    // A window crossing the first page boundary.
    fs.write(fd, &vec![0x22u8; 500], Some(8000)).unwrap();
    model[8000..8500].fill(0x22);

    // A window inside the last page.
    fs.write(fd, &vec![0x33u8; 7], Some(2 * PAGE_SIZE as u64 + 19))
        .unwrap();
    let start = 2 * PAGE_SIZE + 19;
    model[start..start + 7].fill(0x33);

    let mut buf = vec![0u8; 3 * PAGE_SIZE];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 3 * PAGE_SIZE);
    assert_eq!(buf, model);
    fs.close(fd).unwrap();
}

#[test]
fn writes_past_eof_zero_fill_intervening_pages() {
    let (_dir, mut fs) = vault();

    let fd = fs.open("/sparse", O_RDWR | O_CREAT).unwrap();
    fs.write(fd, &[0xCC; 4], Some(3 * PAGE_SIZE as u64)).unwrap();
    assert_eq!(fs.fstat(fd).unwrap().size, 4 * PAGE_SIZE as u64);

    let mut buf = vec![0xFFu8; 3 * PAGE_SIZE];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 3 * PAGE_SIZE);
    assert!(buf.iter().all(|&b| b == 0));
    fs.close(fd).unwrap();
}

#[test]
fn reads_clamp_at_logical_eof() {
    let (_dir, mut fs) = vault();

    let fd = fs.open("/a", O_RDWR | O_CREAT).unwrap();
    fs.write(fd, &vec![0x42u8; PAGE_SIZE], Some(0)).unwrap();

    let mut buf = vec![0u8; 1000];
    assert_eq!(fs.read(fd, &mut buf, Some(8000)).unwrap(), 192);
    assert!(buf[..192].iter().all(|&b| b == 0x42));

    assert_eq!(fs.read(fd, &mut buf, Some(PAGE_SIZE as u64)).unwrap(), 0);
    assert_eq!(fs.read(fd, &mut buf, Some(10 * PAGE_SIZE as u64)).unwrap(), 0);
    fs.close(fd).unwrap();
}

#[test]
fn positions_advance_across_reads_and_writes() {
    let (_dir, mut fs) = vault();

    let fd = fs.open("/seq", O_RDWR | O_CREAT).unwrap();
    fs.write(fd, b"abcdef", Some(0)).unwrap();

    let mut buf = [0u8; 3];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 3);
    assert_eq!(&buf, b"abc");
    // Positioned reads advance the cursor too.
    assert_eq!(fs.read(fd, &mut buf, None).unwrap(), 3);
    assert_eq!(&buf, b"def");
    fs.close(fd).unwrap();
}

#[test]
fn append_mode_positions_at_the_logical_end() {
    let (_dir, mut fs) = vault();

    // Encrypted: logical size is page-granular, so each append lands on a
    // fresh page boundary.
    let fd = fs.open("/enc", O_WRONLY | O_CREAT | O_APPEND).unwrap();
    fs.write(fd, b"A", None).unwrap();
    fs.write(fd, b"B", None).unwrap();
    fs.close(fd).unwrap();

    let fd = fs.open("/enc", 0).unwrap();
    let mut buf = [0u8; 1];
    fs.read(fd, &mut buf, Some(0)).unwrap();
    assert_eq!(buf[0], b'A');
    fs.read(fd, &mut buf, Some(PAGE_SIZE as u64)).unwrap();
    assert_eq!(buf[0], b'B');
    fs.close(fd).unwrap();

    // Plaintext: byte-granular append.
    let fd = fs
        .open("/notes.conf", O_WRONLY | O_CREAT | O_APPEND)
        .unwrap();
    fs.write(fd, b"one", None).unwrap();
    fs.write(fd, b"two", None).unwrap();
    fs.close(fd).unwrap();

    let fd = fs.open("/notes.conf", 0).unwrap();
    let mut buf = [0u8; 6];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 6);
    assert_eq!(&buf, b"onetwo");
    fs.close(fd).unwrap();
}

#[test]
fn open_trunc_discards_previous_pages() {
    let (dir, mut fs) = vault();

    fs.write_file("/t", &vec![0x42u8; 2 * PAGE_SIZE]).unwrap();
    let old_header = fs::read(dir.path().join("t")).unwrap()[..FILE_HEADER_SIZE].to_vec();

    let fd = fs.open("/t", O_RDWR | O_TRUNC).unwrap();
    assert_eq!(fs.fstat(fd).unwrap().size, 0);
    fs.close(fd).unwrap();

    assert_whole_pages(&dir, "t", 0);
    // Truncating re-keys the page binding: a fresh file id is written.
    let new_header = fs::read(dir.path().join("t")).unwrap();
    assert_eq!(new_header.len(), FILE_HEADER_SIZE);
    assert_eq!(new_header[..SALT_SIZE], old_header[..SALT_SIZE]);
    assert_ne!(new_header[SALT_SIZE..], old_header[SALT_SIZE..]);
}

#[test]
fn rename_preserves_file_id_and_content() {
    let (dir, mut fs) = vault();

    fs.write_file("/before", b"stable identity").unwrap();
    let header = fs::read(dir.path().join("before")).unwrap()[..FILE_HEADER_SIZE].to_vec();

    fs.rename("/before", "/after").unwrap();
    assert!(!fs.exists("/before").unwrap());

    let moved = fs::read(dir.path().join("after")).unwrap();
    assert_eq!(&moved[..FILE_HEADER_SIZE], &header[..]);

    let fd = fs.open("/after", 0).unwrap();
    let mut buf = vec![0u8; 15];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 15);
    assert_eq!(&buf, b"stable identity");
    fs.close(fd).unwrap();
}

#[test]
fn per_file_header_salt_matches_the_token_salt() {
    let (dir, mut fs) = vault();

    fs.write_file("/one", b"x").unwrap();
    fs.write_file("/two", b"y").unwrap();

    let token = fs::read(dir.path().join(".encryption-verify")).unwrap();
    for name in ["one", "two"] {
        let header = fs::read(dir.path().join(name)).unwrap();
        assert_eq!(&header[..SALT_SIZE], &token[..SALT_SIZE]);
    }
}

#[test]
fn stat_reports_host_fields_and_whole_seconds() {
    let (_dir, mut fs) = vault();

    fs.write_file("/f", b"data").unwrap();
    fs.utimes("/f", 1_700_000_000_123, 1_700_000_001_456).unwrap();

    let stat = fs.lstat("/f").unwrap();
    assert!(stat.is_file());
    assert_eq!(stat.atime, 1_700_000_000);
    assert_eq!(stat.mtime, 1_700_000_001);
    assert!(stat.nlink >= 1);
    assert!(stat.blksize > 0);
}

#[test]
fn chmod_changes_permissions() {
    let (dir, mut fs) = vault();

    fs.write_file("/locked", b"x").unwrap();
    fs.chmod("/locked", 0o600).unwrap();

    use std::os::unix::fs::MetadataExt;
    let mode = fs::metadata(dir.path().join("locked")).unwrap().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn directory_lifecycle() {
    let (_dir, mut fs) = vault();

    fs.mkdir("/base", Some(0o755)).unwrap();
    fs.mkdir("/base/wal", None).unwrap();
    fs.write_file("/base/wal/0001", b"segment").unwrap();

    let mut names = fs.readdir("/base").unwrap();
    names.sort();
    assert_eq!(names, ["wal"]);
    assert_eq!(fs.readdir("/base/wal").unwrap(), ["0001"]);

    assert_eq!(
        fs.rmdir("/base/wal").unwrap_err().errno(),
        Errno::ENOTEMPTY
    );
    fs.unlink("/base/wal/0001").unwrap();
    fs.rmdir("/base/wal").unwrap();
    fs.rmdir("/base").unwrap();
    assert!(!fs.exists("/base").unwrap());
}

#[test]
fn missing_paths_surface_enoent() {
    let (_dir, mut fs) = vault();

    assert_eq!(fs.open("/nope", 0).unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(fs.lstat("/nope").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(fs.unlink("/nope").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(fs.truncate("/nope", 0).unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(fs.readdir("/nope").unwrap_err().errno(), Errno::ENOENT);
}

#[test]
fn readdir_of_a_file_is_enotdir() {
    let (_dir, mut fs) = vault();
    fs.write_file("/f", b"x").unwrap();
    assert_eq!(fs.readdir("/f").unwrap_err().errno(), Errno::ENOTDIR);
}

#[test]
fn exclusive_create_of_an_existing_file_is_eexist() {
    let (_dir, mut fs) = vault();
    fs.write_file("/f", b"x").unwrap();
    let err = fs.open("/f", O_RDWR | O_CREAT | O_EXCL).unwrap_err();
    assert_eq!(err.errno(), Errno::EEXIST);
}

#[test]
fn instances_share_no_state() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut fs_a = VaultFs::mount(dir_a.path(), "a").unwrap();
    let mut fs_b = VaultFs::mount(dir_b.path(), "b").unwrap();

    let fd_a = fs_a.open("/f", O_RDWR | O_CREAT).unwrap();
    let fd_b = fs_b.open("/f", O_RDWR | O_CREAT).unwrap();
    // Fresh instances hand out the same first descriptor: the counters are
    // instance-scoped, not process-global.
    assert_eq!(fd_a, fd_b);

    fs_a.write(fd_a, b"alpha", Some(0)).unwrap();
    fs_b.write(fd_b, b"bravo", Some(0)).unwrap();

    let mut buf = [0u8; 5];
    fs_a.read(fd_a, &mut buf, Some(0)).unwrap();
    assert_eq!(&buf, b"alpha");
    fs_b.read(fd_b, &mut buf, Some(0)).unwrap();
    assert_eq!(&buf, b"bravo");
}

#[test]
fn reopen_after_remount_reads_identical_bytes() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..3 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();

    {
        let mut fs = VaultFs::mount(dir.path(), "persist").unwrap();
        fs.write_file("/data", &payload).unwrap();
        fs.destroy();
    }

    let mut fs = VaultFs::mount(dir.path(), "persist").unwrap();
    let fd = fs.open("/data", 0).unwrap();
    let mut buf = vec![0u8; 3 * PAGE_SIZE];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 3 * PAGE_SIZE);
    assert_eq!(buf, payload);
    fs.close(fd).unwrap();
}

#[test]
fn large_random_payload_roundtrips() {
    use rand::{Rng, SeedableRng};

    let (_dir, mut fs) = vault();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut payload = vec![0u8; 10 * PAGE_SIZE + 137];
    rng.fill(payload.as_mut_slice());

    fs.write_file("/blob", &payload).unwrap();

    let fd = fs.open("/blob", 0).unwrap();
    // Read back in odd-sized chunks spanning page boundaries.
    let mut assembled = Vec::new();
    let mut chunk = vec![0u8; 5000];
    loop {
        let n = fs.read(fd, &mut chunk, None).unwrap();
        if n == 0 {
            break;
        }
        assembled.extend_from_slice(&chunk[..n]);
    }
    fs.close(fd).unwrap();

    assert_eq!(assembled.len(), 11 * PAGE_SIZE);
    assert_eq!(&assembled[..payload.len()], &payload[..]);
    assert!(assembled[payload.len()..].iter().all(|&b| b == 0));
}

#[test]
fn host_bytes_of_encrypted_files_do_not_leak_plaintext() {
    let (dir, mut fs) = vault();

    let needle = b"finding this would be bad";
    let mut payload = vec![0u8; PAGE_SIZE];
    payload[100..100 + needle.len()].copy_from_slice(needle);
    fs.write_file("/secret", &payload).unwrap();

    let on_disk = fs::read(dir.path().join("secret")).unwrap();
    assert!(!on_disk
        .windows(needle.len())
        .any(|window| window == needle));
}

fn walk(dir: &Path, out: &mut Vec<std::path::PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_type().unwrap().is_dir() {
            walk(&entry.path(), out);
        } else {
            out.push(entry.path());
        }
    }
}

#[test]
fn every_encrypted_file_on_disk_satisfies_the_size_invariant() {
    let (dir, mut fs) = vault();

    fs.mkdir("/base", None).unwrap();
    fs.write_file("/base/1", &vec![1u8; 100]).unwrap();
    fs.write_file("/base/2", &vec![2u8; PAGE_SIZE]).unwrap();
    fs.write_file("/base/3", &vec![3u8; 2 * PAGE_SIZE + 5]).unwrap();
    fs.write_file("/pg.conf", b"plain").unwrap();
    fs.truncate("/base/3", PAGE_SIZE as u64).unwrap();

    let mut files = Vec::new();
    walk(dir.path(), &mut files);
    for path in files {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name == ".encryption-verify" || !pagevault_is_encrypted(&name) {
            continue;
        }
        let len = fs::metadata(&path).unwrap().len() as usize;
        assert!(
            len == 0 || (len - FILE_HEADER_SIZE) % ENCRYPTED_PAGE_SIZE == 0,
            "{name} has physical size {len}"
        );
    }
}

// Mirror of the crate's reserved-name policy, kept here so the invariant
// sweep does not depend on crate internals.
fn pagevault_is_encrypted(name: &str) -> bool {
    !(name.ends_with(".conf")
        || name.ends_with(".pid")
        || name.contains("PG_VERSION")
        || name.contains("pg_internal.init")
        || name.contains("postmaster")
        || name.contains(".lock")
        || name.contains("replorigin_checkpoint"))
}
