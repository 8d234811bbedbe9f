use gcfs::binary::align_up;
use gcfs::builder::ImageBuilder;
use gcfs::config::Config;
use gcfs::disk::Disk;
use gcfs::error::{Error, Result};
use gcfs::header::{FST_POINTER_OFFSET, FULL_DISC_SIZE, HEADER_SIZE};
use gcfs::session::SharedDisk;
use gcfs::store::ImageStore;
use gcfs::tree::ByteSource;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::{tempdir, TempDir};

fn sample() -> ImageBuilder {
    ImageBuilder::new()
        .file("readme.txt", b"read me".to_vec())
        .file("big.bin", vec![0xABu8; 0x4000])
        .file("data/level1.bin", vec![1u8; 300])
        .file("data/level2.bin", vec![2u8; 500])
}

fn image(builder: ImageBuilder) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("disc.iso");
    builder.write_to(&path).unwrap();
    (dir, path)
}

fn read(disk: &Disk, path: &str) -> Vec<u8> {
    disk.read_file(disk.tree().resolve(path).unwrap()).unwrap()
}

fn paths(disk: &Disk) -> Vec<String> {
    let tree = disk.tree();
    tree.walk()
        .into_iter()
        .map(|id| tree.path(id).unwrap())
        .collect()
}

/// A file-backed store whose writes start failing once `fail` says so.
struct FailingStore {
    file: File,
    writes: AtomicUsize,
    fail: Box<dyn Fn(usize, u64) -> bool + Send + Sync>,
}

impl FailingStore {
    fn open<F>(path: &Path, fail: F) -> FailingStore
    where
        F: Fn(usize, u64) -> bool + Send + Sync + 'static,
    {
        FailingStore {
            file: OpenOptions::new().read(true).write(true).open(path).unwrap(),
            writes: AtomicUsize::new(0),
            fail: Box::new(fail),
        }
    }
}

impl ImageStore for FailingStore {
    fn len(&self) -> Result<u64> {
        ImageStore::len(&self.file)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        ImageStore::read_at(&self.file, buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if (self.fail)(n, offset) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected failure").into());
        }
        ImageStore::write_at(&self.file, buf, offset)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        ImageStore::set_len(&self.file, len)
    }

    fn sync(&self) -> Result<()> {
        ImageStore::sync(&self.file)
    }
}

#[test]
fn test_import_lands_after_new_table() {
    let (_dir, path) = image(ImageBuilder::new().file("readme.txt", b"read me".to_vec()));
    let mut disk = Disk::open(&path).unwrap();
    let root = disk.tree().root();
    disk.tree_mut()
        .import_file(root, "a.txt", ByteSource::Bytes(b"hello".to_vec()))
        .unwrap();
    let plan = disk.plan().unwrap();
    disk.commit(&plan).unwrap();

    let reopened = Disk::open(&path).unwrap();
    let header = reopened.header();
    let a = reopened.tree().resolve("/a.txt").unwrap();
    let entry = reopened.tree().get(a).unwrap();
    assert_eq!(entry.size(), 5);
    assert_eq!(
        entry.offset(),
        Some(align_up(u64::from(header.fst_offset) + u64::from(header.fst_size), 4))
    );
    assert_eq!(read(&reopened, "/a.txt"), b"hello");
    assert_eq!(read(&reopened, "/readme.txt"), b"read me");
}

#[test]
fn test_mutations_survive_reopen() {
    let (_dir, path) = image(sample());
    let mut disk = Disk::open(&path).unwrap();
    let tree = disk.tree_mut();
    let root = tree.root();
    let data = tree.resolve("/data").unwrap();
    let saves = tree.create_directory(root, "saves").unwrap();
    let level1 = tree.resolve("/data/level1.bin").unwrap();
    tree.rename(level1, "first.bin").unwrap();
    let readme = tree.resolve("/readme.txt").unwrap();
    tree.move_to(readme, data).unwrap();
    let level2 = tree.resolve("/data/level2.bin").unwrap();
    tree.replace_file(level2, ByteSource::Bytes(vec![7u8; 900]))
        .unwrap();
    let big = tree.resolve("/big.bin").unwrap();
    tree.copy_to(big, saves).unwrap();
    tree.delete(big).unwrap();
    assert!(tree.is_dirty());

    let plan = disk.plan().unwrap();
    disk.commit(&plan).unwrap();
    assert!(!disk.tree().is_dirty());

    let reopened = Disk::open(&path).unwrap();
    assert_eq!(
        paths(&reopened),
        [
            "/",
            "/data",
            "/data/first.bin",
            "/data/level2.bin",
            "/data/readme.txt",
            "/saves",
            "/saves/big.bin",
        ]
    );
    assert_eq!(read(&reopened, "/data/first.bin"), vec![1u8; 300]);
    assert_eq!(read(&reopened, "/data/level2.bin"), vec![7u8; 900]);
    assert_eq!(read(&reopened, "/data/readme.txt"), b"read me");
    assert_eq!(read(&reopened, "/saves/big.bin"), vec![0xABu8; 0x4000]);
}

#[test]
fn test_failure_before_commit_point_keeps_old_tree() {
    let (_dir, path) = image(sample());
    let original = fs::read(&path).unwrap();
    let store = FailingStore::open(&path, |n, _| n == 0);
    let mut disk = Disk::from_store(Box::new(store), Config::default()).unwrap();
    let before = paths(&disk);

    let root = disk.tree().root();
    disk.tree_mut()
        .import_file(root, "huge.bin", ByteSource::Bytes(vec![3u8; 0x10000]))
        .unwrap();
    let plan = disk.plan().unwrap();
    assert!(plan.total_size > original.len() as u64);
    assert!(matches!(disk.commit(&plan), Err(Error::Io { .. })));

    assert_eq!(fs::metadata(&path).unwrap().len(), original.len() as u64);
    assert_eq!(fs::read(&path).unwrap()[..HEADER_SIZE], original[..HEADER_SIZE]);
    let reopened = Disk::open(&path).unwrap();
    assert_eq!(paths(&reopened), before);
    assert_eq!(read(&reopened, "/big.bin"), vec![0xABu8; 0x4000]);
}

#[test]
fn test_failed_pointer_write_keeps_old_tree() {
    let (_dir, path) = image(sample());
    let original_len = fs::metadata(&path).unwrap().len();
    let store = FailingStore::open(&path, |_, offset| offset == FST_POINTER_OFFSET);
    let mut disk = Disk::from_store(Box::new(store), Config::default()).unwrap();
    let before = paths(&disk);

    let readme = disk.tree().resolve("/readme.txt").unwrap();
    disk.tree_mut().rename(readme, "renamed.txt").unwrap();
    let root = disk.tree().root();
    disk.tree_mut()
        .import_file(root, "huge.bin", ByteSource::Bytes(vec![3u8; 0x10000]))
        .unwrap();
    let plan = disk.plan().unwrap();
    assert!(plan.total_size > original_len);
    assert!(matches!(disk.commit(&plan), Err(Error::Io { .. })));
    assert_eq!(fs::metadata(&path).unwrap().len(), original_len);

    let reopened = Disk::open(&path).unwrap();
    assert_eq!(paths(&reopened), before);
    assert_eq!(read(&reopened, "/readme.txt"), b"read me");
}

#[test]
fn test_cancelled_commit() {
    let (_dir, path) = image(sample());
    let original = fs::read(&path).unwrap();
    let mut disk = Disk::open(&path).unwrap();
    let root = disk.tree().root();
    disk.tree_mut()
        .import_file(root, "huge.bin", ByteSource::Bytes(vec![3u8; 0x10000]))
        .unwrap();
    let plan = disk.plan().unwrap();

    let token = disk.cancel_token();
    token.cancel();
    assert!(matches!(disk.commit(&plan), Err(Error::Cancelled)));
    assert!(!token.is_cancelled());
    assert_eq!(fs::read(&path).unwrap(), original);
    assert!(disk.tree().resolve("/huge.bin").is_ok());

    let config = Config {
        block_size: 0x1000,
        ..Config::default()
    };
    drop(disk);
    let mut disk = Disk::open_with_config(&path, config).unwrap();
    let progress = disk.progress();
    let cancel = disk.cancel_token();
    progress.set_listener(move |snapshot| {
        if snapshot.bytes_done > 0 {
            cancel.cancel();
        }
    });
    let root = disk.tree().root();
    disk.tree_mut()
        .import_file(root, "huge.bin", ByteSource::Bytes(vec![3u8; 0x10000]))
        .unwrap();
    let plan = disk.plan().unwrap();
    assert!(matches!(disk.commit(&plan), Err(Error::Cancelled)));
    assert!(progress.snapshot().bytes_done < plan.bytes_to_write());
    assert_eq!(fs::metadata(&path).unwrap().len(), original.len() as u64);
    assert!(Disk::open(&path).unwrap().tree().resolve("/huge.bin").is_err());

    progress.clear_listener();
    disk.commit(&plan).unwrap();
    let snapshot = progress.snapshot();
    assert_eq!(snapshot.bytes_done, snapshot.bytes_total);
    assert_eq!(read(&disk, "/huge.bin"), vec![3u8; 0x10000]);
}

#[test]
fn test_staged_commit_leaves_source_untouched() {
    let (dir, path) = image(sample());
    let original = fs::read(&path).unwrap();
    let target = dir.path().join("copy.iso");

    let mut disk = Disk::open(&path).unwrap();
    let data = disk.tree().resolve("/data").unwrap();
    disk.tree_mut()
        .import_file(data, "new.bin", ByteSource::Bytes(vec![4u8; 64]))
        .unwrap();
    let plan = disk.plan_repack().unwrap();
    assert!(!plan.in_place);
    disk.commit_to(&plan, &target).unwrap();

    assert_eq!(fs::read(&path).unwrap(), original);
    assert_eq!(disk.path(), Some(target.as_path()));
    assert_eq!(read(&disk, "/data/new.bin"), vec![4u8; 64]);

    let copy = Disk::open(&target).unwrap();
    assert_eq!(read(&copy, "/big.bin"), vec![0xABu8; 0x4000]);
    assert_eq!(read(&copy, "/data/new.bin"), vec![4u8; 64]);
    assert_eq!(copy.read_system_file("main.dol").unwrap().len(), 0x120);
}

#[test]
fn test_staged_copy_of_clean_tree_is_identical() {
    let (dir, path) = image(sample());
    let target = dir.path().join("copy.iso");
    let mut disk = Disk::open(&path).unwrap();
    let plan = disk.plan().unwrap();
    disk.commit_to(&plan, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), fs::read(&path).unwrap());
}

#[test]
fn test_commit_without_path_needs_in_place_plan() {
    let (_dir, path) = image(sample());
    let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let mut disk = Disk::from_store(Box::new(file), Config::default()).unwrap();
    let root = disk.tree().root();
    disk.tree_mut().create_directory(root, "x").unwrap();
    let plan = disk.plan_repack().unwrap();
    assert!(matches!(disk.commit(&plan), Err(Error::InvalidOperation(_))));
}

#[test]
fn test_capacity_is_checked_before_writing() {
    let (_dir, path) = image(sample());
    let original = fs::read(&path).unwrap();
    let config = Config {
        max_image_size: original.len() as u64 + 0x100,
        ..Config::default()
    };
    let mut disk = Disk::open_with_config(&path, config).unwrap();
    let root = disk.tree().root();
    disk.tree_mut()
        .import_file(root, "huge.bin", ByteSource::Bytes(vec![3u8; 0x10000]))
        .unwrap();
    assert!(matches!(disk.plan(), Err(Error::Capacity { .. })));
    assert_eq!(fs::read(&path).unwrap(), original);
}

#[test]
fn test_compact_removes_gaps() {
    let (_dir, path) = image(sample());
    let mut disk = Disk::open(&path).unwrap();
    let big = disk.tree().resolve("/big.bin").unwrap();
    disk.tree_mut().delete(big).unwrap();
    let plan = disk.plan().unwrap();
    disk.commit(&plan).unwrap();
    let before = fs::metadata(&path).unwrap().len();

    disk.compact().unwrap();
    let after = fs::metadata(&path).unwrap().len();
    assert!(after + 0x4000 <= before, "{after} vs {before}");
    assert_eq!(disk.image_len().unwrap(), after);

    let reopened = Disk::open(&path).unwrap();
    assert_eq!(
        paths(&reopened),
        ["/", "/data", "/data/level1.bin", "/data/level2.bin", "/readme.txt"]
    );
    assert_eq!(read(&reopened, "/data/level2.bin"), vec![2u8; 500]);
}

#[test]
fn test_pad_to_full_size() {
    let (_dir, path) = image(sample());
    let mut disk = Disk::open(&path).unwrap();
    disk.pad_to_full_size().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), FULL_DISC_SIZE);
    assert_eq!(disk.layout().image_len, FULL_DISC_SIZE);
    assert_eq!(read(&Disk::open(&path).unwrap(), "/readme.txt"), b"read me");
}

#[test]
fn test_plan_made_before_padding_is_stale() {
    let (_dir, path) = image(sample());
    let mut disk = Disk::open(&path).unwrap();
    let root = disk.tree().root();
    disk.tree_mut().create_directory(root, "saves").unwrap();
    let plan = disk.plan().unwrap();

    disk.pad_to_full_size().unwrap();
    assert!(matches!(disk.commit(&plan), Err(Error::StalePlan)));
    assert_eq!(fs::metadata(&path).unwrap().len(), FULL_DISC_SIZE);

    let plan = disk.plan().unwrap();
    disk.commit(&plan).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), FULL_DISC_SIZE);
    assert!(Disk::open(&path).unwrap().tree().resolve("/saves").is_ok());
}

#[test]
fn test_host_file_resized_after_import() {
    let (dir, path) = image(sample());
    let original_len = fs::metadata(&path).unwrap().len();
    let host = dir.path().join("patch.bin");
    fs::write(&host, vec![5u8; 100]).unwrap();

    let mut disk = Disk::open(&path).unwrap();
    let root = disk.tree().root();
    disk.tree_mut()
        .import_file(root, "patch.bin", ByteSource::Path(host.clone()))
        .unwrap();
    fs::write(&host, vec![5u8; 200]).unwrap();
    let plan = disk.plan().unwrap();
    assert!(matches!(disk.commit(&plan), Err(Error::InvalidOperation(_))));
    assert_eq!(fs::metadata(&path).unwrap().len(), original_len);
    assert!(Disk::open(&path).unwrap().tree().resolve("/patch.bin").is_err());
}

#[test]
fn test_pad_compacts_oversized_images() {
    let (_dir, path) = image(sample());
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(FULL_DISC_SIZE + 0x10000).unwrap();
    drop(file);

    let mut disk = Disk::open(&path).unwrap();
    disk.pad_to_full_size().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), FULL_DISC_SIZE);
    assert_eq!(read(&disk, "/big.bin"), vec![0xABu8; 0x4000]);
}

#[test]
fn test_shared_disk_rejects_edits_while_reading() {
    let (_dir, path) = image(sample());
    let shared = SharedDisk::new(Disk::open(&path).unwrap());
    let result = shared.read(|_| shared.try_edit(|tree| tree.create_directory(tree.root(), "x")));
    assert!(matches!(result, Err(Error::Busy)));

    shared
        .edit(|tree| tree.create_directory(tree.root(), "x"))
        .unwrap();
    shared.commit().unwrap();
    let disk = shared.into_inner().unwrap();
    assert!(disk.tree().resolve("/x").is_ok());
    assert!(Disk::open(&path).unwrap().tree().resolve("/x").is_ok());
}

#[test]
fn test_shared_disk_edit_is_one_transaction() {
    let (_dir, path) = image(sample());
    let shared = SharedDisk::new(Disk::open(&path).unwrap());
    let result = shared.edit(|tree| {
        let root = tree.root();
        tree.create_directory(root, "first")?;
        tree.create_directory(root, "readme.txt")
    });
    assert!(matches!(result, Err(Error::Conflict { .. })));
    shared
        .read(|disk| {
            assert!(disk.tree().resolve("/first").is_err());
            assert!(!disk.tree().is_dirty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_shared_disk_concurrent_readers() {
    let (_dir, path) = image(sample());
    let shared = Arc::new(SharedDisk::new(Disk::open(&path).unwrap()));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || {
                shared
                    .read(|disk| Ok(read(disk, "/data/level2.bin")))
                    .unwrap()
            })
        })
        .collect();
    shared
        .edit(|tree| {
            let root = tree.root();
            tree.import_file(root, "late.bin", ByteSource::Bytes(vec![1, 2, 3]))
        })
        .unwrap();
    shared.commit().unwrap();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), vec![2u8; 500]);
    }
    shared
        .read(|disk| {
            assert_eq!(read(disk, "/late.bin"), [1, 2, 3]);
            Ok(())
        })
        .unwrap();
}
