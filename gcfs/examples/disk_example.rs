//! Build a small disk image, edit it and list the result.
//!
//! Run with an image path to list that image instead:
//! `cargo run --example disk_example -- game.iso`

use gcfs::builder::ImageBuilder;
use gcfs::disk::Disk;
use gcfs::tree::{ByteSource, EntryId, Tree};

fn list_children(tree: &Tree, dir: EntryId, depth: usize) -> Result<(), Box<dyn std::error::Error>> {
    let indent = "  ".repeat(depth + 1);
    for &child in tree.children(dir)? {
        let entry = tree.get(child)?;
        if entry.is_dir() {
            println!("{}{}/", indent, entry.name());
            list_children(tree, child, depth + 1)?;
        } else {
            println!("{}{} ({} bytes)", indent, entry.name(), entry.size());
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _scratch;
    let path = match std::env::args().nth(1) {
        Some(path) => path.into(),
        None => {
            _scratch = tempfile::tempdir()?;
            let path = _scratch.path().join("example.iso");
            ImageBuilder::new()
                .game_name("Example Disc")
                .file("readme.txt", b"hello".to_vec())
                .file("data/level1.bin", vec![1u8; 1000])
                .write_to(&path)?;

            let mut disk = Disk::open(&path)?;
            let data = disk.tree().resolve("/data")?;
            disk.tree_mut()
                .import_file(data, "level2.bin", ByteSource::Bytes(vec![2u8; 500]))?;
            let plan = disk.plan()?;
            println!(
                "Writing {} bytes, table at {:#x}",
                plan.bytes_to_write(),
                plan.fst_offset
            );
            disk.commit(&plan)?;
            path
        }
    };

    let disk = Disk::open(&path)?;
    let header = disk.header();
    println!("{} - {}", header.game_code, header.game_name);
    println!("{}", "=".repeat(40));
    let tree = disk.tree();
    list_children(tree, tree.root(), 0)?;
    Ok(())
}
