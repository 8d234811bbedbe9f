use crate::error::Result;
use crate::utils;

use gcfs::disk::Disk;

pub fn show(disk: &Disk, json: bool) -> Result<()> {
    let info = disk.info()?;
    if json {
        return utils::print_json(&info);
    }
    println!("Disk\n----");
    println!("Game code: {} (maker {})", info.game_code, info.maker_code);
    println!("Game name: {}", info.game_name);
    println!("Disc number: {}, version: {}", info.disc_number, info.version);
    println!("Apploader: {}", info.apploader_version);
    println!(
        "Filesystem: {} files in {} directories, {} bytes",
        info.files, info.directories, info.total_file_size
    );
    println!(
        "Table: {:#x} ({} bytes), image size: {} bytes",
        info.fst_offset, info.fst_size, info.image_size
    );
    for entry in &info.banners {
        println!("\nBanner {} (BNR{})", entry.file, entry.banner.version);
        for block in &entry.banner.info {
            println!("   - name: {} ({})", block.short_name, block.long_name);
            println!("   - developer: {} ({})", block.short_developer, block.long_developer);
            println!("   - description: {}", block.description);
        }
    }
    Ok(())
}
