#[macro_use]
extern crate log;

mod logging;
#[cfg(test)]
mod tests;

use clap::{App, Arg};
use fat32_fs::{
    fat32::time::set_clock, register_block_device, unregister_block_device, BlockDevice, Fat32FS,
    FormatOptions, FsError, InodeType, BLOCK_SZ,
};
use std::fs::{read_dir, File, OpenOptions};
use std::path::Path;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

struct BlockFile(Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SZ) as u64))
            .expect("Error when seeking!");
        assert_eq!(file.read(buf).unwrap(), BLOCK_SZ, "Not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SZ) as u64))
            .expect("Error when seeking!");
        assert_eq!(file.write(buf).unwrap(), BLOCK_SZ, "Not a complete block!");
    }
}

fn host_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn fs_error(err: FsError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn main() {
    logging::init();
    set_clock(host_clock);
    fs_pack().expect("Error when packing fat32 image");
}

fn fs_pack() -> io::Result<()> {
    let matches = App::new("Fat32FileSystem packer")
        .arg(
            Arg::with_name("source")
                .short("s")
                .long("source")
                .takes_value(true)
                .help("Directory whose files are copied into the image root (with backslash)"),
        )
        .arg(
            Arg::with_name("target")
                .short("t")
                .long("target")
                .takes_value(true)
                .default_value("./")
                .help("Directory the image is written to (with backslash)"),
        )
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .default_value("fs.img")
                .help("Image file name"),
        )
        .arg(
            Arg::with_name("size")
                .long("size")
                .takes_value(true)
                .default_value("32")
                .help("Image size in MiB"),
        )
        .arg(
            Arg::with_name("cluster")
                .long("cluster")
                .takes_value(true)
                .default_value("8")
                .help("Sectors per cluster"),
        )
        .arg(
            Arg::with_name("list")
                .long("list")
                .help("List the root directory of an existing image instead of packing"),
        )
        .get_matches();

    let image = format!(
        "{}{}",
        matches.value_of("target").unwrap_or("./"),
        matches.value_of("image").unwrap_or("fs.img")
    );
    if matches.is_present("list") {
        return list_image(&image);
    }
    let src = matches
        .value_of("source")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "--source is required"))?;
    let parse = |name: &str| -> io::Result<u32> {
        matches
            .value_of(name)
            .unwrap_or_default()
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("bad --{}", name)))
    };
    let size_mib = parse("size")?;
    let cluster = parse("cluster")?;
    if !(1..=128).contains(&cluster) || !cluster.is_power_of_two() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad --cluster"));
    }
    println!("src = {}, image = {}", src, image);
    let packed = pack_dir(src, &image, size_mib, cluster as u8)?;
    println!("{} files packed", packed);
    Ok(())
}

/// Format a fresh `size_mib` MiB image at `image` and copy every regular
/// file of `src` into its root directory. Returns the number of files.
fn pack_dir(src: &str, image: &str, size_mib: u32, cluster: u8) -> io::Result<usize> {
    let file_size = size_mib as u64 * 1024 * 1024;
    let block_file = Arc::new(BlockFile(Mutex::new({
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(image)?;
        f.set_len(file_size)?;
        f
    })));
    let dev = register_block_device(block_file);
    let mut opts = FormatOptions::new((file_size / BLOCK_SZ as u64) as u32);
    opts.sectors_per_cluster = cluster;
    Fat32FS::format(dev, &opts).map_err(fs_error)?;
    let fs = Fat32FS::load(dev).map_err(fs_error)?;
    let root = fs.root_inode().map_err(fs_error)?;

    let mut apps: Vec<_> = read_dir(src)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map_or(false, |t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    apps.sort();
    for app in apps.iter() {
        let mut host_file = File::open(Path::new(src).join(app))?;
        let mut data = Vec::new();
        host_file.read_to_end(&mut data)?;
        let inode = root
            .lock()
            .and_then(|mut dir| dir.create(app, InodeType::File))
            .map_err(fs_error)?;
        inode
            .lock()
            .and_then(|mut file| file.write_at(0, &data))
            .map_err(fs_error)?;
        info!("packed {} ({} bytes)", app, data.len());
    }
    info!("{} clusters free", fs.fat.free_count());
    drop(root);
    unregister_block_device(dev);
    Ok(apps.len())
}

fn list_image(image: &str) -> io::Result<()> {
    let f = OpenOptions::new().read(true).write(true).open(image)?;
    let dev = register_block_device(Arc::new(BlockFile(Mutex::new(f))));
    let fs = Fat32FS::load(dev).map_err(fs_error)?;
    let root = fs.root_inode().map_err(fs_error)?;
    println!("/**** {} ****", image);
    for entry in root.lock().and_then(|dir| dir.list_entries()).map_err(fs_error)? {
        let kind = if entry.type_ == InodeType::Dir { "d" } else { "-" };
        println!("{} {:>10} {}", kind, entry.size, entry.name);
    }
    println!("**************/");
    drop(root);
    unregister_block_device(dev);
    Ok(())
}
