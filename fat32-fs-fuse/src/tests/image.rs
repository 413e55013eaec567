use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fat32_fs::{
    register_block_device, unregister_block_device, Fat32FS, FormatOptions, InodeType,
};

use super::{random_digits, setup};
use crate::{pack_dir, BlockFile};

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fat32-fs-{}-{}", std::process::id(), name))
}

fn open_image(path: &Path) -> usize {
    let f = OpenOptions::new().read(true).write(true).open(path).unwrap();
    register_block_device(Arc::new(BlockFile(Mutex::new(f))))
}

fn read_back(fs: &Arc<Fat32FS>, name: &str) -> Vec<u8> {
    let root = fs.root_inode().unwrap();
    let inode = root.lock().unwrap().dirlookup(name).unwrap().unwrap();
    let guard = inode.lock().unwrap();
    let mut buf = vec![0u8; guard.size() as usize];
    assert_eq!(guard.read_at(0, &mut buf).unwrap(), buf.len());
    buf
}

#[test]
fn random_files_persist_in_image() {
    setup();
    let path = scratch("random.img");
    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    f.set_len(16 * 1024 * 1024).unwrap();
    drop(f);

    let dev = open_image(&path);
    let mut opts = FormatOptions::new(16 * 2048);
    opts.sectors_per_cluster = 8;
    Fat32FS::format(dev, &opts).unwrap();
    let fs = Fat32FS::load(dev).unwrap();
    let root = fs.root_inode().unwrap();
    let mut contents = Vec::new();
    for (i, &len) in [0usize, 1, 511, 512, 513, 4095, 4096, 4097, 100_000].iter().enumerate() {
        let name = format!("file_{}.bin", i);
        let data = random_digits(len);
        let inode = root.lock().unwrap().create(&name, InodeType::File).unwrap();
        assert_eq!(inode.lock().unwrap().write_at(0, &data).unwrap(), len);
        contents.push((name, data));
    }
    let free = fs.fat.free_count();
    drop(root);
    drop(fs);
    unregister_block_device(dev);

    let dev = open_image(&path);
    let fs = Fat32FS::load(dev).unwrap();
    assert_eq!(fs.fat.free_count(), free);
    assert_eq!(fs.fat.count_free().unwrap(), free);
    for (name, data) in &contents {
        assert_eq!(&read_back(&fs, name), data);
    }
    drop(fs);
    unregister_block_device(dev);
    fs::remove_file(&path).unwrap();
}

#[test]
fn host_directory_is_packed() {
    setup();
    let src = scratch("apps");
    fs::create_dir_all(src.join("nested")).unwrap();
    let apps = [
        ("initproc", random_digits(7000)),
        ("user_shell", random_digits(20_000)),
        ("hello world.txt", b"hello".to_vec()),
    ];
    for (name, data) in &apps {
        fs::write(src.join(name), data).unwrap();
    }
    let image = scratch("packed.img");
    let packed = pack_dir(src.to_str().unwrap(), image.to_str().unwrap(), 4, 1).unwrap();
    assert_eq!(packed, apps.len());

    let dev = open_image(&image);
    let fs = Fat32FS::load(dev).unwrap();
    let names = fs.root_inode().unwrap().lock().unwrap().ls().unwrap();
    assert_eq!(names, ["hello world.txt", "initproc", "user_shell"]);
    for (name, data) in &apps {
        assert_eq!(&read_back(&fs, name), data);
    }
    drop(fs);
    unregister_block_device(dev);
    fs::remove_file(&image).unwrap();
    fs::remove_dir_all(&src).unwrap();
}
