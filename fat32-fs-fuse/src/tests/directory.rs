use std::collections::HashSet;

use fat32_fs::{
    block::get_block_cache,
    config::INODE_CACHE_SIZE,
    fat32::dentry::ShortDirEntry,
    FsError, Inode, InodeKey, InodeType,
};

use super::Volume;

fn short_name_at(vol: &Volume, key: InodeKey) -> [u8; 11] {
    get_block_cache(vol.dev, key.sector as usize)
        .unwrap()
        .read(key.slot as usize * 32, |entry: &ShortDirEntry| entry.name)
}

fn create(dir: &Inode, name: &str, type_: InodeType) -> Inode {
    dir.lock().unwrap().create(name, type_).unwrap()
}

fn lookup(dir: &Inode, name: &str) -> Option<Inode> {
    dir.lock().unwrap().dirlookup(name).unwrap()
}

fn names(dir: &Inode) -> Vec<String> {
    dir.lock().unwrap().ls().unwrap()
}

/// a name of exactly `len` characters that starts with `len`
fn sized_name(len: usize) -> String {
    let mut name = format!("{}-", len);
    while name.len() < len {
        name.push((b'a' + (name.len() % 26) as u8) as char);
    }
    name.truncate(len);
    name
}

#[test]
fn plain_name_keeps_its_alias() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    let file = create(&root, "README.md", InodeType::File);
    assert_eq!(&short_name_at(&vol, file.key()), b"README  MD ");
    assert_eq!(names(&root), ["README.md"]);
    let found = lookup(&root, "README.MD").unwrap();
    assert_eq!(found.key(), file.key());
}

#[test]
fn lossy_names_get_numbered_tails() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    let first = create(&root, "READMEFILE.TXT", InodeType::File);
    let second = create(&root, "READMEFILE2.TXT", InodeType::File);
    assert_eq!(&short_name_at(&vol, first.key()), b"README~1TXT");
    assert_eq!(&short_name_at(&vol, second.key()), b"README~2TXT");
    assert_eq!(names(&root), ["READMEFILE.TXT", "READMEFILE2.TXT"]);

    assert_eq!(lookup(&root, "readmefile.txt").unwrap().key(), first.key());
    assert_eq!(lookup(&root, "README~2.TXT").unwrap().key(), second.key());
    let found = lookup(&root, "README~1.TXT").unwrap();
    assert_eq!(found.name().unwrap(), "READMEFILE.TXT");
    assert!(lookup(&root, "README~3.TXT").is_none());
}

#[test]
fn long_names_survive_remount() {
    let vol = Volume::new(4096, 1);
    let root = vol.fs.root_inode().unwrap();
    let mut expected: Vec<String> = [1, 8, 12, 13, 14, 25, 255].iter().map(|&len| sized_name(len)).collect();
    expected.push(String::from("résumé ünïcode 文件.txt"));
    for name in &expected {
        create(&root, name, InodeType::File);
    }
    assert_eq!(names(&root), expected);

    let fs = vol.remount();
    let root = fs.root_inode().unwrap();
    assert_eq!(names(&root), expected);
    for name in &expected {
        let inode = lookup(&root, name).unwrap();
        assert_eq!(inode.name().unwrap(), *name);
    }
}

#[test]
fn names_are_unique_ignoring_case() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    create(&root, "Notes.txt", InodeType::File);
    let mut dir = root.lock().unwrap();
    assert_eq!(dir.create("NOTES.TXT", InodeType::File).err(), Some(FsError::AlreadyExists));
    assert_eq!(dir.create("notes.txt", InodeType::Dir).err(), Some(FsError::AlreadyExists));
    assert_eq!(dir.create("a/b", InodeType::File).err(), Some(FsError::InvalidName));
    assert_eq!(dir.create("..", InodeType::File).err(), Some(FsError::InvalidName));
    assert_eq!(dir.create(&"x".repeat(256), InodeType::File).err(), Some(FsError::NameTooLong));
    assert_eq!(dir.create("dev", InodeType::Device).err(), Some(FsError::Unsupported));
    assert_eq!(dir.ls().unwrap(), ["Notes.txt"]);
}

#[test]
fn deleted_slots_are_reused() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    create(&root, "a", InodeType::File);
    let b = create(&root, "b", InodeType::File);
    create(&root, "c", InodeType::File);
    let old_key = b.key();
    root.lock().unwrap().delete(&b).unwrap();
    b.put().unwrap();
    assert!(lookup(&root, "b").is_none());
    assert_eq!(names(&root), ["a", "c"]);

    let d = create(&root, "d", InodeType::File);
    assert_eq!(d.key(), old_key);
    assert_eq!(names(&root), ["a", "d", "c"]);
    assert_eq!(lookup(&root, "d").unwrap().key(), old_key);
}

#[test]
fn directory_grows_past_one_cluster() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    let dir = create(&root, "many", InodeType::Dir);
    let free_before = vol.fs.fat.free_count();
    let expected: Vec<String> = (0..20).map(|i| format!("file{:02}", i)).collect();
    for name in &expected {
        create(&dir, name, InodeType::File);
    }
    let mut guard = dir.lock().unwrap();
    let (_, clusters) = guard.travel(0).unwrap();
    // 16 slots per cluster, two taken by the dot records, two per file
    assert_eq!(clusters, 3);
    assert_eq!(guard.cluster_count(), 3);
    assert_eq!(guard.ls().unwrap(), expected);
    drop(guard);
    assert_eq!(vol.fs.fat.free_count(), free_before - 20 - 2);

    let seen: HashSet<InodeKey> = expected
        .iter()
        .map(|name| lookup(&dir, name).unwrap().key())
        .collect();
    assert_eq!(seen.len(), expected.len());
    let parent = lookup(&dir, "..").unwrap();
    assert!(parent.key().is_root());
    assert_eq!(lookup(&dir, ".").unwrap().key(), dir.key());
}

#[test]
fn damaged_long_name_shows_alias() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    let file = create(&root, "long file name.txt", InodeType::File);
    let key = file.key();
    assert_eq!(key.slot, 2);
    get_block_cache(vol.dev, key.sector as usize)
        .unwrap()
        .modify((key.slot as usize - 1) * 32 + 13, |sum: &mut u8| *sum ^= 0xFF);
    assert_eq!(names(&root), ["LONGFI~1.TXT"]);
    let found = lookup(&root, "longfi~1.txt").unwrap();
    assert_eq!(found.key(), key);
    assert!(lookup(&root, "long file name.txt").is_none());
}

#[test]
fn nested_directories_resolve_parents() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    let a = create(&root, "a", InodeType::Dir);
    let b = create(&a, "b", InodeType::Dir);
    let c = create(&b, "c", InodeType::Dir);
    assert_eq!(lookup(&c, "..").unwrap().key(), b.key());
    assert_eq!(lookup(&b, "..").unwrap().key(), a.key());
    let c_key = c.key();
    drop((a, b, c));

    // without cached parent links the `..` records are followed
    let fs = vol.remount();
    let c = fs.iget(c_key, "", None).unwrap();
    let b = c.lock().unwrap().dirlookup("..").unwrap().unwrap();
    assert_eq!(b.name().unwrap(), "b");
    let a = b.lock().unwrap().dirlookup("..").unwrap().unwrap();
    assert_eq!(a.name().unwrap(), "a");
    let top = a.lock().unwrap().dirlookup("..").unwrap().unwrap();
    assert!(top.key().is_root());
    assert!(lookup(&top, "..").unwrap().key().is_root());
}

/// raw FAT region, read around the cache
fn fat_region(vol: &Volume) -> Vec<[u8; 512]> {
    (vol.fs.sb.fat_base()..vol.fs.sb.data_base())
        .map(|sector| vol.disk.block(sector as usize))
        .collect()
}

#[test]
fn directory_without_cluster_is_corruption() {
    let vol = Volume::new(2048, 1);
    let root = vol.fs.root_inode().unwrap();
    let dir = create(&root, "d", InodeType::Dir);
    let file = create(&root, "f", InodeType::File);
    file.lock().unwrap().write_at(0, b"data").unwrap();
    let (dir_key, file_key) = (dir.key(), file.key());
    drop((dir, file));
    // clear the high and low words of both first cluster fields
    for key in [dir_key, file_key] {
        let mut block = get_block_cache(vol.dev, key.sector as usize).unwrap();
        for off in [20, 21, 26, 27] {
            block.modify(key.slot as usize * 32 + off, |b: &mut u8| *b = 0);
        }
    }
    let fat_before = fat_region(&vol);

    let fs = vol.remount();
    let dir = fs.iget(dir_key, "d", None).unwrap();
    let mut guard = dir.lock().unwrap();
    assert!(matches!(guard.dirlookup("x"), Err(FsError::Corrupted(_))));
    assert!(matches!(guard.dirlookup(".."), Err(FsError::Corrupted(_))));
    assert!(matches!(guard.create("victim", InodeType::File), Err(FsError::Corrupted(_))));
    assert!(matches!(guard.is_empty(), Err(FsError::Corrupted(_))));
    assert!(matches!(guard.ls(), Err(FsError::Corrupted(_))));
    drop(guard);

    let file = fs.iget(file_key, "f", None).unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(file.lock().unwrap().read_at(0, &mut buf), Err(FsError::Corrupted(_))));
    assert_eq!(fat_region(&vol), fat_before, "FAT changed by a corrupted directory");
}

#[test]
fn full_inode_cache_leaves_directory_alone() {
    let vol = Volume::new(4096, 1);
    let root = vol.fs.root_inode().unwrap();
    assert_eq!(INODE_CACHE_SIZE, 64);
    // 62 names of two records and one of four fill eight clusters exactly,
    // and with the root the handles take every cache slot
    let mut held: Vec<Inode> = (1..=62)
        .map(|i| create(&root, &format!("f{}", i), InodeType::File))
        .collect();
    held.push(create(&root, &"l".repeat(30), InodeType::File));
    assert_eq!(vol.fs.inodes_in_use(), INODE_CACHE_SIZE);
    assert_eq!(root.lock().unwrap().travel(0).unwrap().1, 8);
    let free = vol.fs.fat.free_count();

    assert_eq!(root.lock().unwrap().create("x", InodeType::File).err(), Some(FsError::NoInode));
    assert_eq!(root.lock().unwrap().travel(0).unwrap().1, 8);
    assert_eq!(vol.fs.fat.free_count(), free);
    assert_eq!(vol.fs.fat.count_free().unwrap(), free);
    assert!(lookup(&root, "x").is_none());

    held.pop();
    let x = create(&root, "x", InodeType::File);
    assert_eq!(root.lock().unwrap().travel(0).unwrap().1, 9);
    assert_eq!(vol.fs.fat.free_count(), free - 2);
    assert_eq!(lookup(&root, "x").unwrap().key(), x.key());
}

#[test]
fn full_volume_leaves_directory_alone() {
    let vol = Volume::new(200, 1);
    let root = vol.fs.root_inode().unwrap();
    let expected: Vec<String> = "abcdefgh".chars().map(String::from).collect();
    for name in &expected {
        create(&root, name, InodeType::File);
    }
    assert_eq!(root.lock().unwrap().travel(0).unwrap().1, 1);
    let fat = &vol.fs.fat;
    while fat.free_count() > 1 {
        fat.alloc_new_cluster().unwrap();
    }
    let in_use = vol.fs.inodes_in_use();

    // one cluster for the file, one to grow the full root
    assert_eq!(root.lock().unwrap().create("late", InodeType::File).err(), Some(FsError::NoSpace));
    assert_eq!(fat.free_count(), 1);
    assert_eq!(fat.count_free().unwrap(), 1);
    assert_eq!(vol.fs.inodes_in_use(), in_use);
    let mut guard = root.lock().unwrap();
    assert_eq!(guard.travel(0).unwrap().1, 1);
    assert_eq!(guard.ls().unwrap(), expected);
}
