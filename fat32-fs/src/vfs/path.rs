//! Path walking over [`VfsInode`]s
//!
//! Absolute paths start at `root`, relative ones at `cwd`. A walk holds at
//! most one inode lock at a time: each directory is unlocked before the
//! child found in it is locked.

use alloc::{borrow::ToOwned, string::String, sync::Arc, vec::Vec};

use super::{file::File, flags::OpenFlags, inode::VfsInode};
use crate::{
    config::MAX_PATH_LEN,
    error::{FsError, FsResult},
    fat32::inode::InodeType,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Path {
    path: String,
}

impl Path {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    pub fn is_relative(&self) -> bool {
        !self.is_absolute()
    }

    /// non-empty components, `.` and `..` included
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|name| !name.is_empty())
    }

    /// (parent components, last component); the last is empty for `/`
    pub fn split_last(&self) -> (Vec<&str>, &str) {
        let mut parts: Vec<&str> = self.components().collect();
        let last = parts.pop().unwrap_or("");
        (parts, last)
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for Path {
    fn from(path: String) -> Self {
        Self { path }
    }
}

fn start_of(root: &VfsInode, cwd: &VfsInode, path: &Path) -> FsResult<VfsInode> {
    if path.path.is_empty() {
        return Err(FsError::NotFound);
    }
    if path.path.len() > MAX_PATH_LEN {
        return Err(FsError::NameTooLong);
    }
    if path.is_absolute() {
        root.dup()
    } else {
        cwd.dup()
    }
}

fn walk<'a>(start: VfsInode, names: impl IntoIterator<Item = &'a str>) -> FsResult<VfsInode> {
    let mut cur = start;
    for name in names {
        let next = {
            let guard = cur.lock()?;
            if !guard.is_dir() {
                return Err(FsError::NotDir);
            }
            guard.dirlookup(name)?.ok_or(FsError::NotFound)?
        };
        core::mem::replace(&mut cur, next).put()?;
    }
    Ok(cur)
}

/// Resolve `path` to an inode.
pub fn lookup(root: &VfsInode, cwd: &VfsInode, path: &str) -> FsResult<VfsInode> {
    let path = Path::new(path);
    let start = start_of(root, cwd, &path)?;
    walk(start, path.components())
}

/// Resolve the directory holding the last component of `path`, and that
/// component. The name is empty when `path` names the start itself.
pub fn lookup_parent(root: &VfsInode, cwd: &VfsInode, path: &str) -> FsResult<(VfsInode, String)> {
    let path = Path::new(path);
    let start = start_of(root, cwd, &path)?;
    let (parents, name) = path.split_last();
    let dir = walk(start, parents)?;
    if !dir.lock()?.is_dir() {
        return Err(FsError::NotDir);
    }
    Ok((dir, String::from(name)))
}

/// Open a file
pub fn open(root: &VfsInode, cwd: &VfsInode, path: &str, flags: OpenFlags) -> FsResult<Arc<File>> {
    debug!("vfs: open {:?}, flags = {:?}", path, flags);
    let (readable, writable) = flags.read_write();
    let (dir, name) = lookup_parent(root, cwd, path)?;
    let inode = if name.is_empty() {
        dir
    } else {
        let inode = {
            let mut guard = dir.lock()?;
            match guard.dirlookup(&name)? {
                Some(inode) => inode,
                None if flags.contains(OpenFlags::CREATE) => guard.create(&name, InodeType::File)?,
                None => return Err(FsError::NotFound),
            }
        };
        dir.put()?;
        inode
    };
    {
        let mut guard = inode.lock()?;
        if guard.is_dir() {
            if writable {
                return Err(FsError::IsDir);
            }
        } else if flags.contains(OpenFlags::DIRECTORY) {
            return Err(FsError::NotDir);
        }
        if writable && guard.is_read_only() {
            return Err(FsError::ReadOnly);
        }
        if writable && flags.contains(OpenFlags::TRUNC) {
            guard.truncate()?;
        }
    }
    Ok(File::new(inode, readable, writable))
}

/// Create the directory `path`.
pub fn mkdir(root: &VfsInode, cwd: &VfsInode, path: &str) -> FsResult<VfsInode> {
    let (dir, name) = lookup_parent(root, cwd, path)?;
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::AlreadyExists);
    }
    let inode = dir.lock()?.create(&name, InodeType::Dir)?;
    dir.put()?;
    debug!("vfs: mkdir {:?}", path);
    Ok(inode)
}

/// Remove the file or empty directory `path`.
pub fn unlink(root: &VfsInode, cwd: &VfsInode, path: &str) -> FsResult<()> {
    let (dir, name) = lookup_parent(root, cwd, path)?;
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidArgument);
    }
    let child = {
        let mut guard = dir.lock()?;
        let child = guard.dirlookup(&name)?.ok_or(FsError::NotFound)?;
        {
            let child_guard = child.lock()?;
            if child_guard.is_dir() && !child_guard.is_empty()? {
                return Err(FsError::NotEmpty);
            }
        }
        guard.delete(&child)?;
        child
    };
    dir.put()?;
    debug!("vfs: unlink {:?}", path);
    child.put()
}

/// Names in the directory `path`.
pub fn list(root: &VfsInode, cwd: &VfsInode, path: &str) -> FsResult<Vec<String>> {
    let dir = lookup(root, cwd, path)?;
    let names = dir.lock()?.ls()?;
    dir.put()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_paths() {
        let path = Path::from("/usr//bin/ls");
        assert!(path.is_absolute());
        assert_eq!(path.components().collect::<Vec<_>>(), ["usr", "bin", "ls"]);
        assert_eq!(path.split_last(), (alloc::vec!["usr", "bin"], "ls"));
        let path = Path::from("/");
        assert_eq!(path.split_last(), (Vec::new(), ""));
        assert!(Path::from("a/b").is_relative());
    }
}
