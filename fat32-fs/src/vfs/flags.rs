bitflags! {
    ///  The flags argument to the open() system call is constructed by ORing together zero or more of the following values:
    pub struct OpenFlags: u32 {
        /// readyonly
        const RDONLY = 0;
        /// writeonly
        const WRONLY = 1 << 0;
        /// read and write
        const RDWR = 1 << 1;
        /// create new file
        const CREATE = 1 << 6;
        /// truncate file size to 0
        const TRUNC = 1 << 10;
        /// directory
        const DIRECTORY = 1 << 21;
    }
}

impl OpenFlags {
    /// Return (readable, writable)
    pub fn read_write(&self) -> (bool, bool) {
        if self.contains(Self::RDWR) {
            (true, true)
        } else if self.contains(Self::WRONLY) {
            (false, true)
        } else {
            (true, false)
        }
    }
}
