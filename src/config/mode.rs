use bitflags::bitflags;

bitflags! {
    /// Access mode used when opening file-backed storage.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FileMode: u32 {
        const RDONLY = 0b0000_0001;
        const WRONLY = 0b0000_0010;
        const RDWR   = 0b0000_0100;
        const CREATE = 0b0000_1000;
        const EXCL   = 0b0001_0000;
    }
}

impl FileMode {
    pub fn readable(self) -> bool {
        self.intersects(FileMode::RDONLY | FileMode::RDWR)
    }

    pub fn writable(self) -> bool {
        self.intersects(FileMode::WRONLY | FileMode::RDWR)
    }
}

impl Default for FileMode {
    fn default() -> Self {
        FileMode::RDWR | FileMode::CREATE
    }
}
