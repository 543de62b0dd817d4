mod file;
mod memory;

pub use file::FileFallbackStore;
pub use memory::MemoryFallbackStore;
