pub mod memory;

pub use memory::MemoryAdapter;
