// layouts the garbage collector and stack walkers rely on:
// oop maps recorded at call sites, code blobs and the pc -> blob index, and interpreter frame shapes.

pub mod oop_map;
pub mod code_blob;
pub mod code_cache;
pub mod frame_layout;

#[cfg(test)]
pub mod tests;
