//! Shared utilities across apexer modules.

pub mod fs;

pub use fs::{copy_entry, copy_tree_contents, count_entries, dir_size, round_up, BLOCK_SIZE};
