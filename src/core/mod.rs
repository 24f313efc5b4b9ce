//! Foundation types shared by every layer of the crate.

pub mod types;
