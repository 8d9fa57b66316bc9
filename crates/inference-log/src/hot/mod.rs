pub mod rings;
pub mod writer;
