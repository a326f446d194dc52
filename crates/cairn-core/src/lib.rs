pub mod archiver;
pub mod chunker;
pub mod fs;
pub mod node;
pub mod repo;
pub mod snapshot;
pub mod tree;
