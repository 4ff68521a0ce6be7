pub mod buffers;
pub mod codespecs;
pub mod meta;
pub mod runs;
