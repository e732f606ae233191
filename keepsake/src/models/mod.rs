mod event;
mod memory;

pub use event::*;
pub use memory::*;
