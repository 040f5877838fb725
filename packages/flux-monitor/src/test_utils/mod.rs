pub mod logs;
pub mod mocks;

pub use logs::*;
pub use mocks::*;
