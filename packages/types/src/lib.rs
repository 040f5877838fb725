mod log;
mod mode;
mod pipeline;
mod poll;
mod round;
pub use log::*;
pub use mode::*;
pub use pipeline::*;
pub use poll::*;
pub use round::*;
