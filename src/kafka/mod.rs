pub mod producer;
pub mod consumer;
pub mod broker;

pub use producer::*;
pub use consumer::*;
pub use broker::*;
