pub mod domain;
pub mod transport;
pub mod kafka;
pub mod store;
pub mod engine;
pub mod responder;
pub mod requester;
pub mod error;
pub mod config;
pub mod config_parser;
pub mod retry;
pub mod metrics;
pub mod shutdown;

pub use domain::*;
pub use transport::*;
pub use kafka::*;
pub use store::*;
pub use engine::*;
pub use responder::*;
pub use requester::*;
pub use error::*;
pub use self::config::*;
pub use config_parser::*;
pub use retry::*;
pub use metrics::*;
pub use shutdown::*;
