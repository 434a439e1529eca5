pub mod booking;
pub mod messages;
pub mod events;
pub mod subjects;

pub use booking::*;
pub use messages::*;
pub use events::*;
pub use subjects::*;
