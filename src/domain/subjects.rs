// Broker subject definitions
pub struct Subjects;

impl Subjects {
    pub const BOOKING_RESERVE: &'static str = "booking.reserve";
    pub const BOOKING_CREATED: &'static str = "booking.created";
    pub const BOOKING_FAILED: &'static str = "booking.failed";
    pub const BOOKING_REPLIES: &'static str = "booking.reserve.replies";
}

// Record headers used for request/reply correlation
pub struct ReplyHeaders;

impl ReplyHeaders {
    pub const CORRELATION_ID: &'static str = "correlation_id";
    pub const REPLY_TO: &'static str = "reply_to";
}
