pub mod messages;
pub mod sessions;
pub mod traces;

pub use messages::MessageStore;
pub use sessions::SessionStore;
pub use traces::TraceStore;
