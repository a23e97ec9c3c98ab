pub mod chat;
pub mod realtime;
