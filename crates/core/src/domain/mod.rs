pub mod conversation;
pub mod request;
