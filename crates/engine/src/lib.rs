// scriptdesk-engine: line identity, suggestion lifecycle and persistence for scriptdesk

pub mod config;
pub mod drafts;
pub mod guard;
pub mod lines;
pub mod session;
pub mod store;
pub mod suggestion;
