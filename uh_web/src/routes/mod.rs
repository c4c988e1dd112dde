//! ABOUTME: Route modules for different API endpoint groups
//! ABOUTME: Users under /rest, logs under /logs, live notifications under /api

pub mod logs;
pub mod notifications;
pub mod users;
