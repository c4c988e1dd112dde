//! ABOUTME: Repository modules providing type-safe database operations
//! ABOUTME: Each repository handles CRUD operations for one entity type

pub mod log_entries;
pub mod users;

// Cache-aware repositories
pub mod cached_users;
