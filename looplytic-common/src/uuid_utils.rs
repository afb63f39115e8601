//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Short collision-resistant token for file names (32 hex chars, no dashes)
pub fn file_token() -> String {
    Uuid::new_v4().simple().to_string()
}
