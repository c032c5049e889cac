//! Domain-level constants.
//!
//! These constants define business rules and validation requirements.

// =============================================================================
// Validation
// =============================================================================

/// Minimum name length requirement
pub const MIN_NAME_LENGTH: usize = 1;

/// Maximum name length accepted by the users table
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum email length accepted by the users table
pub const MAX_EMAIL_LENGTH: usize = 255;

// =============================================================================
// Entities
// =============================================================================

/// Entity name used in not-found and conflict messages
pub const USER_ENTITY: &str = "User";
