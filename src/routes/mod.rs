/// Router Module Index
///
/// Splits routing by access level so the authentication layer is applied once,
/// at module granularity, rather than per handler.

/// Routes accessible to all clients (anonymous, read-only, plus registration and login).
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware.
/// Requires a valid, unexpired token whose subject still exists.
pub mod authenticated;
