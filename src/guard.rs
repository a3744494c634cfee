use crate::{
    auth::AuthUser,
    error::AppError,
    models::{Post, User},
};

/// Owned
///
/// A resource whose mutation is restricted to a single user.
pub trait Owned {
    /// Id of the user allowed to mutate this resource.
    fn owner_id(&self) -> i32;
}

impl Owned for Post {
    fn owner_id(&self) -> i32 {
        self.owner_id
    }
}

/// An account is owned by itself.
impl Owned for User {
    fn owner_id(&self) -> i32 {
        self.id
    }
}

/// authorize
///
/// Allows the mutation only if `identity` owns `resource`; otherwise `Forbidden`.
/// "No identity at all" never reaches this point: the `AuthUser` extractor has already
/// rejected the request as `Unauthorized`.
pub fn authorize<R: Owned>(identity: &AuthUser, resource: &R) -> Result<(), AppError> {
    if identity.id == resource.owner_id() {
        Ok(())
    } else {
        tracing::warn!(
            user_id = identity.id,
            owner_id = resource.owner_id(),
            "ownership check denied"
        );
        Err(AppError::Forbidden)
    }
}
