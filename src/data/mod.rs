//! Data access on top of [`crate::backend::Backend`]. Every function takes
//! the backend explicitly.

pub mod comments;
pub mod memberships;
pub mod notifications;
pub mod profiles;
pub mod storage;
pub mod trailers;
