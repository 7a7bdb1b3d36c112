/// Router Module Index
///
/// Routes grouped by the access they require. Access control is applied to each
/// group as a layer in `create_router`, so a route cannot be exposed without it.

/// Routes accessible without credentials.
pub mod public;

/// Routes that require a resolved identity.
pub mod authenticated;

/// Routes scoped to a single post. The post is loaded before the handler runs.
pub mod posts;

/// Routes that manage other users. Handlers enforce `manage_users_level`.
pub mod admin;
