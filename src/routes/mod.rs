/// Router Module Index
///
/// Routes are grouped by the gate that guards them. The gate itself is attached in
/// `create_router` as a `route_layer`, so a handler placed in the wrong module is
/// exposed with the wrong policy: keep each route next to its peers.

/// Anonymous access.
pub mod public;

/// Any valid bearer token.
pub mod authenticated;

/// Role rank of staff or higher.
pub mod staff;

/// Role rank of admin or higher.
pub mod admin;
