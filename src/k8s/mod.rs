pub mod cache;
pub mod client;
pub mod remote;

/// Default user agent for `kubemirror` - automatically uses the package version
///
/// All cluster clients should be built with `client::new(Some(USER_AGENT))`.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
