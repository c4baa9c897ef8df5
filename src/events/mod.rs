pub mod converter;
pub mod dispatcher;

pub use converter::{convert, convert_object, Conversion};
pub use dispatcher::{EventDispatcher, ResourceEventHandler};
