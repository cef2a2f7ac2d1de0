mod change;
mod definition;
mod source;

pub use self::change::{Action, Change, Disposition};
pub use self::definition::{Definition, RegistryEntry, RegistryVersion};
pub use self::source::Source;
