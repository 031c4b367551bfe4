pub mod item_options;

pub use item_options::{ItemOptions, OptionValue};
