pub mod model;
pub use model::*;

pub mod xml;
pub use xml::*;
