//! Device meshes and the rules that distribute arrays over them.

mod mesh;
mod spec;

pub use mesh::*;
pub use spec::*;
