pub mod consistency;
pub mod subscription;

pub use consistency::*;
pub use subscription::*;
