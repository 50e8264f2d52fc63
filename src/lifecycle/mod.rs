pub mod authz;
pub mod rules;
pub mod sla;

pub use authz::*;
pub use rules::*;
pub use sla::*;
