#[macro_use]
extern crate err_derive;

mod fs;
mod partition;
mod table;

pub use self::{fs::*, partition::*, table::*};
