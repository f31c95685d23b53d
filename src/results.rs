mod result_set;
mod row;

pub use result_set::{Chunks, ResultSet};
pub use row::CustomDbRow;
