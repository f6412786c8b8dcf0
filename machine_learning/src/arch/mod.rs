mod data_parallel;
mod linear;
pub mod loss;
mod model;

pub use data_parallel::DataParallel;
pub use linear::Linear;
pub use model::{Mode, Model};
