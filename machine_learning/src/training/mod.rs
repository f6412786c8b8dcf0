mod epoch_runner;

pub use epoch_runner::EpochRunner;
