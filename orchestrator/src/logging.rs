use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use env_logger::{Builder, Env, Target};
use log::warn;

/// Copies every line written to stderr into a file too.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Returns the log file of a run, non leader ranks get their own.
///
/// # Arguments
/// * `model_dir` - The model directory.
/// * `name` - The run's name, `train` or `evaluate`.
/// * `rank` - The launcher's rank, if any.
pub fn log_path(model_dir: &Path, name: &str, rank: Option<usize>) -> PathBuf {
    match rank {
        None | Some(0) => model_dir.join(format!("{name}.log")),
        Some(rank) => model_dir.join(format!("{name}.rank{rank}.log")),
    }
}

/// Installs the global logger, filtered by `RUST_LOG` and `info` by default.
///
/// Lines are appended to `log_path(model_dir, name, rank)` besides stderr. If that file
/// can't be opened the logger falls back to stderr alone and says so.
pub fn init(model_dir: &Path, name: &str, rank: Option<usize>) {
    let path = log_path(model_dir, name, rank);
    let file = OpenOptions::new().create(true).append(true).open(&path);

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    let failure = match file {
        Ok(file) => {
            builder.target(Target::Pipe(Box::new(Tee { file })));
            None
        }
        Err(e) => Some(e),
    };

    if builder.try_init().is_err() {
        return;
    }

    if let Some(e) = failure {
        warn!("logging to stderr only, can't open {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn followers_log_to_their_own_file() {
        let dir = Path::new("runs");

        assert_eq!(log_path(dir, "train", None), dir.join("train.log"));
        assert_eq!(log_path(dir, "train", Some(0)), dir.join("train.log"));
        assert_eq!(log_path(dir, "train", Some(2)), dir.join("train.rank2.log"));
    }
}
