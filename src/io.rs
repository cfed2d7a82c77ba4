use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use camino::Utf8PathBuf;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::codec::Format;
use crate::error::AugmentError;
use crate::plan::Plan;

const ANSI_BLUE: Style = Style::new().blue();

static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// A single-unit plan waiting to be written to its path.
#[derive(Debug)]
pub(crate) struct Descriptor {
    pub path: Utf8PathBuf,
    pub plan: Plan,
}

/// Write every work descriptor. Writes are independent of each other, so they
/// run on the rayon pool; the first failure aborts the batch.
pub(crate) fn write_descriptors(
    descriptors: &[Descriptor],
    format: Format,
) -> Result<(), AugmentError> {
    let s = Instant::now();

    let pb = ProgressBar::new(descriptors.len() as u64);
    pb.set_style(PROGRESS_STYLE.clone());
    pb.set_message("Writing work descriptors...");

    descriptors
        .par_iter()
        .try_for_each(|descriptor| -> Result<(), AugmentError> {
            format
                .write_file(&descriptor.path, &descriptor.plan)
                .map_err(|e| AugmentError::PersistenceFailed(descriptor.path.clone(), e))?;
            pb.inc(1);
            Ok(())
        })?;

    pb.finish_and_clear();
    tracing::info!(
        "wrote {} work descriptors {}",
        descriptors.len(),
        as_overhead(s)
    );

    Ok(())
}

/// Install a `tracing` subscriber filtered by `PLANGRAPH_LOG`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("PLANGRAPH_LOG")
        .unwrap_or_else(|_| EnvFilter::new("plangraph=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
