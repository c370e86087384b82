use std::path::{Path, PathBuf};

use burn::backend::NdArray;
use clap::{Parser, Subcommand};
use pipeline::evaluate::{
    check_counts, score_mask_dirs, score_pixel_dirs, summarize_pixels, write_table,
};
use pipeline::segment::{CellposeCli, segment};
use train::instance::summarize_f1;
use train::stats::Summary;

type Backend = NdArray<f32>;

/// Evaluate virtual staining results against fluorescence targets.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pearson, SSIM and PSNR of every prediction against its target.
    PixelMetrics {
        /// Folder of predicted images
        #[arg(long)]
        predictions: PathBuf,

        /// Folder of target images, paired with the predictions by sorted name
        #[arg(long)]
        targets: PathBuf,

        /// Folder of input images, checked to line up with the predictions
        #[arg(long)]
        inputs: Option<PathBuf>,

        #[arg(long, default_value_t = 1.0)]
        data_range: f32,

        /// CSV file to write
        #[arg(long)]
        out: PathBuf,
    },
    /// Instance detection scores of segmented predictions against segmented targets.
    InstanceMetrics {
        #[arg(long)]
        predicted_masks: PathBuf,

        #[arg(long)]
        target_masks: PathBuf,

        /// IoU thresholds, each producing its own table
        #[arg(long = "threshold", default_values_t = [0.5])]
        thresholds: Vec<f32>,

        /// Model name written to the Model column
        #[arg(long, default_value = "Pix2PixHD")]
        model: String,

        /// CSV file to write. Further thresholds get the threshold appended to the name.
        #[arg(long)]
        out: PathBuf,
    },
    /// Segment every image of a folder with cellpose.
    Segment {
        #[arg(long)]
        dir: PathBuf,

        #[arg(long, default_value = "nuclei")]
        model: String,

        #[arg(long, default_value_t = 0)]
        chan: u32,

        /// Python interpreter with cellpose installed
        #[arg(long, default_value = "python")]
        python: PathBuf,
    },
}

fn report(name: &str, summary: &Summary) {
    log::info!(
        "{name}: {:.4} ± {:.4} over {} examples ({} non-finite excluded)",
        summary.mean,
        summary.std,
        summary.count,
        summary.excluded
    );
}

// Table path for the `index`th threshold.
fn table_path(out: &Path, index: usize, threshold: f32) -> PathBuf {
    if index == 0 {
        return out.to_path_buf();
    }
    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    out.with_file_name(format!("{stem}_{threshold}.csv"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        Command::PixelMetrics {
            predictions,
            targets,
            inputs,
            data_range,
            out,
        } => {
            if let Some(inputs) = inputs {
                let count = check_counts(&predictions, &targets, &inputs)?;
                log::info!("{count} predictions, targets and inputs line up");
            }
            let device = Default::default();
            let rows = score_pixel_dirs::<Backend>(&predictions, &targets, data_range, &device)?;
            write_table(&out, &rows)?;

            let summary = summarize_pixels(&rows);
            report("Pearson", &summary.pearson);
            report("SSIM", &summary.ssim);
            report("PSNR", &summary.psnr);
        }
        Command::InstanceMetrics {
            predicted_masks,
            target_masks,
            thresholds,
            model,
            out,
        } => {
            let sets = score_mask_dirs(&predicted_masks, &target_masks, &thresholds, &model)?;
            for (index, (threshold, rows)) in thresholds.iter().zip(&sets).enumerate() {
                write_table(&table_path(&out, index, *threshold), rows)?;
                report(&format!("F1 @ IoU {threshold}"), &summarize_f1(rows));
            }
        }
        Command::Segment {
            dir,
            model,
            chan,
            python,
        } => {
            segment(&CellposeCli::new(python), &dir, &model, chan)?;
            log::info!("Masks written next to the images in {dir:?}");
        }
    }
    Ok(())
}
