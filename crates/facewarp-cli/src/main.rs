use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use facewarp_core::{raster, Border, Interpolation, PointSet, Size, Template};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod input;

use config::Config;
use engine::{AlignJob, Fit, JobResult};

#[derive(Parser)]
#[command(name = "facewarp", about = "Similarity-transform face alignment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that fits a transform.
#[derive(Args, Debug, Clone)]
struct FitArgs {
    /// Template to align toward (built-in or from config)
    #[arg(short, long)]
    template: Option<String>,
    /// Output crop size as WxH (defaults to the template's size)
    #[arg(short, long)]
    size: Option<Size>,
    /// Only consider non-reflective transforms
    #[arg(long)]
    no_reflection: bool,
}

#[derive(Args, Debug, Clone)]
struct WarpArgs {
    /// Resampling kernel: nearest or bilinear
    #[arg(long)]
    interpolation: Option<Interpolation>,
    /// Out-of-bounds policy: replicate or a constant fill value
    #[arg(long)]
    border: Option<Border>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a transform and print it as JSON
    Solve {
        /// Landmark JSON file for the source points
        #[arg(short, long)]
        landmarks: PathBuf,
        /// Landmark JSON file for the target points (instead of a template)
        #[arg(long, conflicts_with = "template")]
        target: Option<PathBuf>,
        #[command(flatten)]
        fit: FitArgs,
    },
    /// Align one image into a canonical crop
    Warp {
        /// Input image
        #[arg(short, long)]
        image: PathBuf,
        /// Landmark JSON file
        #[arg(short, long)]
        landmarks: PathBuf,
        /// Where to write the aligned crop
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        fit: FitArgs,
        #[command(flatten)]
        warp: WarpArgs,
    },
    /// Align every entry of a manifest on the worker pool
    Batch {
        /// Manifest JSON: [{ "image": path, "landmarks": [[x, y], ...] }, ...]
        #[arg(short, long)]
        manifest: PathBuf,
        /// Directory for aligned crops
        #[arg(long)]
        out_dir: PathBuf,
        /// Fit one transform across all entries (clip-level alignment)
        #[arg(long)]
        shared: bool,
        /// Worker threads
        #[arg(short, long)]
        workers: Option<usize>,
        #[command(flatten)]
        fit: FitArgs,
        #[command(flatten)]
        warp: WarpArgs,
    },
    /// List available templates
    Templates,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Solve {
            landmarks,
            target,
            fit,
        } => {
            apply_fit_args(&mut config, &fit);
            let source = input::read_landmarks(&landmarks)?;
            let target = match target {
                Some(path) => input::read_landmarks(&path)?,
                None => resolve_target(&config, &fit)?.1,
            };
            let alignment = config.aligner().solve(&source, &target)?;
            println!("{}", serde_json::to_string_pretty(&alignment)?);
        }
        Commands::Warp {
            image,
            landmarks,
            output,
            fit,
            warp,
        } => {
            apply_fit_args(&mut config, &fit);
            apply_warp_args(&mut config, &warp);
            let (template, _) = resolve_target(&config, &fit)?;
            let size = output_size(&config, &template);
            let landmarks = input::read_landmarks(&landmarks)?;

            let source = image::open(&image).with_context(|| format!("opening {}", image.display()))?;
            let raster = raster::from_dynamic(&source)?;
            let aligned = config
                .aligner()
                .align_face(raster.view(), &landmarks, &template, size)?;
            raster::to_dynamic(&aligned.image)?
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;

            tracing::info!(output = %output.display(), template = %template.name, %size, "aligned crop written");
            println!("{}", serde_json::to_string_pretty(&aligned.alignment)?);
        }
        Commands::Batch {
            manifest,
            out_dir,
            shared,
            workers,
            fit,
            warp,
        } => {
            apply_fit_args(&mut config, &fit);
            apply_warp_args(&mut config, &warp);
            if let Some(n) = workers {
                config.workers = n.max(1);
            }
            run_batch(&config, &fit, &manifest, &out_dir, shared).await?;
        }
        Commands::Templates => {
            for t in config.all_templates() {
                println!("{:<16} {:>9}  {} points", t.name, t.size.to_string(), t.len());
            }
        }
    }

    Ok(())
}

fn apply_fit_args(config: &mut Config, fit: &FitArgs) {
    if let Some(size) = fit.size {
        config.output_size = Some(size);
    }
    if fit.no_reflection {
        config.allow_reflection = false;
    }
}

fn apply_warp_args(config: &mut Config, warp: &WarpArgs) {
    if let Some(v) = warp.interpolation {
        config.interpolation = v;
    }
    if let Some(v) = warp.border {
        config.border = v;
    }
}

fn output_size(config: &Config, template: &Template) -> Size {
    config.output_size.unwrap_or(template.size)
}

/// The template named on the command line (or in config) and its points at
/// the configured output size.
fn resolve_target(config: &Config, fit: &FitArgs) -> Result<(Template, PointSet)> {
    let name = fit.template.as_deref().unwrap_or(&config.template);
    let template = config.resolve_template(name)?;
    let points = template.points_for(output_size(config, &template))?;
    Ok((template, points))
}

/// Align every manifest entry, print one JSON line per success in manifest
/// order and fail if any entry failed.
async fn run_batch(
    config: &Config,
    fit: &FitArgs,
    manifest: &Path,
    out_dir: &Path,
    shared: bool,
) -> Result<Vec<JobResult>> {
    let entries = input::read_manifest(manifest)?;
    if entries.is_empty() {
        bail!("manifest {} has no entries", manifest.display());
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let (template, target) = resolve_target(config, fit)?;
    let size = output_size(config, &template);
    let aligner = config.aligner();

    let shared_fit = if shared {
        let sets: Vec<PointSet> = entries.iter().map(|e| e.landmarks.clone()).collect();
        let alignment = aligner.estimate_batch(&sets, &target)?;
        tracing::info!(
            entries = sets.len(),
            reflected = alignment.reflected,
            residual = alignment.residual,
            "shared transform fitted"
        );
        Some(alignment)
    } else {
        None
    };

    let engine = engine::spawn_engine(config.workers, aligner, target, size)?;
    let mut tasks = JoinSet::new();
    tracing::debug!(entries = entries.len(), workers = engine.worker_count(), "dispatching batch");

    for (index, entry) in entries.into_iter().enumerate() {
        let stem = entry
            .image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let job = AlignJob {
            output: out_dir.join(format!("{index:04}_{stem}.png")),
            fit: match &shared_fit {
                Some(alignment) => Fit::Shared(alignment.clone()),
                None => Fit::Landmarks(entry.landmarks),
            },
            image: entry.image,
        };
        let engine = engine.clone();
        tasks.spawn(async move {
            let image = job.image.clone();
            (index, image, engine.align(job).await)
        });
    }

    let total = tasks.len();
    let mut results = Vec::with_capacity(total);
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (index, image, result) = joined.context("alignment task panicked")?;
        match result {
            Ok(done) => results.push((index, done)),
            Err(e) => {
                failed += 1;
                tracing::warn!(index, image = %image.display(), error = %e, "entry failed");
            }
        }
    }

    results.sort_by_key(|(index, _)| *index);
    for (index, done) in &results {
        let line = serde_json::json!({
            "index": index,
            "output": done.output,
            "alignment": done.alignment,
        });
        println!("{line}");
    }

    tracing::info!(total, failed, out_dir = %out_dir.display(), "batch finished");
    if failed > 0 {
        bail!("{failed} of {total} entries failed");
    }
    Ok(results.into_iter().map(|(_, done)| done).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    const LANDMARKS: &str = "[[80, 60], [120, 60], [100, 85], [85, 110], [115, 110]]";
    const SHIFTED: &str = "[[82, 61], [122, 61], [102, 86], [87, 111], [117, 111]]";

    fn fit_args() -> FitArgs {
        FitArgs {
            template: None,
            size: None,
            no_reflection: false,
        }
    }

    fn write_manifest(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let body: Vec<String> = entries
            .iter()
            .map(|(image, landmarks)| format!(r#"{{ "image": "{image}", "landmarks": {landmarks} }}"#))
            .collect();
        let path = dir.join("manifest.json");
        std::fs::write(&path, format!("[{}]", body.join(","))).unwrap();
        path
    }

    fn write_frames(dir: &Path, names: &[&str]) {
        for name in names {
            GrayImage::from_pixel(200, 160, Luma([120]))
                .save(dir.join(name))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_batch_names_outputs_by_index() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["left.png", "right.png"]);
        let manifest = write_manifest(dir.path(), &[("left.png", LANDMARKS), ("right.png", SHIFTED)]);
        let out_dir = dir.path().join("out");

        let results = run_batch(&Config::default(), &fit_args(), &manifest, &out_dir, false)
            .await
            .unwrap();

        let outputs: Vec<PathBuf> = results.iter().map(|r| r.output.clone()).collect();
        assert_eq!(
            outputs,
            vec![out_dir.join("0000_left.png"), out_dir.join("0001_right.png")]
        );
        for output in &outputs {
            let written = image::open(output).unwrap();
            assert_eq!((written.width(), written.height()), (112, 112));
        }
        assert_ne!(results[0].alignment, results[1].alignment);
    }

    #[tokio::test]
    async fn test_batch_shared_fit_reuses_one_transform() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["a.png", "b.png"]);
        let manifest = write_manifest(dir.path(), &[("a.png", LANDMARKS), ("b.png", SHIFTED)]);
        let mut config = Config::default();
        config.output_size = Some(Size::square(224));

        let results = run_batch(&config, &fit_args(), &manifest, &dir.path().join("out"), true)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].alignment, results[1].alignment);
        let written = image::open(&results[1].output).unwrap();
        assert_eq!((written.width(), written.height()), (224, 224));
    }

    #[tokio::test]
    async fn test_batch_counts_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["ok.png"]);
        let manifest = write_manifest(
            dir.path(),
            &[("ok.png", LANDMARKS), ("missing.png", LANDMARKS)],
        );
        let out_dir = dir.path().join("out");

        let err = run_batch(&Config::default(), &fit_args(), &manifest, &out_dir, false)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "1 of 2 entries failed");
        assert!(out_dir.join("0000_ok.png").exists());
        assert!(!out_dir.join("0001_missing.png").exists());
    }

    #[tokio::test]
    async fn test_batch_rejects_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(dir.path(), &[]);
        let out_dir = dir.path().join("out");
        let result = run_batch(&Config::default(), &fit_args(), &manifest, &out_dir, false).await;
        assert!(result.is_err());
    }
}
