use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use geowarp::gpu::WgpuDevice;
use geowarp::{GeoImagePipeline, LayerId, LayerPhase, Material, PipelineOptions, ThreadedFetcher};
use imagesource::{ClientOptions, SourceClient};
use layerconfig::{LayerConfig, LayerEntry};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{ExtentsArgs, RenderArgs};
use crate::layers::{extent_report, geo_options, power};

const FRAME_INTERVAL: Duration = Duration::from_millis(5);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<LayerConfig> {
    LayerConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn select_layers<'a>(config: &'a LayerConfig, names: &[String]) -> Result<Vec<&'a LayerEntry>> {
    if names.is_empty() {
        return Ok(config.layers.iter().collect());
    }
    let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    for name in &wanted {
        if config.layer(name).is_none() {
            bail!("layer '{name}' is not defined in the configuration");
        }
    }
    Ok(config
        .layers
        .iter()
        .filter(|entry| wanted.contains(entry.name.as_str()))
        .collect())
}

struct Job<'a> {
    entry: &'a LayerEntry,
    id: LayerId,
    _material: Material,
}

pub fn run_render(args: RenderArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let entries = select_layers(&config, &args.layers)?;
    if entries.is_empty() {
        warn!(config = %args.config.display(), "no layers to render");
        return Ok(());
    }

    let client = SourceClient::new(ClientOptions {
        timeout: config.render.fetch_timeout,
        user_agent: config.render.user_agent.clone(),
    })
    .context("failed to build image client")?;
    let mut fetcher = ThreadedFetcher::new(client);
    if let Some(base) = args.config.parent() {
        fetcher = fetcher.with_base_dir(base);
    }

    let gpu_power = args.power.unwrap_or_else(|| power(config.render.power));
    let device = WgpuDevice::new(gpu_power)?;
    info!(adapter = device.adapter_name(), "initialised GPU");

    let mut pipeline = GeoImagePipeline::new(
        device,
        Box::new(fetcher),
        PipelineOptions {
            grid_subdivisions: config.render.grid_subdivisions,
            renders_per_frame: config.render.renders_per_frame,
        },
    )
    .context("failed to create warp pipeline")?;

    let mut jobs = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = pipeline
            .attach(entry.name.as_str(), geo_options(entry))
            .with_context(|| format!("failed to attach layer '{}'", entry.name))?;
        let material = Material::new();
        let outcome = pipeline.load_material(id, &material)?;
        debug!(layer = %entry.name, ?outcome, "requested material");
        jobs.push(Job {
            entry,
            id,
            _material: material,
        });
    }

    let mut frames = 0;
    while frames < args.max_frames && !pipeline.is_idle() {
        let report = pipeline.pump();
        frames += 1;
        if !report.is_empty() {
            debug!(
                frame = frames,
                rendered = report.rendered.len(),
                completed = report.completed.len(),
                failed = report.failed.len(),
                "pumped pipeline"
            );
        }
        thread::sleep(FRAME_INTERVAL);
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let mut failures = 0usize;
    for job in &jobs {
        let Some(layer) = pipeline.layer(job.id) else {
            continue;
        };
        match layer.phase() {
            LayerPhase::Ready => {
                let texture = layer
                    .instance()
                    .output_texture()
                    .context("ready layer has no output texture")?;
                let image = pipeline
                    .device()
                    .read_texture(texture)
                    .with_context(|| format!("failed to read back layer '{}'", job.entry.name))?;
                let path = args.out.join(format!("{}.png", job.entry.name));
                image
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(
                    layer = %job.entry.name,
                    width = image.width(),
                    height = image.height(),
                    path = %path.display(),
                    "wrote warped layer"
                );
            }
            LayerPhase::Failed => {
                failures += 1;
                match layer.last_error() {
                    Some(err) => error!(layer = %job.entry.name, error = %err, "layer failed"),
                    None => error!(layer = %job.entry.name, "layer failed"),
                }
            }
            phase => {
                failures += 1;
                warn!(
                    layer = %job.entry.name,
                    ?phase,
                    frames,
                    "layer did not finish within the frame limit"
                );
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} layers failed", jobs.len());
    }
    Ok(())
}

pub fn run_extents(args: ExtentsArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let reports = config
        .layers
        .iter()
        .map(extent_report)
        .collect::<Result<Vec<_>>>()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No layers defined in {}", args.config.display());
        return Ok(());
    }

    for report in &reports {
        println!("{} ({})", report.name, report.projection);
        println!("  geodetic  {}", format_params(&report.geodetic));
        println!("  mercator  {}", format_params(&report.mercator));
    }
    Ok(())
}

fn format_params(params: &Option<[f32; 4]>) -> String {
    match params {
        Some([min_x, min_y, scale_x, scale_y]) => {
            format!("min=({min_x}, {min_y}) scale=({scale_x:e}, {scale_y:e})")
        }
        None => "n/a".to_string(),
    }
}
