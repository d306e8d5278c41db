use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Result, WrapErr};

use stream_calib::{
    parse_config_file, AlignmentConfig, CalibrationSet, CancellationToken, FrameSet, ImageInfo,
    ImageView, PixelFormat, Resolver, StreamType,
};

/// A raw frame dump given as `STREAM:FORMAT:PATH`.
#[derive(Debug, Clone)]
struct InputFrame {
    stream: StreamType,
    format: PixelFormat,
    path: PathBuf,
}

fn parse_input(arg: &str) -> std::result::Result<InputFrame, String> {
    let mut parts = arg.splitn(3, ':');
    let (Some(stream), Some(format), Some(path)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected STREAM:FORMAT:PATH, got \"{arg}\""));
    };
    Ok(InputFrame {
        stream: stream.parse().map_err(|e| format!("{e}"))?,
        format: format.parse().map_err(|e| format!("{e}"))?,
        path: path.into(),
    })
}

#[derive(Debug, Parser)]
#[command(name = "align-frames", version)]
struct Opt {
    /// Calibration file (.yaml or .json)
    #[arg(long)]
    calibration: PathBuf,

    /// Alignment configuration (.toml). Defaults are used if not given.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Synthetic stream to compute, e.g. depth_aligned_to_color
    #[arg(long)]
    target: StreamType,

    /// Packed raw frame, as STREAM:FORMAT:PATH. Repeat for each stream.
    #[arg(long = "input", value_parser = parse_input, required = true)]
    inputs: Vec<InputFrame>,

    /// Raw output frame
    #[arg(long)]
    output: PathBuf,

    /// Also write one byte per pixel, 255 where the output is valid
    #[arg(long)]
    valid_mask: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _guard = env_tracing_logger::init()?;
    let opt = Opt::parse();

    let config = match &opt.config {
        Some(path) => parse_config_file(path)
            .wrap_err_with(|| format!("while reading config {}", path.display()))?,
        None => AlignmentConfig::default(),
    };
    let cal = CalibrationSet::from_path(&opt.calibration, &config)
        .wrap_err_with(|| format!("while reading calibration {}", opt.calibration.display()))?;
    tracing::info!(
        "loaded calibration {}: {} streams",
        opt.calibration.display(),
        cal.streams().count()
    );
    let resolver = Resolver::new(Arc::new(cal), config);

    let mut buffers = Vec::with_capacity(opt.inputs.len());
    for input in opt.inputs.iter() {
        let data = std::fs::read(&input.path)
            .wrap_err_with(|| format!("while reading {}", input.path.display()))?;
        buffers.push(data);
    }

    let mut frames = FrameSet::new();
    for (input, data) in opt.inputs.iter().zip(buffers.iter()) {
        let intr = resolver.calibration().stream_intrinsics(input.stream)?.intrinsics();
        let info = ImageInfo::packed(intr.width, intr.height, input.format)?;
        let view = ImageView::new(info, data)
            .wrap_err_with(|| format!("frame {} for {}", input.path.display(), input.stream))?;
        frames.insert(input.stream, view)?;
        tracing::debug!("{} frame from {}", input.stream, input.path.display());
    }

    let out = resolver.synthesize(opt.target, &frames, &CancellationToken::new())?;
    if out.valid_count() == 0 {
        tracing::warn!("no valid pixels in {}", opt.target);
    }
    std::fs::write(&opt.output, &out.data)
        .wrap_err_with(|| format!("while writing {}", opt.output.display()))?;
    if let Some(path) = &opt.valid_mask {
        let mask: Vec<u8> = out.valid.iter().map(|v| if *v { 255 } else { 0 }).collect();
        std::fs::write(path, mask)
            .wrap_err_with(|| format!("while writing {}", path.display()))?;
    }

    println!(
        "{}: {}x{} {}, {:.1}% valid",
        opt.target,
        out.info.width,
        out.info.height,
        out.info.format,
        100.0 * out.valid_fraction()
    );
    Ok(())
}
