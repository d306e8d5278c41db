use clap::Parser;
use eyre::{Result, WrapErr};

use stream_calib::{AlignmentConfig, CalibrationSet};

#[derive(Debug, Parser)]
#[command(name = "print-calib", version)]
struct Opt {
    /// Calibration file (.yaml or .json)
    filename: std::path::PathBuf,
}

fn print_calib(filename: &std::path::Path) -> Result<()> {
    let cal = CalibrationSet::from_path(filename, &AlignmentConfig::default())
        .wrap_err_with(|| format!("while reading calibration {}", filename.display()))?;
    tracing::debug!("{} supplied extrinsics", cal.supplied_extrinsics().len());

    println!("# ----- {} ----- ", filename.display());
    let device = cal.device();
    println!(
        "device: {} (serial {}, firmware {}, {})",
        device.name, device.serial, device.firmware, device.rotation
    );

    println!("intrinsics:");
    for stream in cal.streams() {
        let intr = cal.stream_intrinsics(stream)?.intrinsics();
        let fov = intr.fov();
        println!(
            "  {stream}: {}x{} fx={} fy={} ppx={} ppy={} {} {:?} fov {:.1}x{:.1} deg",
            intr.width,
            intr.height,
            intr.fx,
            intr.fy,
            intr.ppx,
            intr.ppy,
            intr.model,
            intr.coeffs,
            fov.horizontal,
            fov.vertical,
        );
    }

    println!("extrinsics:");
    for entry in cal.supplied_extrinsics() {
        let e = entry.extrinsics();
        println!("  {} -> {}", entry.from, entry.to);
        println!("    R {}", e.rotation_matrix());
        println!("    t {:?}", e.translation);
    }

    println!("motion:");
    for (motion_type, m) in cal.motion_types() {
        println!("  {motion_type}: {}", m.matrix());
        println!("    noise variances {:?}", m.noise_variances);
        println!("    bias variances {:?}", m.bias_variances);
    }
    Ok(())
}

fn main() -> Result<()> {
    let _guard = env_tracing_logger::init()?;
    let opt = Opt::parse();
    print_calib(&opt.filename)?;
    Ok(())
}
