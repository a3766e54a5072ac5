use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use half::{bf16, f16};

use tessera_core::{Buffer, DType, Shape};
use tessera_kernels::finite_mask::is_finite_f32;
use tessera_kernels::floor_mod::{floor_mod_f32, floor_mod_i32_exact, floor_mod_i32_fast};
use tessera_kernels::kernel::FloatLane;
use tessera_kernels::{kernel_for, KernelKey, OpKind, Precision};
use tessera_runtime::launch::plan_op;
use tessera_runtime::tiling::{ALIGN, MIN_BYTES_PER_CORE, RESERVED_BYTES, WORKSPACE_BYTES};
use tessera_runtime::{launch, plan_finite_mask, plan_floor_mod, CoreReport, LaunchOutput, OperatorPlan, PlatformConfig};

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tiling planner and pipelined launcher for elementwise kernels",
    long_about = "Plans FloorMod and FiniteMask launches across a many-core vector\nprocessor with small per-core working memory, and runs them on a host\nsimulation of that processor.",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PlatformArgs {
    /// JSON platform description (core_count, ub_size_bytes, precision)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the number of cores
    #[arg(long)]
    cores: Option<usize>,
    /// Override per-core working memory, in KiB
    #[arg(long)]
    ub_kib: Option<usize>,
    /// Integer FloorMod strategy: high-precision or high-performance
    #[arg(long)]
    precision: Option<Precision>,
}

#[derive(clap::Args)]
struct TensorArgs {
    /// Operator: floor-mod or finite-mask
    #[arg(long, default_value = "floor-mod")]
    op: OpKind,
    /// Tensor dimensions (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "8192")]
    dims: Vec<usize>,
    /// Element type: f16, bf16, f32, i32
    #[arg(long, default_value = "f16")]
    dtype: DType,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show platform defaults, tiling constants and the kernel table
    Info,
    /// Compute and print the tiling for a tensor
    Plan {
        #[command(flatten)]
        tensor: TensorArgs,
        #[command(flatten)]
        platform: PlatformArgs,
        /// Also print the serialized descriptor as hex
        #[arg(long)]
        hex: bool,
        /// Print the plan as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run a launch on synthetic data and check it against a scalar reference
    Run {
        #[command(flatten)]
        tensor: TensorArgs,
        #[command(flatten)]
        platform: PlatformArgs,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Plan { tensor, platform, hex, json } => cmd_plan(&tensor, &platform, hex, json),
        Commands::Run { tensor, platform } => cmd_run(&tensor, &platform),
    }
}

impl PlatformArgs {
    fn resolve(&self) -> anyhow::Result<PlatformConfig> {
        let mut config = match &self.config {
            Some(path) => PlatformConfig::from_json_file(path)?,
            None => PlatformConfig::default(),
        };
        if let Some(cores) = self.cores {
            config.core_count = cores;
        }
        if let Some(kib) = self.ub_kib {
            config.ub_size_bytes = kib * 1024;
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        config.validate()?;
        tracing::debug!(?config, "platform resolved");
        Ok(config)
    }
}

fn cmd_info() -> anyhow::Result<()> {
    println!("tessera v{}\n", env!("CARGO_PKG_VERSION"));

    let defaults = PlatformConfig::default();
    println!("Platform defaults");
    println!("  cores:           {}", defaults.core_count);
    println!("  working memory:  {} KiB", defaults.ub_size_bytes / 1024);
    println!("  precision:       {}", defaults.precision);

    println!("\nTiling constants");
    println!("  alignment:       {ALIGN} elements");
    println!("  reserved:        {} KiB per core", RESERVED_BYTES / 1024);
    println!("  min work:        {} KiB per core", MIN_BYTES_PER_CORE / 1024);
    println!("  workspace:       {} KiB per launch", WORKSPACE_BYTES / 1024);

    println!("\nKernels");
    println!("  {:<5} {:<18} {:<6} {:<6} {:>8} {:>8}", "key", "kernel", "in", "out", "scratch", "B/elem");
    for key in KernelKey::ALL {
        let k = kernel_for(key);
        println!(
            "  {:<5} {:<18} {:<6} {:<6} {:>8} {:>8}",
            key.tiling_key(),
            format!("{key:?}"),
            k.input_dtype(),
            k.output_dtype(),
            k.scratch_bytes_per_elem(),
            tessera_runtime::launch::temp_multiplier(k),
        );
    }
    Ok(())
}

fn cmd_plan(tensor: &TensorArgs, platform: &PlatformArgs, hex: bool, json: bool) -> anyhow::Result<()> {
    let config = platform.resolve()?;
    let shape = Shape::new(&tensor.dims);
    let plan = plan_op(tensor.op, &shape, tensor.dtype, &config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_plan(&plan);
    if hex {
        let wire = plan.descriptor.to_bytes();
        let hex: Vec<String> = wire.iter().map(|b| format!("{b:02x}")).collect();
        println!("\nDescriptor ({} bytes)\n  {}", wire.len(), hex.join(" "));
    }
    Ok(())
}

fn print_plan(plan: &OperatorPlan) {
    let d = &plan.descriptor;
    println!("{} {:?} over {:?} ({})", plan.op, plan.kernel, plan.shape, plan.input_dtype);
    println!("  tiling key:       {}", plan.kernel.tiling_key());
    println!("  total elements:   {}", d.total_elems);
    println!("  cores:            {}", d.core_count);
    println!("  chunk elements:   {}", d.usable_chunk_elems);
    println!("  bytes per elem:   {}", plan.temp_multiplier);
    println!("  per-core base:    {}", d.per_core_elems);
    println!("  tail cores:       {}", d.tail_core_count);
    println!("  last core:        {}", d.last_core_elems);

    println!("\n  {:<6} {:>12} {:>12} {:>6} {:>8}", "core", "offset", "count", "iters", "buffers");
    for (range, depth) in d.core_ranges().zip(plan.depths()) {
        println!(
            "  {:<6} {:>12} {:>12} {:>6} {:>8}",
            range.core,
            range.offset,
            range.count,
            d.iterations(range.count),
            depth.sets()
        );
    }
}

fn cmd_run(tensor: &TensorArgs, platform: &PlatformArgs) -> anyhow::Result<()> {
    let config = platform.resolve()?;
    let shape = Shape::new(&tensor.dims);
    let n = shape.checked_numel()?;

    let start = Instant::now();
    let (out, mismatches) = match (tensor.op, tensor.dtype) {
        (op, DType::F16) => run_float::<f16>(op, &shape, &config)?,
        (op, DType::BF16) => run_float::<bf16>(op, &shape, &config)?,
        (op, DType::F32) => run_float::<f32>(op, &shape, &config)?,
        (OpKind::FloorMod, DType::I32) => run_floor_mod_i32(&shape, &config)?,
        (op, dtype) => bail!("{op} does not support {dtype}"),
    };
    let elapsed = start.elapsed();

    print_reports(&out.reports);
    println!(
        "\n{} elements on {} cores in {:.3} ms, {} mismatches",
        n,
        out.reports.len(),
        elapsed.as_secs_f64() * 1000.0,
        mismatches
    );
    if mismatches > 0 {
        bail!("{mismatches} of {n} elements differ from the scalar reference");
    }
    Ok(())
}

fn print_reports(reports: &[CoreReport]) {
    println!("{:<6} {:>12} {:>12} {:>6} {:>8} {:>8}", "core", "offset", "elems", "iters", "buffers", "state");
    for r in reports {
        println!(
            "{:<6} {:>12} {:>12} {:>6} {:>8} {:>8}",
            r.core,
            r.offset,
            r.elems,
            r.iterations,
            r.depth.sets(),
            format!("{:?}", r.state)
        );
    }
}

/// Launch, tagging device-side faults so they read apart from planning errors.
fn run_launch(plan: &OperatorPlan, inputs: &[&Buffer]) -> anyhow::Result<LaunchOutput> {
    launch(plan, inputs).map_err(|e| {
        let runtime = e.is_runtime();
        let err = anyhow::Error::new(e);
        if runtime {
            err.context(format!("{} launch aborted on the device", plan.op))
        } else {
            err
        }
    })
}

fn dividend(i: usize) -> f32 {
    ((i * 7919 + 13) % 4001) as f32 * 0.25 - 500.0
}

fn divisor(i: usize) -> f32 {
    let v = ((i * 31 + 7) % 23) as f32 - 11.0;
    if v == 0.0 {
        3.0
    } else {
        v
    }
}

fn maybe_special(i: usize, v: f32) -> f32 {
    match i % 97 {
        0 => f32::NAN,
        1 => f32::INFINITY,
        2 => f32::NEG_INFINITY,
        _ => v,
    }
}

fn run_float<T: FloatLane>(op: OpKind, shape: &Shape, config: &PlatformConfig) -> anyhow::Result<(LaunchOutput, usize)> {
    let n = shape.checked_numel()?;
    let x1: Vec<T> = (0..n).map(|i| T::narrow(maybe_special(i, dividend(i)))).collect();
    let x1 = Buffer::from_slice(&x1, shape.clone())?;

    match op {
        OpKind::FloorMod => {
            let x2: Vec<T> = (0..n).map(|i| T::narrow(divisor(i))).collect();
            let x2 = Buffer::from_slice(&x2, shape.clone())?;
            let plan = plan_floor_mod(&x1, &x2, config)?;
            let out = run_launch(&plan, &[&x1, &x2])?;

            let a = x1.to_vec::<T>().context("dividend dtype")?;
            let b = x2.to_vec::<T>().context("divisor dtype")?;
            let y = out.output.to_vec::<T>().context("output dtype")?;
            let mismatches = (0..n)
                .filter(|&i| {
                    let expected = T::narrow(floor_mod_f32(a[i].widen(), b[i].widen())).widen();
                    let got = y[i].widen();
                    !(got == expected || (got.is_nan() && expected.is_nan()))
                })
                .count();
            Ok((out, mismatches))
        }
        OpKind::FiniteMask => {
            let plan = plan_finite_mask(&x1, shape, config)?;
            let out = run_launch(&plan, &[&x1])?;

            let a = x1.to_vec::<T>().context("input dtype")?;
            let y = out.output.to_vec::<u8>().context("mask dtype")?;
            let mismatches = (0..n)
                .filter(|&i| y[i] != is_finite_f32(a[i].widen()) as u8)
                .count();
            Ok((out, mismatches))
        }
    }
}

fn run_floor_mod_i32(shape: &Shape, config: &PlatformConfig) -> anyhow::Result<(LaunchOutput, usize)> {
    let n = shape.checked_numel()?;
    let a: Vec<i32> = (0..n as i64)
        .map(|i| (i * 2_654_435_761 % 4_294_967_291 - 2_147_483_645) as i32)
        .collect();
    let b: Vec<i32> = (0..n).map(|i| (divisor(i) as i32) * 977).collect();
    let x1 = Buffer::from_slice(&a, shape.clone())?;
    let x2 = Buffer::from_slice(&b, shape.clone())?;

    let plan = plan_floor_mod(&x1, &x2, config)?;
    let out = run_launch(&plan, &[&x1, &x2])?;
    let y = out.output.to_vec::<i32>().context("output dtype")?;

    let reference = match config.precision {
        Precision::HighPrecision => floor_mod_i32_exact,
        Precision::HighPerformance => floor_mod_i32_fast,
    };
    let mismatches = (0..n).filter(|&i| y[i] != reference(a[i], b[i])).count();
    Ok((out, mismatches))
}
