use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tessera::ops::{
    CachePoint, Checker, ImageInput, Invert, Mix, PrefixSumRows, Viewer, register_sim_kernels,
};
use tessera::{Engine, EngineOpts, ExecutionRequest, ImageBuf, OpId, OperationGraph, SimDevice};

#[derive(Parser, Debug)]
#[command(name = "tessera", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute the built-in demo graph and print per-frame stats as JSON lines.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Engine options JSON. Missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Width and height of every image in the demo graph.
    #[arg(long, default_value_t = 256)]
    size: u32,

    /// Number of frames to execute.
    #[arg(long, default_value_t = 4)]
    frames: u64,

    /// Attach the simulated accelerator.
    #[arg(long, default_value_t = false)]
    device: bool,

    /// Override worker threads from the config.
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
    }
}

fn load_opts(args: &RunArgs) -> anyhow::Result<EngineOpts> {
    let mut opts = match &args.config {
        Some(path) => {
            let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
            serde_json::from_reader(BufReader::new(f))
                .with_context(|| format!("parse config '{}'", path.display()))?
        }
        None => EngineOpts::default(),
    };
    if let Some(threads) = args.threads {
        opts.worker_threads = threads;
    }
    Ok(opts)
}

/// Static ramp behind a persistent cache point, blended with a checkerboard that changes
/// every frame, shown in a viewer and summed down its columns.
fn demo_graph(size: u32, frame: u64) -> anyhow::Result<(OperationGraph, Vec<OpId>)> {
    let mut g = OperationGraph::new();
    let ramp = ImageBuf::from_fn(size, size, 4, |x, y, px| {
        let fx = x as f32 / size as f32;
        let fy = y as f32 / size as f32;
        px.copy_from_slice(&[fx, fy, 1.0 - fx, 1.0]);
    });
    let background = g.add(ImageInput::new(ramp)?)?;
    let inverted = g.add(Invert::new(&g, background)?)?;
    let cached = g.add(CachePoint::new(&g, inverted, true)?)?;

    let cell = 4 + (frame % 4) as u32 * 4;
    let checker = g.add(Checker::new(
        size,
        size,
        cell,
        [0.1, 0.1, 0.1, 1.0],
        [0.9, 0.9, 0.9, 1.0],
    )?)?;
    let mixed = g.add(Mix::new(&g, cached, checker, 0.5)?)?;
    let (viewer, _surface) = Viewer::new(&g, mixed)?;
    let viewer = g.add(viewer)?;
    let summed = g.add(PrefixSumRows::new(&g, mixed)?)?;
    Ok((g, vec![viewer, summed]))
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.size > 0, "--size must be > 0");
    let opts = load_opts(&args)?;
    let mut engine = if args.device {
        let mut dev = SimDevice::new();
        register_sim_kernels(&mut dev);
        Engine::with_device(opts, Box::new(dev))?
    } else {
        Engine::new(opts)?
    };

    for frame in 0..args.frames {
        let (graph, outputs) = demo_graph(args.size, frame)?;
        let req = ExecutionRequest::new(format!("frame-{frame}"), outputs).with_frame(frame);
        let report = engine
            .execute(&graph, &req)
            .with_context(|| format!("execute frame {frame}"))?;
        println!("{}", serde_json::to_string(&report)?);
    }

    eprintln!(
        "recycler: {}",
        serde_json::to_string(&engine.recycler().stats())?
    );
    engine.shutdown()?;
    Ok(())
}
