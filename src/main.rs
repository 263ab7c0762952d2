use anyhow::Result;
use clap::Parser;
use log::{debug, info, warn};
use midiroll::{Args, ConvertConfig, Instrumentation, convert_root, parse_last_bar_mode};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mode = parse_last_bar_mode(&args.last_bar_mode);
    let cfg = ConvertConfig {
        test_ratio: args.test_ratio,
        ..Default::default()
    };
    let instrumentation = match &args.instrumentation {
        Some(path) => Instrumentation::load(path)?,
        None => Instrumentation::default(),
    };

    let mut rng = match args.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut failed_roots = 0;
    for root in args.roots.iter() {
        let mixed = !args.no_mixed;
        let report = match convert_root(root, &cfg, mode, &instrumentation, &mut rng, mixed) {
            Ok(report) => report,
            Err(e) => {
                warn!("Skipping {}: {:#}", root.display(), e);
                failed_roots += 1;
                continue;
            }
        };

        debug!("{}", serde_json::to_string(&report)?);
        info!(
            "{}: {} train / {} test segment(s)",
            root.display(),
            report.segments_train,
            report.segments_test
        );

        match report.mixed {
            Some(copied) => info!("Copied {} training segment(s) into the mixed set", copied),
            None if mixed => failed_roots += 1,
            None => {}
        }
    }

    if failed_roots > 0 {
        warn!("{} root(s) could not be processed..!", failed_roots);
    }
    info!("Done!");

    Ok(())
}
