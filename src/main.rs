//! Main executable for vscreen

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use vscreen::io::HeaderIndex;
use vscreen::job::{combine_slices, DockingEngine, JobConfig};
use vscreen::rescore::NullRescorer;

/// Command-line arguments for the application
#[derive(Parser, Debug)]
#[clap(
    name = "vscreen",
    version = vscreen::VERSION,
    about = "Persistent CPU worker for large-scale structure-based virtual screening"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dock one slice of a ligand library against a receptor
    Dock {
        /// PDBQT file containing the receptor
        #[clap(long, value_parser)]
        receptor: PathBuf,

        /// Ligand library text file
        #[clap(long, value_parser)]
        ligands: PathBuf,

        /// Sidecar binary index of byte offsets into the ligand file
        #[clap(long, value_parser)]
        headers: PathBuf,

        /// Job configuration file with key = value lines
        #[clap(long, short, value_parser)]
        config: Option<PathBuf>,

        /// Center of the search box (x,y,z)
        #[clap(long, value_parser, value_delimiter = ',')]
        center: Option<Vec<f64>>,

        /// Size of the search box (x,y,z)
        #[clap(long, value_parser, value_delimiter = ',')]
        size: Option<Vec<f64>>,

        /// Job directory receiving the slice CSV
        #[clap(long, value_parser)]
        out: PathBuf,

        /// Slice to execute
        #[clap(long, default_value_t = 0)]
        slice: usize,

        /// Total number of slices the library is split into
        #[clap(long, default_value_t = 1)]
        num_slices: usize,

        /// Master RNG seed; drawn from the OS when omitted
        #[clap(long)]
        seed: Option<u64>,

        /// Worker threads; defaults to the hardware concurrency
        #[clap(long)]
        threads: Option<usize>,
    },

    /// Combine the slice CSVs of a completed job into final outputs
    Combine {
        /// Ligand library text file
        #[clap(long, value_parser)]
        ligands: PathBuf,

        /// Sidecar binary index of byte offsets into the ligand file
        #[clap(long, value_parser)]
        headers: PathBuf,

        /// Job directory holding the slice CSVs
        #[clap(long, value_parser)]
        out: PathBuf,

        /// Total number of slices the library was split into
        #[clap(long, default_value_t = 1)]
        num_slices: usize,

        /// Number of top poses written to ligands.pdbqt
        #[clap(long, default_value_t = 1000)]
        num_hits: usize,
    },
}

/// Evenly splits `num_ligands` into `num_slices` contiguous ranges and
/// returns the bounds of slice `slice`.
fn slice_bounds(num_ligands: usize, num_slices: usize, slice: usize) -> (usize, usize) {
    let per_slice = num_ligands / num_slices;
    let spare = num_ligands - per_slice * num_slices;
    let beg: usize = (0..slice).map(|i| per_slice + usize::from(i < spare)).sum();
    let end = beg + per_slice + usize::from(slice < spare);
    (beg, end)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Dock {
            receptor,
            ligands,
            headers,
            config,
            center,
            size,
            out,
            slice,
            num_slices,
            seed,
            threads,
        } => {
            let mut job_config = JobConfig::default();
            if let Some(config_path) = &config {
                let text = std::fs::read_to_string(config_path).with_context(|| {
                    format!("failed to read config file {}", config_path.display())
                })?;
                job_config.merge_config_file(&text)?;
            }
            if let Some(c) = center {
                if c.len() != 3 {
                    bail!("--center takes exactly three comma-separated values");
                }
                (job_config.center_x, job_config.center_y, job_config.center_z) =
                    (c[0], c[1], c[2]);
            }
            if let Some(s) = size {
                if s.len() != 3 {
                    bail!("--size takes exactly three comma-separated values");
                }
                (job_config.size_x, job_config.size_y, job_config.size_z) = (s[0], s[1], s[2]);
            }
            if job_config.size_x <= 0.0 || job_config.size_y <= 0.0 || job_config.size_z <= 0.0 {
                bail!("the search box size must be provided via --size or a config file");
            }
            if slice >= num_slices {
                bail!("slice {slice} out of range for {num_slices} slices");
            }

            let num_threads = threads.unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, |n| n.get())
            });
            let engine = DockingEngine::new(num_threads);

            let receptor_text = std::fs::read_to_string(&receptor)
                .with_context(|| format!("failed to read receptor {}", receptor.display()))?;
            let mut job = engine.load_job(job_config, &receptor_text)?;

            let mut header_index = HeaderIndex::open(&headers)
                .with_context(|| format!("failed to open header index {}", headers.display()))?;
            let mut ligand_reader = BufReader::new(
                File::open(&ligands)
                    .with_context(|| format!("failed to open ligands {}", ligands.display()))?,
            );

            let (beg, end) = slice_bounds(header_index.len(), num_slices, slice);
            info!("executing slice {slice}: ligands {beg}..{end}");

            std::fs::create_dir_all(&out)?;
            let csv_path = out.join(format!("{slice}.csv"));
            let mut csv = BufWriter::new(File::create(&csv_path)?);

            let seed = seed.unwrap_or_else(rand::random);
            info!("seeding the master RNG with {seed}");
            let mut rng = StdRng::seed_from_u64(seed);

            let mut report = |completed: usize| info!("current progress {completed}");
            let stats = engine.run_slice(
                &mut job,
                &mut ligand_reader,
                &mut header_index,
                beg..end,
                &NullRescorer,
                &mut csv,
                &mut rng,
                Some(&mut report),
            )?;
            info!(
                "slice {slice} done: {} docked, {} filtered, {} without conformation, \
                 {} parse errors, {} task failures",
                stats.docked,
                stats.filtered,
                stats.no_conformation,
                stats.parse_errors,
                stats.task_failures
            );
        }

        Commands::Combine {
            ligands,
            headers,
            out,
            num_slices,
            num_hits,
        } => {
            let mut header_index = HeaderIndex::open(&headers)
                .with_context(|| format!("failed to open header index {}", headers.display()))?;
            let mut ligand_reader = BufReader::new(
                File::open(&ligands)
                    .with_context(|| format!("failed to open ligands {}", ligands.display()))?,
            );
            let stats = combine_slices(
                &out,
                num_slices,
                &mut ligand_reader,
                &mut header_index,
                num_hits,
            )?;
            info!(
                "combined {} ligands, wrote {} poses",
                stats.summaries, stats.hits_written
            );
        }
    }

    Ok(())
}
