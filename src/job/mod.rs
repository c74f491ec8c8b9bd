//! Job configuration and the per-ligand docking pipeline
//!
//! A job fixes the search box, the receptor and the property filter. The
//! engine owns the worker pool and the scoring table, both created once at
//! startup, and drives the three fan-outs of the core: scoring table rows,
//! grid map slabs and Monte-Carlo tasks.

use std::fs;
use std::io::{BufRead, BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::{mpsc, Arc};

use log::{debug, info, warn};
use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atom::{XsType, XS_TYPES, XS_TYPE_SIZE};
use crate::grid::{populate_slab, GridError, GridMaps, SearchBox};
use crate::io::{HeaderIndex, LigandHeader, ParseError, SliceRow};
use crate::ligand::Ligand;
use crate::optimization::local::{alpha_ladder, NUM_ALPHAS};
use crate::optimization::monte_carlo::{monte_carlo_task, MonteCarloParams};
use crate::optimization::{add_to_results, DockingResult, OptimizationError};
use crate::pool::{Task, TaskPool};
use crate::receptor::Receptor;
use crate::rescore::{features, Rescorer};
use crate::scoring::{pair_index, ScoringElement, ScoringFunction, NUM_TYPE_PAIRS};

/// Errors that end a whole job
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why one ligand was abandoned; never crosses a ligand boundary
#[derive(Error, Debug)]
pub enum LigandError {
    /// Grid map allocation failure is fatal for the job.
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Task(#[from] OptimizationError),
}

/// All numeric knobs accepted by a docking job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub center_x: f64,
    pub center_y: f64,
    pub center_z: f64,
    pub size_x: f64,
    pub size_y: f64,
    pub size_z: f64,

    pub mwt_lb: f64,
    pub mwt_ub: f64,
    pub logp_lb: f64,
    pub logp_ub: f64,
    pub ads_lb: f64,
    pub ads_ub: f64,
    pub pds_lb: f64,
    pub pds_ub: f64,
    pub hbd_lb: i32,
    pub hbd_ub: i32,
    pub hba_lb: i32,
    pub hba_ub: i32,
    pub tpsa_lb: i32,
    pub tpsa_ub: i32,
    pub chg_lb: i32,
    pub chg_ub: i32,
    pub nrb_lb: i32,
    pub nrb_ub: i32,

    /// Target ligand count, for reporting only.
    pub ligands: usize,

    pub num_mc_tasks: usize,
    pub max_conformations: usize,
    pub max_results_per_task: usize,
    /// Output window above the best free energy, kcal/mol.
    pub energy_range: f64,
    pub grid_granularity: f64,
    /// Outer iterations of one Monte-Carlo task.
    pub num_mc_iterations: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            center_z: 0.0,
            size_x: 0.0,
            size_y: 0.0,
            size_z: 0.0,
            mwt_lb: f64::NEG_INFINITY,
            mwt_ub: f64::INFINITY,
            logp_lb: f64::NEG_INFINITY,
            logp_ub: f64::INFINITY,
            ads_lb: f64::NEG_INFINITY,
            ads_ub: f64::INFINITY,
            pds_lb: f64::NEG_INFINITY,
            pds_ub: f64::INFINITY,
            hbd_lb: i32::MIN,
            hbd_ub: i32::MAX,
            hba_lb: i32::MIN,
            hba_ub: i32::MAX,
            tpsa_lb: i32::MIN,
            tpsa_ub: i32::MAX,
            chg_lb: i32::MIN,
            chg_ub: i32::MAX,
            nrb_lb: i32::MIN,
            nrb_ub: i32::MAX,
            ligands: 0,
            num_mc_tasks: 64,
            max_conformations: 100,
            max_results_per_task: 20,
            energy_range: 3.0,
            grid_granularity: 0.08,
            num_mc_iterations: 100,
        }
    }
}

impl JobConfig {
    /// Merges `key = value` lines over the current configuration. Unknown
    /// keys and comment lines are ignored.
    pub fn merge_config_file(&mut self, text: &str) -> Result<(), ParseError> {
        fn parsed<T: std::str::FromStr>(
            value: &str,
            key: &str,
            line: usize,
        ) -> Result<T, ParseError> {
            value
                .parse()
                .map_err(|_| ParseError::malformed(line, format!("invalid value for {key}")))
        }

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value, n) = (key.trim(), value.trim(), idx + 1);
            match key {
                "center_x" => self.center_x = parsed(value, key, n)?,
                "center_y" => self.center_y = parsed(value, key, n)?,
                "center_z" => self.center_z = parsed(value, key, n)?,
                "size_x" => self.size_x = parsed(value, key, n)?,
                "size_y" => self.size_y = parsed(value, key, n)?,
                "size_z" => self.size_z = parsed(value, key, n)?,
                "mwt_lb" => self.mwt_lb = parsed(value, key, n)?,
                "mwt_ub" => self.mwt_ub = parsed(value, key, n)?,
                "logp_lb" => self.logp_lb = parsed(value, key, n)?,
                "logp_ub" => self.logp_ub = parsed(value, key, n)?,
                "ads_lb" => self.ads_lb = parsed(value, key, n)?,
                "ads_ub" => self.ads_ub = parsed(value, key, n)?,
                "pds_lb" => self.pds_lb = parsed(value, key, n)?,
                "pds_ub" => self.pds_ub = parsed(value, key, n)?,
                "hbd_lb" => self.hbd_lb = parsed(value, key, n)?,
                "hbd_ub" => self.hbd_ub = parsed(value, key, n)?,
                "hba_lb" => self.hba_lb = parsed(value, key, n)?,
                "hba_ub" => self.hba_ub = parsed(value, key, n)?,
                "tpsa_lb" => self.tpsa_lb = parsed(value, key, n)?,
                "tpsa_ub" => self.tpsa_ub = parsed(value, key, n)?,
                "chg_lb" => self.chg_lb = parsed(value, key, n)?,
                "chg_ub" => self.chg_ub = parsed(value, key, n)?,
                "nrb_lb" => self.nrb_lb = parsed(value, key, n)?,
                "nrb_ub" => self.nrb_ub = parsed(value, key, n)?,
                "ligands" => self.ligands = parsed(value, key, n)?,
                "num_mc_tasks" => self.num_mc_tasks = parsed(value, key, n)?,
                "max_conformations" => self.max_conformations = parsed(value, key, n)?,
                "max_results_per_task" => self.max_results_per_task = parsed(value, key, n)?,
                "energy_range" => self.energy_range = parsed(value, key, n)?,
                "grid_granularity" => self.grid_granularity = parsed(value, key, n)?,
                "num_mc_iterations" => self.num_mc_iterations = parsed(value, key, n)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn search_box(&self) -> SearchBox {
        SearchBox::new(
            Vector3::new(self.center_x, self.center_y, self.center_z),
            Vector3::new(self.size_x, self.size_y, self.size_z),
            self.grid_granularity,
        )
    }

    pub fn filter(&self) -> PropertyFilter {
        PropertyFilter {
            mwt: (self.mwt_lb, self.mwt_ub),
            logp: (self.logp_lb, self.logp_ub),
            ads: (self.ads_lb, self.ads_ub),
            pds: (self.pds_lb, self.pds_ub),
            hbd: (self.hbd_lb, self.hbd_ub),
            hba: (self.hba_lb, self.hba_ub),
            tpsa: (self.tpsa_lb, self.tpsa_ub),
            chg: (self.chg_lb, self.chg_ub),
            nrb: (self.nrb_lb, self.nrb_ub),
        }
    }
}

/// Per-property inclusive bounds applied to ligand headers.
#[derive(Debug, Clone)]
pub struct PropertyFilter {
    pub mwt: (f64, f64),
    pub logp: (f64, f64),
    pub ads: (f64, f64),
    pub pds: (f64, f64),
    pub hbd: (i32, i32),
    pub hba: (i32, i32),
    pub tpsa: (i32, i32),
    pub chg: (i32, i32),
    pub nrb: (i32, i32),
}

impl PropertyFilter {
    pub fn accepts(&self, h: &LigandHeader) -> bool {
        let fr = |v: f64, (lb, ub): (f64, f64)| lb <= v && v <= ub;
        let ir = |v: i32, (lb, ub): (i32, i32)| lb <= v && v <= ub;
        fr(h.mwt, self.mwt)
            && fr(h.logp, self.logp)
            && fr(h.ads, self.ads)
            && fr(h.pds, self.pds)
            && ir(h.hbd, self.hbd)
            && ir(h.hba, self.hba)
            && ir(h.tpsa, self.tpsa)
            && ir(h.chg, self.chg)
            && ir(h.nrb, self.nrb)
    }
}

/// Shared immutable job state read by the worker tasks. The grid maps are
/// written only between batches, under the write lock.
struct JobShared {
    b: SearchBox,
    rec: Receptor,
    maps: RwLock<GridMaps>,
}

/// One loaded job: receptor, box, filter and per-ligand scratch containers.
pub struct Job {
    pub config: JobConfig,
    filter: PropertyFilter,
    mc_params: MonteCarloParams,
    shared: Arc<JobShared>,
    /// Per-task result containers, reserved once and reused.
    result_containers: Vec<Arc<Mutex<Vec<DockingResult>>>>,
    /// Merged result list, reused across ligands.
    results: Vec<DockingResult>,
}

impl Job {
    pub fn search_box(&self) -> &SearchBox {
        &self.shared.b
    }

    pub fn receptor(&self) -> &Receptor {
        &self.shared.rec
    }

    /// True if the grid map of the given type has been built.
    pub fn map_populated(&self, t: XsType) -> bool {
        self.shared.maps.read().is_populated(t)
    }
}

/// Counters of one executed slice.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SliceStats {
    pub docked: usize,
    pub filtered: usize,
    pub parse_errors: usize,
    pub no_conformation: usize,
    pub task_failures: usize,
}

/// The docking engine: worker pool plus precalculated scoring table.
pub struct DockingEngine {
    pool: TaskPool,
    sf: Arc<ScoringFunction>,
    alphas: [f64; NUM_ALPHAS],
}

impl DockingEngine {
    /// Creates the worker pool and precalculates the scoring table on it,
    /// one task per type pair row.
    pub fn new(num_threads: usize) -> Self {
        let pool = TaskPool::new(num_threads);
        info!(
            "precalculating {} scoring table rows on {} workers",
            NUM_TYPE_PAIRS,
            pool.num_threads()
        );

        let rs = Arc::new(ScoringFunction::sampling_radii());
        let (tx, rx) = mpsc::channel::<(usize, Vec<ScoringElement>)>();
        let mut tasks: Vec<Task> = Vec::with_capacity(NUM_TYPE_PAIRS);
        for t1 in 0..XS_TYPE_SIZE {
            for t2 in t1..XS_TYPE_SIZE {
                let rs = Arc::clone(&rs);
                let tx = tx.clone();
                tasks.push(Box::new(move || {
                    let row = ScoringFunction::precalculate(XS_TYPES[t1], XS_TYPES[t2], &rs);
                    let _ = tx.send((pair_index(XS_TYPES[t1], XS_TYPES[t2]), row));
                }));
            }
        }
        drop(tx);
        pool.submit_batch(tasks);
        let report = pool.wait();
        assert!(report.is_ok(), "scoring table precalculation failed");

        let mut rows: Vec<(usize, Vec<ScoringElement>)> = rx.try_iter().collect();
        rows.sort_by_key(|(p, _)| *p);
        let sf = ScoringFunction::from_rows(rows.into_iter().map(|(_, row)| row).collect());

        Self {
            pool,
            sf: Arc::new(sf),
            alphas: alpha_ladder(),
        }
    }

    pub fn scoring_function(&self) -> &ScoringFunction {
        &self.sf
    }

    /// Loads a job: parses the receptor against the job's box and resets the
    /// grid map cache.
    pub fn load_job(&self, config: JobConfig, receptor_text: &str) -> Result<Job, JobError> {
        let b = config.search_box();
        let rec = Receptor::from_pdbqt(receptor_text, &b)?;
        info!(
            "loaded receptor with {} heavy atoms into a {:.1}x{:.1}x{:.1} A box",
            rec.atoms.len(),
            b.span[0],
            b.span[1],
            b.span[2]
        );
        let mc_params = MonteCarloParams {
            num_iterations: config.num_mc_iterations,
            max_results: config.max_results_per_task,
            ..MonteCarloParams::default()
        };
        let result_containers = (0..config.num_mc_tasks)
            .map(|_| {
                Arc::new(Mutex::new(Vec::with_capacity(config.max_results_per_task)))
            })
            .collect();
        let results = Vec::with_capacity(config.max_results_per_task * config.num_mc_tasks);
        Ok(Job {
            filter: config.filter(),
            mc_params,
            config,
            shared: Arc::new(JobShared {
                b,
                rec,
                maps: RwLock::new(GridMaps::new()),
            }),
            result_containers,
            results,
        })
    }

    /// Builds the grid maps the ligand needs and are still missing, one
    /// x-slab per task.
    fn build_grid_maps(&self, job: &Job, lig: &Ligand) -> Result<(), LigandError> {
        let missing: Vec<XsType> = {
            let maps = job.shared.maps.read();
            lig.atom_types()
                .into_iter()
                .filter(|&t| !maps.is_populated(t))
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }
        debug!("creating {} grid maps", missing.len());

        {
            let mut maps = job.shared.maps.write();
            for &t in &missing {
                maps.allocate(t, job.shared.b.num_probes)?;
            }
        }

        let num_gm_tasks = job.shared.b.num_probes[0];
        let missing = Arc::new(missing);
        let (tx, rx) = mpsc::channel();
        let tasks: Vec<Task> = (0..num_gm_tasks)
            .map(|x| {
                let shared = Arc::clone(&job.shared);
                let sf = Arc::clone(&self.sf);
                let missing = Arc::clone(&missing);
                let tx = tx.clone();
                Box::new(move || {
                    let slab = populate_slab(&shared.b, &shared.rec, &sf, &missing, x);
                    let _ = tx.send(slab);
                }) as Task
            })
            .collect();
        drop(tx);
        self.pool.submit_batch(tasks);
        let report = self.pool.wait();

        let mut maps = job.shared.maps.write();
        if !report.is_ok() {
            // Leave no partially built map behind.
            for &t in missing.iter() {
                maps.remove(t);
            }
            return Err(OptimizationError::TaskPanic {
                failed: report.failures.len(),
                total: num_gm_tasks,
            }
            .into());
        }
        for slab in rx.try_iter() {
            let x = slab.x;
            for (t, plane) in slab.planes {
                if let Some(map) = maps.get_mut(t) {
                    map.write_slab(x, &plane);
                }
            }
        }
        Ok(())
    }

    /// Runs the full per-ligand pipeline: lazy grid maps, the Monte-Carlo
    /// fan-out, and the deterministic task-index-order merge.
    ///
    /// Returns the energy-sorted clustered results within the configured
    /// window, or `None` if the search produced no valid conformation.
    pub fn dock_ligand(
        &self,
        job: &mut Job,
        lig: &Arc<Ligand>,
        seed_rng: &mut StdRng,
    ) -> Result<Option<Vec<DockingResult>>, LigandError> {
        self.build_grid_maps(job, lig)?;

        let num_mc_tasks = job.config.num_mc_tasks;
        let tasks: Vec<Task> = (0..num_mc_tasks)
            .map(|i| {
                let shared = Arc::clone(&job.shared);
                let sf = Arc::clone(&self.sf);
                let lig = Arc::clone(lig);
                let container = Arc::clone(&job.result_containers[i]);
                let params = job.mc_params.clone();
                let alphas = self.alphas;
                let seed = seed_rng.next_u64();
                Box::new(move || {
                    let maps = shared.maps.read();
                    let results =
                        monte_carlo_task(&lig, seed, &alphas, &sf, &shared.b, &maps, &params);
                    *container.lock() = results;
                }) as Task
            })
            .collect();
        self.pool.submit_batch(tasks);
        let report = self.pool.wait();
        if !report.is_ok() {
            for container in &job.result_containers {
                container.lock().clear();
            }
            return Err(OptimizationError::TaskPanic {
                failed: report.failures.len(),
                total: num_mc_tasks,
            }
            .into());
        }

        // Drain per-task containers in task-index order so the merge is
        // deterministic.
        let required_square_error = 4.0 * lig.num_heavy_atoms() as f64;
        let capacity = job.config.max_results_per_task * num_mc_tasks;
        debug_assert!(job.results.is_empty());
        for container in &job.result_containers {
            for r in container.lock().drain(..) {
                add_to_results(&mut job.results, r, capacity, required_square_error);
            }
        }
        if job.results.is_empty() {
            return Ok(None);
        }

        let keep = job.results.len().min(job.config.max_conformations);
        let best_e = job.results[0].e;
        let energy_cap = best_e + job.config.energy_range;
        let fpf = lig.flexibility_penalty_factor;
        let out: Vec<DockingResult> = job
            .results
            .drain(..)
            .take(keep)
            .filter(|r| r.e <= energy_cap)
            .map(|mut r| {
                r.e_nd = r.f * fpf;
                r
            })
            .collect();
        Ok(Some(out))
    }

    /// Executes one slice: filters, parses and docks ligands `range`,
    /// appending one CSV row per docked ligand to `out`.
    #[allow(clippy::too_many_arguments)]
    pub fn run_slice<L, W>(
        &self,
        job: &mut Job,
        ligands: &mut L,
        headers: &mut HeaderIndex,
        range: Range<usize>,
        rescorer: &dyn Rescorer,
        out: &mut W,
        seed_rng: &mut StdRng,
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> Result<SliceStats, JobError>
    where
        L: BufRead + Seek,
        W: Write,
    {
        let mut stats = SliceStats::default();
        let mut header_line = String::with_capacity(96);
        let mut completed = 0usize;

        for idx in range {
            let offset = headers.offset(idx)?;
            ligands.seek(SeekFrom::Start(offset))?;
            header_line.clear();
            ligands.read_line(&mut header_line)?;
            let Some(header) = LigandHeader::parse(&header_line) else {
                warn!("ligand {idx}: malformed property header");
                stats.parse_errors += 1;
                continue;
            };
            if !job.filter.accepts(&header) {
                stats.filtered += 1;
                continue;
            }
            let lig = match Ligand::parse(ligands) {
                Ok(lig) => Arc::new(lig),
                Err(e) => {
                    warn!("ligand {idx} ({}): {e}", header.id);
                    stats.parse_errors += 1;
                    continue;
                }
            };

            match self.dock_ligand(job, &lig, seed_rng) {
                Ok(Some(results)) => {
                    let best = &results[0];
                    let v = features(&lig, &best.heavy_atoms, &job.shared.rec);
                    let row = SliceRow {
                        index: idx,
                        energy: best.e_nd,
                        rescore: rescorer.predict(&v),
                        conf: best.conf.clone(),
                    };
                    writeln!(out, "{}", row.to_csv())?;
                    stats.docked += 1;
                }
                Ok(None) => {
                    debug!("ligand {idx} ({}): no conformation", header.id);
                    stats.no_conformation += 1;
                }
                Err(LigandError::Task(e)) => {
                    warn!("ligand {idx} ({}): {e}", header.id);
                    stats.task_failures += 1;
                }
                Err(LigandError::Grid(e)) => return Err(e.into()),
            }

            completed += 1;
            if completed % 32 == 0 {
                if let Some(report) = progress.as_deref_mut() {
                    report(completed);
                }
            }
        }
        if let Some(report) = progress.as_deref_mut() {
            report(completed);
        }
        Ok(stats)
    }
}

/// Counters of a phase-2 combination.
#[derive(Debug, Default, Clone)]
pub struct CombineStats {
    pub summaries: usize,
    pub hits_written: usize,
}

/// Combines the per-slice CSV files of a completed job: sorts all docked
/// ligands by energy, writes `log.csv` and the top `num_hits` poses to
/// `ligands.pdbqt`, then removes the slice files.
pub fn combine_slices<L>(
    job_path: &Path,
    num_slices: usize,
    ligands: &mut L,
    headers: &mut HeaderIndex,
    num_hits: usize,
) -> Result<CombineStats, JobError>
where
    L: BufRead + Seek,
{
    let mut summaries: Vec<SliceRow> = Vec::new();
    for s in 0..num_slices {
        let path = job_path.join(format!("{s}.csv"));
        let Ok(text) = fs::read_to_string(&path) else {
            warn!("missing slice csv {}", path.display());
            continue;
        };
        // Ignore incorrect lines.
        summaries.extend(text.lines().filter_map(SliceRow::parse));
    }
    summaries.sort_by(|a, b| a.energy.total_cmp(&b.energy));
    info!("combining {} docked ligands", summaries.len());

    let mut log = BufWriter::new(fs::File::create(job_path.join("log.csv"))?);
    writeln!(
        log,
        "Ligand,Free energy (kcal/mol),Rescore,Molecular weight (g/mol),\
         Partition coefficient xlogP,Apolar desolvation (kcal/mol),\
         Polar desolvation (kcal/mol),Hydrogen bond donors,\
         Hydrogen bond acceptors,Polar surface area tPSA (A^2),Net charge,\
         Rotatable bonds"
    )?;

    let mut models = BufWriter::new(fs::File::create(job_path.join("ligands.pdbqt"))?);
    let mut stats = CombineStats {
        summaries: summaries.len(),
        ..CombineStats::default()
    };
    let mut header_line = String::with_capacity(96);

    for summary in &summaries {
        let offset = headers.offset(summary.index)?;
        ligands.seek(SeekFrom::Start(offset))?;
        header_line.clear();
        ligands.read_line(&mut header_line)?;
        let Some(header) = LigandHeader::parse(&header_line) else {
            warn!("ligand {}: malformed property header", summary.index);
            continue;
        };
        writeln!(
            log,
            "{},{:.3},{:.3},{},{},{},{},{},{},{},{},{}",
            header.id,
            summary.energy,
            summary.rescore,
            header.mwt,
            header.logp,
            header.ads,
            header.pds,
            header.hbd,
            header.hba,
            header.tpsa,
            header.chg,
            header.nrb
        )?;

        if stats.hits_written >= num_hits {
            continue;
        }
        let lig = match Ligand::parse(ligands) {
            Ok(lig) => lig,
            Err(e) => {
                warn!("ligand {} ({}): {e}", summary.index, header.id);
                continue;
            }
        };
        if summary.conf.torsions.len() != lig.num_active_torsions {
            warn!(
                "ligand {} ({}): {} torsions in summary, {} in record",
                summary.index,
                header.id,
                summary.conf.torsions.len(),
                lig.num_active_torsions
            );
            continue;
        }
        stats.hits_written += 1;
        writeln!(models, "MODEL     {:>4}", stats.hits_written)?;
        writeln!(
            models,
            "REMARK     NORMALIZED FREE ENERGY PREDICTED BY VSCREEN:{:8.2} KCAL/MOL",
            summary.energy
        )?;
        lig.write_model(&mut models, &summary.conf)?;
        writeln!(models, "ENDMDL")?;
    }

    for s in 0..num_slices {
        let _ = fs::remove_file(job_path.join(format!("{s}.csv")));
    }
    Ok(stats)
}
