//! Guidescreen CLI - minimum guide set design
//!
//! ```bash
//! # Align the family on the fly and screen against a genome
//! guidescreen -t genes.json -g genome.fasta -o report.json
//!
//! # Reuse an existing alignment, protect annotated domains
//! guidescreen -t genes.json -a family.afa -g genome.fasta -d domains.tsv -c params.json \
//!     --fasta guides.fasta --mapping guides.tsv
//! ```
//!
//! Exit status is 0 when every gene is covered, 2 for a partial result and
//! 1 when no guide set could be built or the input was rejected.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use clap::{value_parser, Arg, Command};
use mimalloc::MiMalloc;
use tracing::{error, info};

use guidescreen::{
    read_aligned_fasta_file, read_genome_file, run_design, AlignmentProducer, Collaborators,
    DesignError, DesignParams, DomainTable, GenomeScan, PrecomputedAlignment, SequenceSearch,
    StarAligner, TargetGene, ThreadCount,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    let matches = Command::new("guidescreen")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Design minimum CRISPR guide sets covering a gene family")
        .arg(
            Arg::new("targets")
                .short('t')
                .long("targets")
                .value_name("FILE")
                .required(true)
                .help("Target genes as JSON (id, interval, strand, sequence)"),
        )
        .arg(
            Arg::new("alignment")
                .short('a')
                .long("alignment")
                .value_name("FILE")
                .help("Aligned FASTA of the family (default: align the targets)"),
        )
        .arg(
            Arg::new("genome")
                .short('g')
                .long("genome")
                .value_name("FILE")
                .required(true)
                .help("Genome FASTA searched for off-targets"),
        )
        .arg(
            Arg::new("domains")
                .short('d')
                .long("domains")
                .value_name("FILE")
                .help("Domain annotation TSV (name, chrom, start, end, evalue)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Design parameters as JSON (default: built-in defaults)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("JSON report (default: stdout)"),
        )
        .arg(
            Arg::new("fasta")
                .long("fasta")
                .value_name("FILE")
                .help("Write the selected guides as FASTA"),
        )
        .arg(
            Arg::new("mapping")
                .long("mapping")
                .value_name("FILE")
                .help("Write the guide to gene mapping as TSV"),
        )
        .arg(
            Arg::new("threads")
                .short('j')
                .long("threads")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .help("Screening threads (default: all cores)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("Log filter, e.g. info or guidescreen=debug"),
        )
        .get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    if let Err(e) = init_tracing(level) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let options = Options {
        targets: required_path(&matches, "targets"),
        alignment: matches.get_one::<String>("alignment").cloned(),
        genome: required_path(&matches, "genome"),
        domains: matches.get_one::<String>("domains").cloned(),
        config: matches.get_one::<String>("config").cloned(),
        output: matches.get_one::<String>("output").cloned(),
        fasta: matches.get_one::<String>("fasta").cloned(),
        mapping: matches.get_one::<String>("mapping").cloned(),
        threads: matches.get_one::<usize>("threads").copied(),
    };

    match run(&options) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

struct Options {
    targets: String,
    alignment: Option<String>,
    genome: String,
    domains: Option<String>,
    config: Option<String>,
    output: Option<String>,
    fasta: Option<String>,
    mapping: Option<String>,
    threads: Option<usize>,
}

fn required_path(matches: &clap::ArgMatches, id: &str) -> String {
    matches.get_one::<String>(id).cloned().unwrap_or_default()
}

fn run(options: &Options) -> Result<i32, DesignError> {
    let genes: Vec<TargetGene> =
        serde_json::from_reader(BufReader::new(File::open(&options.targets)?))?;
    let mut params: DesignParams = match &options.config {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None => DesignParams::default(),
    };
    if let Some(n) = options.threads {
        params.screen.thread_count = ThreadCount::Fixed(n);
    }
    info!(genes = genes.len(), "loaded targets");

    let aligner: Box<dyn AlignmentProducer> = match &options.alignment {
        Some(path) => {
            let block = read_aligned_fasta_file(Path::new(path))?;
            Box::new(PrecomputedAlignment::new(vec![block]))
        }
        None => Box::new(StarAligner::new(params.alignment.clone())),
    };
    let records = read_genome_file(Path::new(&options.genome))?;
    let genome = GenomeScan::new(records, &params.enumeration.pam_patterns)?;
    let domains = match &options.domains {
        Some(path) => Some(DomainTable::read(BufReader::new(File::open(path)?))?),
        None => None,
    };

    let collaborators = Collaborators {
        aligner: aligner.as_ref(),
        genome: &genome,
        domains: domains.as_ref().map(|d| d as &dyn SequenceSearch),
        scorer: None,
    };
    let report = run_design(&genes, &params, &collaborators)?.report;

    match &options.output {
        Some(path) => report.write_json(BufWriter::new(File::create(path)?))?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            report.write_json(&mut handle)?;
            writeln!(handle)?;
        }
    }
    if let Some(path) = &options.fasta {
        report.write_fasta(BufWriter::new(File::create(path)?))?;
    }
    if let Some(path) = &options.mapping {
        report.write_mapping(BufWriter::new(File::create(path)?))?;
    }

    if let Some(message) = &report.message {
        info!(status = ?report.status, "{message}");
    }
    Ok(report.status.exit_code())
}

fn init_tracing(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{level}': {e}"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
    Ok(())
}
