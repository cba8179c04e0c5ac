use clap::{ArgAction, Parser, Subcommand};
use ledpattern::dump::{self, DumpOptions};
use ledpattern::generate::TestPattern;
use ledpattern::index::TIME_INDEX_ENTRY_SIZE;
use ledpattern::io_stream::PatternWriter;
use ledpattern::verify::{verify_file, VerifyOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ledpattern", about = "Write, verify and dump LED pattern files")]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic test pattern
    Generate {
        output: PathBuf,
        #[arg(long, default_value = "10000")]
        duration_ms: u32,
        /// Interval between frames
        #[arg(long, default_value = "33")]
        frame_ms: u32,
        #[arg(short, long, default_value = "3")]
        universes: u32,
        /// Payload sizes are drawn from 0..max_payload
        #[arg(long, default_value = "512")]
        max_payload: usize,
        #[arg(long, default_value = "0")]
        seed: u64,
    },
    /// Structurally verify a pattern file and print statistics
    Verify {
        input: PathBuf,
        /// List every packet
        #[arg(short, long)]
        packets: bool,
        /// List every time index span
        #[arg(short, long)]
        spans: bool,
        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Dump every structural element of a pattern file
    Dump {
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(true)  => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// `Ok(false)` means the file was readable but structurally inconsistent.
fn run(command: Commands) -> Result<bool, Box<dyn std::error::Error>> {
    match command {

        // ── Generate ─────────────────────────────────────────────────────────
        Commands::Generate { output, duration_ms, frame_ms, universes, max_payload, seed } => {
            let pattern = TestPattern {
                duration_ms,
                frame_interval_ms: frame_ms,
                universes,
                max_payload,
                seed,
            };
            let mut writer = PatternWriter::create(&output)?;
            pattern.write_into(&mut writer)?;
            let header = writer.close()?;
            println!(
                "Created: {} ({} ms, {} index entries)",
                output.display(),
                header.duration_ms,
                header.time_index_size as usize / TIME_INDEX_ENTRY_SIZE,
            );
            Ok(true)
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input, packets, spans, json } => {
            let opts = VerifyOptions { record_packets: packets || json };
            let report = verify_file(&input, &opts)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if json {
                serde_json::to_writer_pretty(&mut out, &report)?;
                writeln!(out)?;
            } else {
                dump::render(&report, DumpOptions { packets, spans }, &mut out)?;
                writeln!(out)?;
                writeln!(
                    out,
                    "{}: {} issue(s), {}/{} spans bad",
                    if report.is_consistent() { "OK" } else { "INCONSISTENT" },
                    report.issues.len(),
                    report.bad_spans(),
                    report.spans.len(),
                )?;
            }
            Ok(report.is_consistent())
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input } => {
            let report = verify_file(&input, &VerifyOptions::default())?;
            dump::render(&report, DumpOptions::everything(), io::stdout().lock())?;
            Ok(report.is_consistent())
        }
    }
}
