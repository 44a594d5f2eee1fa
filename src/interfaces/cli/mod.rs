use std::path::PathBuf;

use clap::Parser;

use crate::io::format::tpdm_output;

const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

/// Logs a program heading to the `tpdm-output` logger.
pub fn log_heading() {
    let version = if let Some(ver) = VERSION {
        format!("v{ver}")
    } else {
        "v unknown".to_string()
    };
    tpdm_output!("╭──────────────────────────────────────────────────────────────╮");
    tpdm_output!("│                                                              │");
    tpdm_output!("│                     tpdm-backtransform                       │");
    tpdm_output!("│                                                              │");
    tpdm_output!("│   Symmetry-blocked back-transformation of two-particle       │");
    tpdm_output!("│   density matrices from orbital to symmetry-orbital bases    │");
    tpdm_output!("│                                                              │");
    tpdm_output!("│{version:>61} │");
    tpdm_output!("╰──────────────────────────────────────────────────────────────╯");
    tpdm_output!("");
}

/// Command-line arguments of the `tpdm-backtransform` binary.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// The YAML input file. If absent, an input template is written instead.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// The file to which the `tpdm-output` log is written.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
