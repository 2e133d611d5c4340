use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Env file holding credentials and settings; refreshed tokens are written back here
    #[arg(short, long, default_value = ".env")]
    pub env_file: PathBuf,

    /// JSON file with report definitions (defaults to the built-in report list)
    #[arg(short, long)]
    pub reports: Option<PathBuf>,

    /// Directory the CSV files are written to
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Only export CSV files locally, skip the document store
    #[arg(long)]
    pub no_upload: bool,

    /// Keep local CSV files after a successful upload
    #[arg(long)]
    pub keep_local: bool,

    /// Also save the list of available reports
    #[arg(long)]
    pub catalog: bool,
}
